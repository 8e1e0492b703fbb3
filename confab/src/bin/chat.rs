//! Terminal chat client for a running confab server.
//!
//! Drives the same HTTP protocol as the browser page: optimistic local
//! history, multipart submissions, reset. Commands:
//!
//! - `/file <path> [message]` - send an attachment with an optional message
//! - `/reset` - clear the conversation
//! - `/quit` - exit
//!
//! Anything else is sent as a plain message.

use std::path::Path;

use clap::Parser;
use confab::chat::Role;
use confab::client::ChatClient;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal client for a confab chat server", long_about = None)]
struct Args {
    /// Base URL of the confab server
    #[arg(long, env = "CONFAB_SERVER", default_value = "http://localhost:3000")]
    server: Url,
}

fn print_failed_marker(client: &ChatClient) {
    if let Some(turn) = client.history().last()
        && turn.role == Role::User
        && turn.failed
    {
        eprintln!("  (message kept locally, no reply)");
    }
}

async fn handle_line(client: &mut ChatClient, line: &str) -> anyhow::Result<bool> {
    let line = line.trim();
    match line {
        "" => Ok(true),
        "/quit" | "/exit" => Ok(false),
        "/reset" => {
            match client.reset().await {
                Ok(()) => println!("Conversation cleared."),
                Err(e) => eprintln!("Reset failed ({e}); local history cleared anyway."),
            }
            Ok(true)
        }
        _ if line.starts_with("/file") => {
            let rest = line.trim_start_matches("/file").trim();
            if rest.is_empty() {
                eprintln!("Usage: /file <path> [message]");
                return Ok(true);
            }
            let (path, message) = match rest.split_once(' ') {
                Some((path, message)) => (path, Some(message.trim())),
                None => (rest, None),
            };
            match client.send(message.filter(|m| !m.is_empty()), Some(Path::new(path))).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    print_failed_marker(client);
                }
            }
            Ok(true)
        }
        message => {
            match client.send(Some(message), None).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    print_failed_marker(client);
                }
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut client = ChatClient::new(args.server.clone());

    println!("Connected to {} (session {})", args.server, client.session());
    println!("Type a message, /file <path> [message], /reset, or /quit.");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break; // EOF
        };
        if !handle_line(&mut client, &line).await? {
            break;
        }
    }

    Ok(())
}
