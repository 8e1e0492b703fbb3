//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `CONFAB_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `CONFAB_` override YAML values
//! 3. **GEMINI_API_KEY** - Special case: overrides `gemini.api_key` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `CONFAB_GEMINI__MODEL=gemini-1.5-pro` sets the `gemini.model` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use confab::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! CONFAB_PORT=8080
//!
//! # Set the upstream credential (preferred method)
//! GEMINI_API_KEY="AIza..."
//!
//! # Override nested values
//! CONFAB_SESSIONS__IDLE_TIMEOUT=10m
//! CONFAB_CONTEXT__MAX_TURNS=50
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CONFAB_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Special case: `GEMINI_API_KEY` lands here and is moved into `gemini.api_key` on load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    /// Upstream generative-language API configuration
    pub gemini: GeminiConfig,
    /// Attachment staging configuration
    pub uploads: UploadsConfig,
    /// Context-window policy for prompts sent upstream
    pub context: ContextConfig,
    /// Session lifecycle configuration
    pub sessions: SessionsConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            gemini_api_key: None,
            gemini: GeminiConfig::default(),
            uploads: UploadsConfig::default(),
            context: ContextConfig::default(),
            sessions: SessionsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

/// Configuration for the upstream Gemini API client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeminiConfig {
    /// API key for the generative-language API. Usually supplied via the
    /// `GEMINI_API_KEY` environment variable rather than the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL of the generative-language API
    pub base_url: Url,
    /// Model invoked for chat completions
    pub model: String,
    /// System instruction sent with every request
    pub system_instruction: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Url::parse("https://generativelanguage.googleapis.com/v1beta/").expect("valid default URL"),
            model: "gemini-1.5-flash-001".to_string(),
            system_instruction: "You are a direct and concise assistant. Give extremely brief answers.".to_string(),
        }
    }
}

/// Configuration for temporary attachment staging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Directory where uploads are staged before being forwarded upstream.
    /// Created on startup if it doesn't exist.
    pub dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_file_size: u64,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            // The inline-data path of the Gemini API caps request payloads at 20MB
            max_file_size: 20 * 1024 * 1024,
        }
    }
}

/// Context-window policy applied when flattening history into a prompt.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Cap on how many of the most recent turns contribute to the prompt.
    /// Unset means the entire history is sent on every call.
    pub max_turns: Option<usize>,
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionsConfig {
    /// Sessions idle longer than this are evicted by the background reaper
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How often the reaper scans for idle sessions
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// CORS configuration for browser clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            max_age: None,
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // GEMINI_API_KEY beats whatever the config file carries
        if let Some(key) = config.gemini_api_key.take() {
            config.gemini.api_key = Some(key);
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        // The upstream credential must be present before the server starts taking requests
        match self.gemini.api_key.as_deref() {
            None | Some("") => {
                return Err(Error::Internal {
                    operation: "Config validation: Gemini API key is not configured. \
                     Set the GEMINI_API_KEY environment variable or add gemini.api_key to the config file."
                        .to_string(),
                });
            }
            Some(_) => {}
        }

        if self.gemini.model.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: gemini.model cannot be empty".to_string(),
            });
        }

        if self.uploads.max_file_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.max_file_size must be greater than zero".to_string(),
            });
        }

        if self.sessions.sweep_interval.is_zero() || self.sessions.idle_timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: sessions.idle_timeout and sessions.sweep_interval must be non-zero".to_string(),
            });
        }

        if let Some(0) = self.context.max_turns {
            return Err(Error::Internal {
                operation: "Config validation: context.max_turns must be at least 1 when set (omit it for unbounded context)"
                    .to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("CONFAB_").split("__"))
            // Common GEMINI_API_KEY pattern, as used by the official SDKs
            .merge(Env::raw().only(&["GEMINI_API_KEY"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args_for(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_load_from_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 8080
gemini:
  api_key: test-key
  model: gemini-1.5-pro
sessions:
  idle_timeout: 10m
  sweep_interval: 5s
"#,
            )?;

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.port, 8080);
            assert_eq!(config.gemini.api_key.as_deref(), Some("test-key"));
            assert_eq!(config.gemini.model, "gemini-1.5-pro");
            assert_eq!(config.sessions.idle_timeout, Duration::from_secs(600));
            assert_eq!(config.sessions.sweep_interval, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_gemini_api_key_env_var_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
gemini:
  api_key: from-file
"#,
            )?;
            jail.set_env("GEMINI_API_KEY", "from-env");

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.gemini.api_key.as_deref(), Some("from-env"));
            Ok(())
        });
    }

    #[test]
    fn test_nested_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "gemini:\n  api_key: test-key\n")?;
            jail.set_env("CONFAB_PORT", "9999");
            jail.set_env("CONFAB_CONTEXT__MAX_TURNS", "12");

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.port, 9999);
            assert_eq!(config.context.max_turns, Some(12));
            Ok(())
        });
    }

    #[test]
    fn test_missing_api_key_fails_validation() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 3000\n")?;

            let result = Config::load(&args_for("test.yaml"));

            assert!(result.is_err());
            let message = result.unwrap_err().to_string();
            assert!(message.contains("GEMINI_API_KEY"), "unexpected error: {message}");
            Ok(())
        });
    }

    #[test]
    fn test_empty_api_key_fails_validation() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "gemini:\n  api_key: \"\"\n")?;

            assert!(Config::load(&args_for("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_cors_origins_parse() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
gemini:
  api_key: test-key
cors:
  allowed_origins:
    - "*"
    - "https://app.example.com"
"#,
            )?;

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.cors.allowed_origins.len(), 2);
            assert!(matches!(config.cors.allowed_origins[0], CorsOrigin::Wildcard));
            assert!(matches!(config.cors.allowed_origins[1], CorsOrigin::Url(_)));
            Ok(())
        });
    }

    #[test]
    fn test_zero_max_turns_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
gemini:
  api_key: test-key
context:
  max_turns: 0
"#,
            )?;

            assert!(Config::load(&args_for("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.gemini.model, "gemini-1.5-flash-001");
        assert_eq!(config.uploads.dir, PathBuf::from("uploads"));
        assert!(config.context.max_turns.is_none());
    }
}
