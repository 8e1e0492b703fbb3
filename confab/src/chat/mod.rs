//! Conversation domain model.
//!
//! A conversation is an ordered, append-only (except on reset) sequence of
//! [`Turn`]s. Each turn belongs to either the user or the model and carries one
//! or more content [`Fragment`]s. The conversation is the context window: on
//! every submit, its fragments are flattened in order and sent upstream.
//!
//! Turns carry an explicit [`TurnStatus`] so that a turn stranded by an
//! upstream failure is distinguishable from a completed exchange, instead of
//! the gap being silently encoded as a missing model reply.

pub mod session;
pub mod staging;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Whether the exchange a turn belongs to completed.
///
/// A `failed` turn is one whose upstream call never produced a model reply.
/// The turn stays in history (it was already committed when the call was
/// attempted) but clients can render it distinguishably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Completed,
    Failed,
}

/// Inline binary payload, base64-encoded and tagged with a MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded bytes (standard alphabet)
    pub data: String,
}

/// An atomic piece of turn content: plain text or inline binary data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Fragment {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text { text: text.into() }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Fragment::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }
}

/// One message unit in a conversation.
///
/// Invariant: `parts` is non-empty. The constructors below are the only way
/// turns are built inside the crate, and each produces exactly one fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Fragment>,
    pub status: TurnStatus,
}

impl Turn {
    fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Fragment::text(text)],
            status: TurnStatus::Completed,
        }
    }

    fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Fragment::text(text)],
            status: TurnStatus::Completed,
        }
    }
}

/// The synthetic text recorded in history in place of raw attachment bytes.
pub fn upload_marker(filename: &str) -> String {
    format!("[User uploaded file: {filename}]")
}

/// An ordered sequence of turns, insertion order significant.
///
/// Serializes transparently as a JSON array of turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a user turn with a single text fragment.
    pub fn push_user_text(&mut self, text: &str) {
        self.turns.push(Turn::user_text(text));
    }

    /// Append the textual marker turn recording an upload. The raw attachment
    /// bytes never enter history, only this marker.
    pub fn push_upload_marker(&mut self, filename: &str) {
        self.turns.push(Turn::user_text(upload_marker(filename)));
    }

    /// Append a model turn with a single text fragment.
    pub fn push_model_reply(&mut self, text: &str) {
        self.turns.push(Turn::model_text(text));
    }

    /// Flatten turn fragments, in original order, into the prompt-parts
    /// sequence sent upstream.
    ///
    /// With `max_turns` unset the entire history contributes (the context
    /// grows unboundedly call over call). When set, only the newest
    /// `max_turns` turns contribute, oldest dropped first, order preserved
    /// within the window.
    pub fn prompt_parts(&self, max_turns: Option<usize>) -> Vec<Fragment> {
        let window_start = match max_turns {
            Some(max) => self.turns.len().saturating_sub(max),
            None => 0,
        };
        self.turns[window_start..]
            .iter()
            .flat_map(|turn| turn.parts.iter().cloned())
            .collect()
    }

    /// Mark every turn from `index` onward as failed. Called when the
    /// upstream round-trip for the current submit doesn't complete: the
    /// turns stay committed, but tagged.
    pub fn mark_failed_from(&mut self, index: usize) {
        for turn in self.turns.iter_mut().skip(index) {
            turn.status = TurnStatus::Failed;
        }
    }
}
