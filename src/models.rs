//! Core data models: messages, directives, transaction intents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Roles =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Analyst,
    Executor,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Analyst => "analyst",
            Role::Executor => "executor",
            Role::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "analyst" => Some(Role::Analyst),
            "executor" => Some(Role::Executor),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// The two specialist identities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Specialist {
    Analyst,
    Executor,
}

impl Specialist {
    /// Identity tag every specialist message starts with.
    pub fn tag(&self) -> &'static str {
        match self {
            Specialist::Analyst => "[Analyst]",
            Specialist::Executor => "[Executor]",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Specialist::Analyst => Role::Analyst,
            Specialist::Executor => Role::Executor,
        }
    }

    pub fn directive(&self) -> RoutingDirective {
        match self {
            Specialist::Analyst => RoutingDirective::Analyst,
            Specialist::Executor => RoutingDirective::Executor,
        }
    }
}

impl fmt::Display for Specialist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specialist::Analyst => write!(f, "analyst"),
            Specialist::Executor => write!(f, "executor"),
        }
    }
}

//
// ================= Message =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Specialist reply, prefixed with the identity tag.
    pub fn from_specialist(specialist: Specialist, body: &str) -> Self {
        Self::new(
            specialist.role(),
            format!("{} {}", specialist.tag(), body),
        )
    }

    /// Who authored this message, read from the identity tag alone.
    pub fn author(&self) -> Option<Specialist> {
        [Specialist::Analyst, Specialist::Executor]
            .into_iter()
            .find(|s| self.content.starts_with(s.tag()))
    }

    /// Content without the identity tag.
    pub fn body(&self) -> &str {
        match self.author() {
            Some(s) => {
                let rest = &self.content[s.tag().len()..];
                rest.strip_prefix(' ').unwrap_or(rest)
            }
            None => &self.content,
        }
    }

    pub fn has_transaction_intent(&self) -> bool {
        contains_transaction_marker(&self.content)
    }
}

/// Messages of the current turn: from the latest user message onwards.
pub fn current_turn(history: &[Message]) -> &[Message] {
    match history.iter().rposition(|m| m.role == Role::User) {
        Some(start) => &history[start..],
        None => history,
    }
}

//
// ================= Routing =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutingDirective {
    Analyst,
    Executor,
    Finish,
}

impl RoutingDirective {
    pub fn specialist(&self) -> Option<Specialist> {
        match self {
            RoutingDirective::Analyst => Some(Specialist::Analyst),
            RoutingDirective::Executor => Some(Specialist::Executor),
            RoutingDirective::Finish => None,
        }
    }
}

impl fmt::Display for RoutingDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoutingDirective::Analyst => "ANALYST",
            RoutingDirective::Executor => "EXECUTOR",
            RoutingDirective::Finish => "FINISH",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Transaction Intent =================
//

/// Unsigned transaction handed to an external wallet.
///
/// Field order is the wire order: `{"type","message","tx_data":{"to","data","value"}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionIntent {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub tx_data: TxData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxData {
    pub to: String,
    pub data: String,
    pub value: String,
}

impl TransactionIntent {
    pub const KIND: &'static str = "transaction";

    pub fn new(message: impl Into<String>, tx_data: TxData) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            message: message.into(),
            tx_data,
        }
    }

    /// Parse the first embedded intent out of free text.
    ///
    /// Only used to surface a structured copy to callers; the text itself is
    /// never rewritten.
    pub fn extract(text: &str) -> Option<Self> {
        let marker = find_transaction_marker(text)?;
        let start = text[..marker].rfind('{')?;
        let end = matching_brace(text, start)?;
        serde_json::from_str(&text[start..=end]).ok()
    }
}

/// True when `text` carries `"type": "transaction"` (any whitespace around the colon).
pub fn contains_transaction_marker(text: &str) -> bool {
    find_transaction_marker(text).is_some()
}

fn find_transaction_marker(text: &str) -> Option<usize> {
    text.match_indices("\"type\"").find_map(|(idx, key)| {
        let rest = text[idx + key.len()..].trim_start();
        let rest = rest.strip_prefix(':')?.trim_start();
        rest.starts_with("\"transaction\"").then_some(idx)
    })
}

fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    /// Plain text, or a serialized [`TransactionIntent`]
    pub content: String,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
        }
    }

    pub fn transaction(intent: &TransactionIntent) -> crate::Result<Self> {
        Ok(Self::text(serde_json::to_string(intent)?))
    }

    pub fn is_transaction(&self) -> bool {
        contains_transaction_marker(&self.content)
    }
}

//
// ================= Turn I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub answer: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionIntent>,
    pub hops: usize,
    pub truncated: bool,
}
