//! Message envelopes exchanged between an editor client and the server.
//!
//! Every inbound frame is either a [`Request`] or a [`Notification`]; every
//! accepted frame is answered by exactly one [`Response`] carrying the same id.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServerError;

// Ids are assigned by the client, monotonically and uniquely per message.
pub type MessageId = u64;

/// Operation kinds a request may ask for.
///
/// Declaration order is the order in which pending requests are executed
/// within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Autocomplete,
    Replacements,
    Highlight,
    Editorconfig,
    Definition,
    LinksAndChars,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Autocomplete => "autocomplete",
            CommandKind::Replacements => "replacements",
            CommandKind::Highlight => "highlight",
            CommandKind::Editorconfig => "editorconfig",
            CommandKind::Definition => "definition",
            CommandKind::LinksAndChars => "links_and_chars",
        }
    }

    /// Whether the command operates on the document text held by the store.
    pub fn needs_document(self) -> bool {
        !matches!(self, CommandKind::Editorconfig)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte range into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Clamps both ends to `text`, orders them and widens them to the
    /// nearest character boundaries.
    pub fn normalize(self, text: &str) -> TextRange {
        let (mut start, mut end) = if self.start <= self.end {
            (self.start, self.end)
        } else {
            (self.end, self.start)
        };
        start = start.min(text.len());
        end = end.min(text.len());
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        while !text.is_char_boundary(end) {
            end += 1;
        }
        TextRange { start, end }
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && end > self.start
    }
}

/// A located piece of text produced by a feature function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub start: usize,
    pub end: usize,
    pub kind: String,
    pub text: String,
}

impl Token {
    pub fn new(start: usize, end: usize, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            kind: kind.into(),
            text: text.into(),
        }
    }
}

/// Command together with the payload only that command carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Autocomplete {
        keywords: Vec<String>,
        current_word: String,
    },
    Replacements {
        keywords: Vec<String>,
        word: String,
    },
    Highlight {
        language: String,
        range: TextRange,
    },
    Editorconfig {
        path: PathBuf,
    },
    Definition {
        starters: Vec<(String, String)>,
        current_word: String,
    },
    LinksAndChars {
        range: TextRange,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Autocomplete { .. } => CommandKind::Autocomplete,
            Command::Replacements { .. } => CommandKind::Replacements,
            Command::Highlight { .. } => CommandKind::Highlight,
            Command::Editorconfig { .. } => CommandKind::Editorconfig,
            Command::Definition { .. } => CommandKind::Definition,
            Command::LinksAndChars { .. } => CommandKind::LinksAndChars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: MessageId,
    pub file: String,
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentChange {
    Upsert(String),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: MessageId,
    pub file: String,
    pub change: DocumentChange,
}

// Wire shape of a notification before the remove/contents invariant is checked.
#[derive(Deserialize)]
struct RawNotification {
    id: MessageId,
    file: String,
    #[serde(default)]
    remove: bool,
    contents: Option<String>,
}

impl TryFrom<RawNotification> for Notification {
    type Error = ServerError;

    fn try_from(raw: RawNotification) -> Result<Self, Self::Error> {
        let change = match (raw.remove, raw.contents) {
            (false, Some(contents)) => DocumentChange::Upsert(contents),
            (true, None) => DocumentChange::Remove,
            (false, None) => {
                return Err(ServerError::protocol(
                    Some(raw.id),
                    "notification without `contents` must set `remove`",
                ))
            }
            (true, Some(_)) => {
                return Err(ServerError::protocol(
                    Some(raw.id),
                    "removal notification must not carry `contents`",
                ))
            }
        };
        Ok(Notification {
            id: raw.id,
            file: raw.file,
            change,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(Request),
    Notification(Notification),
}

/// Classifies one inbound frame body.
///
/// A failure with `id: None` cannot be answered; any other failure must be
/// answered with a cancelled response for that id.
pub fn parse_inbound(body: &[u8]) -> Result<Inbound, ServerError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ServerError::protocol(None, format!("invalid JSON: {e}")))?;

    let id = value
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| ServerError::protocol(None, "missing integer `id`"))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ServerError::protocol(Some(id), "missing string `type`"))?
        .to_owned();

    match kind.as_str() {
        "request" => serde_json::from_value::<Request>(value)
            .map(Inbound::Request)
            .map_err(|e| ServerError::protocol(Some(id), format!("malformed request: {e}"))),
        "notification" => {
            let raw = serde_json::from_value::<RawNotification>(value).map_err(|e| {
                ServerError::protocol(Some(id), format!("malformed notification: {e}"))
            })?;
            Notification::try_from(raw).map(Inbound::Notification)
        }
        other => Err(ServerError::protocol(
            Some(id),
            format!("unsupported message type `{other}`"),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureResult {
    Strings(Vec<String>),
    Tokens(Vec<Token>),
    Token(Token),
    Config(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "response")]
pub struct Response {
    pub id: MessageId,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FeatureResult>,
}

impl Response {
    pub fn cancelled(id: MessageId) -> Self {
        Self {
            id,
            cancelled: true,
            command: None,
            result: None,
        }
    }

    /// Acknowledges a processed notification.
    pub fn acknowledged(id: MessageId) -> Self {
        Self {
            id,
            cancelled: false,
            command: None,
            result: None,
        }
    }

    pub fn completed(id: MessageId, command: CommandKind, result: FeatureResult) -> Self {
        Self {
            id,
            cancelled: false,
            command: Some(command),
            result: Some(result),
        }
    }
}
