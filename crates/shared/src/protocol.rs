use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{CaseSnapshot, CollectionKey};

/// Commands accepted over the request/response boundary.
///
/// Wire form is `{"type": "CAPTURE_LINK", "url": "..."}`; field names are camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    CaptureLink {
        url: String,
        #[serde(
            rename = "openedAt",
            default,
            deserialize_with = "blank_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        opened_at: Option<DateTime<Utc>>,
    },
    UpdateCaseType {
        url: String,
        #[serde(rename = "caseType")]
        case_type: String,
    },
    MarkCompleted {
        url: String,
    },
    RemoveQueueItem {
        url: String,
    },
    AddCaseType {
        name: String,
    },
    RemoveCaseType {
        name: String,
    },
    ClearHistory,
    GetData,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CaptureLink { .. } => "CAPTURE_LINK",
            Command::UpdateCaseType { .. } => "UPDATE_CASE_TYPE",
            Command::MarkCompleted { .. } => "MARK_COMPLETED",
            Command::RemoveQueueItem { .. } => "REMOVE_QUEUE_ITEM",
            Command::AddCaseType { .. } => "ADD_CASE_TYPE",
            Command::RemoveCaseType { .. } => "REMOVE_CASE_TYPE",
            Command::ClearHistory => "CLEAR_HISTORY",
            Command::GetData => "GET_DATA",
        }
    }
}

/// One response per command. Variant order matters for untagged decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Captured { ok: bool, added: bool },
    Ack { ok: bool },
    Data(CaseSnapshot),
}

impl CommandResponse {
    pub fn ack(ok: bool) -> Self {
        CommandResponse::Ack { ok }
    }

    /// Uniform negative acknowledgment for commands the core does not recognise.
    pub fn nack() -> Self {
        CommandResponse::Ack { ok: false }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            CommandResponse::Captured { ok, .. } | CommandResponse::Ack { ok } => *ok,
            CommandResponse::Data(_) => true,
        }
    }
}

/// Fired after the store persists one or more collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub keys: BTreeSet<CollectionKey>,
}

impl ChangeEvent {
    pub fn single(key: CollectionKey) -> Self {
        Self {
            keys: BTreeSet::from([key]),
        }
    }

    pub fn touches(&self, key: CollectionKey) -> bool {
        self.keys.contains(&key)
    }

    pub fn intersects(&self, interest: &BTreeSet<CollectionKey>) -> bool {
        self.keys.iter().any(|key| interest.contains(key))
    }
}

/// Treats a missing, null or blank `openedAt` as "now" rather than a decode error.
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(stamp) => DateTime::parse_from_rfc3339(stamp)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}
