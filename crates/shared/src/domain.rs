use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Labels seeded into the taxonomy the first time the store is initialized.
pub const DEFAULT_CASE_TYPES: [&str; 10] = [
    "Other",
    "Claim Reason",
    "Counterfeit",
    "Seller Status",
    "MSS Check",
    "ASIN Check",
    "Return Request",
    "Abort-PIV",
    "Abort-MULTI",
    "Abort-NEW",
];

pub fn default_case_types() -> Vec<String> {
    DEFAULT_CASE_TYPES.iter().map(|s| s.to_string()).collect()
}

/// The three top-level keys persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CollectionKey {
    #[serde(rename = "queue")]
    Queue,
    #[serde(rename = "history")]
    History,
    #[serde(rename = "caseTypes")]
    CaseTypes,
}

impl CollectionKey {
    pub const ALL: [CollectionKey; 3] = [
        CollectionKey::Queue,
        CollectionKey::History,
        CollectionKey::CaseTypes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKey::Queue => "queue",
            CollectionKey::History => "history",
            CollectionKey::CaseTypes => "caseTypes",
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queue" => Ok(CollectionKey::Queue),
            "history" => Ok(CollectionKey::History),
            "caseTypes" => Ok(CollectionKey::CaseTypes),
            other => Err(format!("unknown collection key '{other}'")),
        }
    }
}

/// A single tracked case. `url` is an opaque, case-sensitive key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub url: String,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub case_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CaseRecord {
    pub fn captured(url: impl Into<String>, opened_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            opened_at,
            case_type: String::new(),
            completed_at: None,
        }
    }

    /// A record may only leave the queue once it carries a non-blank label.
    pub fn is_classified(&self) -> bool {
        !self.case_type.trim().is_empty()
    }

    pub fn into_completed(self, completed_at: DateTime<Utc>) -> Self {
        Self {
            completed_at: Some(completed_at),
            ..self
        }
    }
}

/// Combined read-only view of all three collections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSnapshot {
    pub queue: Vec<CaseRecord>,
    pub history: Vec<CaseRecord>,
    pub case_types: Vec<String>,
}
