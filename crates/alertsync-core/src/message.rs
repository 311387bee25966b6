use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::MessageId;

/// Alert category as sent by the backend in the `type` field.
///
/// Unrecognized values are preserved in `Unknown` and handled
/// least-privileged by the visibility rules.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Category {
    Debug,
    Info,
    Priority,
    Unknown(String),
}

impl Category {
    /// Case-insensitive parse. Never fails: anything unrecognized
    /// becomes `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "debug" => Self::Debug,
            "info" => Self::Info,
            "prioritaire" | "priority" => Self::Priority,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Priority => "Prioritaire",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|s| Self::parse(&s)).unwrap_or_default())
    }
}

/// A dispatched alert. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "message", alias = "body")]
    pub body: String,
    #[serde(rename = "type", alias = "category", default)]
    pub category: Category,
    #[serde(rename = "timestamp", alias = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        body: impl Into<String>,
        category: Category,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            category,
            occurred_at,
        }
    }

    /// Read order: newest first, ties broken by id descending.
    pub fn feed_order(a: &Self, b: &Self) -> Ordering {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| b.id.cmp(&a.id))
    }
}
