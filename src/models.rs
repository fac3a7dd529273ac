use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Chat-platform account ids and topic ids are both 64-bit
pub type Id = i64;

/// Explanation verbosity preference of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Short,
    #[default]
    Long,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Short => "short",
            Mode::Long => "long",
        }
    }

    /// The other mode; applying it twice yields the original value.
    pub fn toggled(self) -> Self {
        match self {
            Mode::Short => Mode::Long,
            Mode::Long => Mode::Short,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown mode '{0}'")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Mode::Short),
            "long" => Ok(Mode::Long),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub user_id: Id,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Topic {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    pub explanation: Option<String>,
    pub related_topics: Option<Vec<String>>,
    pub parent_topic_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    pub fn is_explained(&self) -> bool {
        self.explanation.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewTopic {
    pub user_id: Id,
    pub title: String,
    pub parent_topic_title: Option<String>,
}

/// Aggregate counts published as gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub users: i64,
    pub topics: i64,
    pub explained_topics: i64,
}

// ---------------- request / response bodies ----------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddTopicRequest {
    pub user_id: Option<Id>,
    pub topic_title: Option<String>,
    pub parent_topic_title: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UserRequest {
    pub user_id: Option<Id>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DeleteTopicRequest {
    pub topic_id: Option<Id>,
}

/// Returned by `add_topic`; the explanation is always still pending.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedTopic {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    pub explanation: Option<String>,
    pub parent_topic_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Topic> for CreatedTopic {
    fn from(t: Topic) -> Self {
        Self {
            id: t.id,
            user_id: t.user_id,
            title: t.title,
            explanation: t.explanation,
            parent_topic_title: t.parent_topic_title,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopicList {
    pub topics: Vec<Topic>,
}

/// A topic served by `random_topic`; it no longer exists in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConsumedTopic {
    pub id: Id,
    pub user_id: Id,
    pub title: String,
    pub explanation: Option<String>,
    pub related_topics: Vec<String>,
    pub parent_topic_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModeResponse {
    pub user_id: Id,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusMessage {
    pub status: String,
    pub message: String,
}
