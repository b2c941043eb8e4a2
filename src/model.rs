use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content flavor. Personal items are owned and moderated by the same
/// administrative actor; community items have a separate author and
/// moderator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Personal,
    Community,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Personal => "personal",
            ContentKind::Community => "community",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "personal" => Some(ContentKind::Personal),
            "community" => Some(ContentKind::Community),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Resubmitted,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Draft => "draft",
            ReviewStatus::Submitted => "submitted",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Resubmitted => "resubmitted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ReviewStatus::Draft),
            "submitted" => Some(ReviewStatus::Submitted),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            "resubmitted" => Some(ReviewStatus::Resubmitted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub kind: ContentKind,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub excerpt: Option<String>,
    pub status: ReviewStatus,
    pub published: bool,
    pub is_edited: bool,
    pub submission_note: Option<String>,
    pub admin_feedback: Option<String>,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: i64,
    pub content_id: i64,
    pub content_kind: ContentKind,
    pub invited_email: String,
    pub invited_user_id: Option<i64>,
    pub invited_by: i64,
    pub token: String,
    pub accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collaborator {
    pub content_id: i64,
    pub content_kind: ContentKind,
    pub user_id: i64,
}

/// One row per publish-worthy event; `processed` flips to true exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: i64,
    pub source: ContentKind,
    pub title: String,
    pub excerpt: Option<String>,
    pub slug: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Authenticated caller identity. Authentication itself happens upstream;
/// the workflow only consumes the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub is_moderator: bool,
}

/// Effective role of an actor with respect to one content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Moderator,
    Author,
    Collaborator,
    None,
}
