use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tasklane_core::NonEmptyString;

/// Audited action tag attached to a log entry.
///
/// The backend vocabulary is open-ended: unknown tags are preserved verbatim
/// in [`LogAction::Other`] and fall back to neutral presentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogAction {
    /// A task was created.
    TaskCreated,
    /// Task fields were edited.
    TaskUpdated,
    /// Task moved between workflow statuses.
    TaskStatusChanged,
    /// Task received its first assignee.
    TaskAssigned,
    /// Task assignee was replaced.
    TaskReassigned,
    /// Task assignee was removed.
    TaskUnassigned,
    /// A task was deleted.
    TaskDeleted,
    /// A comment was posted on a task.
    CommentAdded,
    /// A file was attached.
    FileUploaded,
    /// A project was created.
    ProjectCreated,
    /// Any tag this client does not know about.
    Other(String),
}

impl LogAction {
    /// Parses a backend action tag.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "TASK_CREATED" => Self::TaskCreated,
            "TASK_UPDATED" => Self::TaskUpdated,
            "TASK_STATUS_CHANGED" => Self::TaskStatusChanged,
            "TASK_ASSIGNED" => Self::TaskAssigned,
            "TASK_REASSIGNED" => Self::TaskReassigned,
            "TASK_UNASSIGNED" => Self::TaskUnassigned,
            "TASK_DELETED" => Self::TaskDeleted,
            "COMMENT_ADDED" => Self::CommentAdded,
            "FILE_UPLOADED" => Self::FileUploaded,
            "PROJECT_CREATED" => Self::ProjectCreated,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the backend tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskCreated => "TASK_CREATED",
            Self::TaskUpdated => "TASK_UPDATED",
            Self::TaskStatusChanged => "TASK_STATUS_CHANGED",
            Self::TaskAssigned => "TASK_ASSIGNED",
            Self::TaskReassigned => "TASK_REASSIGNED",
            Self::TaskUnassigned => "TASK_UNASSIGNED",
            Self::TaskDeleted => "TASK_DELETED",
            Self::CommentAdded => "COMMENT_ADDED",
            Self::FileUploaded => "FILE_UPLOADED",
            Self::ProjectCreated => "PROJECT_CREATED",
            Self::Other(value) => value.as_str(),
        }
    }

    /// Returns the tag as lowercase words, e.g. `task status changed`.
    #[must_use]
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ").to_lowercase()
    }

    /// Classifies the action for badge styling.
    #[must_use]
    pub fn tone(&self) -> ActionTone {
        let tag = self.as_str();
        if tag.contains("CREATED") {
            ActionTone::Created
        } else if tag.contains("UPDATED") {
            ActionTone::Updated
        } else if tag.contains("DELETED") {
            ActionTone::Deleted
        } else if tag.contains("ASSIGNED") {
            ActionTone::Assignment
        } else if tag.contains("STATUS_CHANGED") {
            ActionTone::Status
        } else {
            ActionTone::Neutral
        }
    }

    /// Returns the glyph shown next to the entry; unmapped tags get a pin.
    #[must_use]
    pub fn icon(&self) -> &'static str {
        match self {
            Self::TaskCreated => "📝",
            Self::TaskUpdated => "✏️",
            Self::TaskStatusChanged | Self::TaskReassigned => "🔄",
            Self::TaskAssigned => "👤",
            Self::TaskUnassigned => "❌",
            Self::TaskDeleted => "🗑️",
            Self::CommentAdded => "💬",
            Self::FileUploaded => "📎",
            Self::ProjectCreated | Self::Other(_) => "📌",
        }
    }
}

impl From<String> for LogAction {
    fn from(value: String) -> Self {
        Self::parse(value.as_str())
    }
}

impl From<LogAction> for String {
    fn from(value: LogAction) -> Self {
        value.as_str().to_owned()
    }
}

/// Presentation class derived from an action tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTone {
    /// Something new appeared.
    Created,
    /// Something was edited.
    Updated,
    /// Something was removed.
    Deleted,
    /// Assignment changes.
    Assignment,
    /// Workflow status changes.
    Status,
    /// Default presentation.
    Neutral,
}

impl ActionTone {
    /// Returns a stable value for API payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Assignment => "assignment",
            Self::Status => "status",
            Self::Neutral => "neutral",
        }
    }
}

/// Non-owning reference to the user who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformedBy {
    /// Backend user id.
    pub id: String,
    /// Display name, when the backend resolved one.
    #[serde(default)]
    pub name: Option<String>,
    /// Email, when the backend resolved one.
    #[serde(default)]
    pub email: Option<String>,
}

/// Action-specific payload. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogDetails {
    /// Title of the affected task.
    pub task_title: Option<String>,
    /// Name of the affected project.
    pub project_name: Option<String>,
    /// Status before a status change.
    pub old_status: Option<String>,
    /// Status after a status change.
    pub new_status: Option<String>,
    /// Current assignee name.
    pub assigned_to_name: Option<String>,
    /// Assignee name before a reassignment.
    pub previous_assignee_name: Option<String>,
}

impl LogDetails {
    /// Returns `(old, new)` when both sides of a status change are present.
    #[must_use]
    pub fn status_transition(&self) -> Option<(&str, &str)> {
        Some((self.old_status.as_deref()?, self.new_status.as_deref()?))
    }

    /// Returns `(previous, current)` when both assignees are present.
    #[must_use]
    pub fn reassignment(&self) -> Option<(&str, &str)> {
        Some((
            self.previous_assignee_name.as_deref()?,
            self.assigned_to_name.as_deref()?,
        ))
    }
}

/// Immutable record of one auditable action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    id: NonEmptyString,
    action: LogAction,
    #[serde(default)]
    message: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    performed_by: Option<PerformedBy>,
    #[serde(default)]
    details: Option<LogDetails>,
}

impl LogEntry {
    /// Creates a log entry without performer or details.
    #[must_use]
    pub fn new(
        id: NonEmptyString,
        action: LogAction,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            action,
            message: message.into(),
            created_at,
            performed_by: None,
            details: None,
        }
    }

    /// Attaches the acting user.
    #[must_use]
    pub fn with_performed_by(mut self, performed_by: PerformedBy) -> Self {
        self.performed_by = Some(performed_by);
        self
    }

    /// Attaches the action payload.
    #[must_use]
    pub fn with_details(mut self, details: LogDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Returns the dedup key.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// Returns the action tag.
    #[must_use]
    pub fn action(&self) -> &LogAction {
        &self.action
    }

    /// Returns the precomputed message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the acting user, if known.
    #[must_use]
    pub fn performed_by(&self) -> Option<&PerformedBy> {
        self.performed_by.as_ref()
    }

    /// Returns the action payload, if any.
    #[must_use]
    pub fn details(&self) -> Option<&LogDetails> {
        self.details.as_ref()
    }

    /// Returns the message, or a line built from performer and action when
    /// the backend sent none.
    #[must_use]
    pub fn summary(&self) -> String {
        if !self.message.trim().is_empty() {
            return self.message.clone();
        }

        let performer = self
            .performed_by
            .as_ref()
            .and_then(|performed_by| performed_by.name.as_deref())
            .unwrap_or("Unknown User");
        format!("{performer} {}", self.action.label())
    }

    /// Returns a compact relative age such as `5m ago`.
    #[must_use]
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        let minutes = (now - self.created_at).num_minutes();
        if minutes < 1 {
            return "Just now".to_owned();
        }
        if minutes < 60 {
            return format!("{minutes}m ago");
        }

        let hours = minutes / 60;
        if hours < 24 {
            return format!("{hours}h ago");
        }

        match hours / 24 {
            1 => "1d ago".to_owned(),
            days if days < 7 => format!("{days}d ago"),
            _ => self.created_at.format("%b %-d").to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(millis) => DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| D::Error::custom(format!("timestamp {millis} is out of range"))),
        RawTimestamp::Text(text) => parse_timestamp_text(text.as_str())
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{text}'"))),
    }
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    text.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}
