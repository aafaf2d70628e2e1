//! Domain model for the persistent store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tour::status::TourStatus;

/// Generated tour identifier.
pub type TourId = i64;
/// Generated step identifier.
pub type StepId = i64;

/// Per-guild configuration row. Created lazily on first contact with a
/// guild and never deleted in normal operation.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub guild_id: String,
    pub welcome_channel_id: Option<String>,
    pub custom_welcome_message: Option<String>,
    pub default_tour_id: Option<TourId>,
    pub rules_channel_id: Option<String>,
    pub announcements_channel_id: Option<String>,
    pub guides_channel_id: Option<String>,
}

/// A typed config mutation. This is the allow-list: only these fields can
/// ever reach an UPDATE statement, never caller-supplied column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    WelcomeChannel(Option<String>),
    CustomWelcomeMessage(Option<String>),
    DefaultTour(Option<TourId>),
    RulesChannel(Option<String>),
    AnnouncementsChannel(Option<String>),
    GuidesChannel(Option<String>),
}

impl ConfigUpdate {
    /// Parse a field name from the command boundary into a typed update.
    /// Unknown field names are rejected here, before any SQL is built.
    pub fn parse(field: &str, value: Option<&str>) -> Option<Self> {
        let owned = value.map(str::to_string);
        match field {
            "welcome_channel_id" => Some(Self::WelcomeChannel(owned)),
            "custom_welcome_message" => Some(Self::CustomWelcomeMessage(owned)),
            "default_tour_id" => {
                let id = match value {
                    Some(v) => Some(v.parse::<TourId>().ok()?),
                    None => None,
                };
                Some(Self::DefaultTour(id))
            }
            "rules_channel_id" => Some(Self::RulesChannel(owned)),
            "announcements_channel_id" => Some(Self::AnnouncementsChannel(owned)),
            "guides_channel_id" => Some(Self::GuidesChannel(owned)),
            _ => None,
        }
    }

    /// The column this update targets.
    pub fn column(&self) -> &'static str {
        match self {
            Self::WelcomeChannel(_) => "welcome_channel_id",
            Self::CustomWelcomeMessage(_) => "custom_welcome_message",
            Self::DefaultTour(_) => "default_tour_id",
            Self::RulesChannel(_) => "rules_channel_id",
            Self::AnnouncementsChannel(_) => "announcements_channel_id",
            Self::GuidesChannel(_) => "guides_channel_id",
        }
    }
}

/// A tour definition owned by one guild.
#[derive(Debug, Clone)]
pub struct Tour {
    pub tour_id: TourId,
    pub guild_id: String,
    pub name: String,
    pub description: Option<String>,
    pub completion_role_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How a caller identifies a tour: by generated id or by name.
///
/// Resolved once at the boundary; the data layer never re-sniffs formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TourRef {
    ById(TourId),
    ByName(String),
}

impl TourRef {
    /// Interpret raw user input: all-digits means an id, anything else a name.
    pub fn from_input(input: &str) -> Self {
        match input.trim().parse::<TourId>() {
            Ok(id) => Self::ById(id),
            Err(_) => Self::ByName(input.trim().to_string()),
        }
    }
}

/// Structured step content, serialized to JSON in the `content` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
}

impl StepContent {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: description.into(),
        }
    }

    /// Parse a raw content column. Legacy rows may hold bare markdown
    /// instead of JSON; treat those as a description with no title.
    pub fn from_raw(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            title: None,
            description: raw.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.description.clone())
    }
}

/// One unit of tour content with a dense, zero-based position.
#[derive(Debug, Clone)]
pub struct Step {
    pub step_id: StepId,
    pub tour_id: TourId,
    pub step_number: i64,
    pub title: Option<String>,
    pub content: StepContent,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub channel_to_showcase: Option<String>,
    /// Reserved: no traversal logic gates step visibility on this yet.
    pub required_role_id: Option<String>,
}

/// Input for bulk step creation (default-tour bootstrap).
#[derive(Debug, Clone)]
pub struct NewStep {
    pub title: Option<String>,
    pub content: StepContent,
}

/// Result of a step insert: the generated id and the position actually
/// assigned after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedStep {
    pub step_id: StepId,
    pub step_number: i64,
}

/// Direction for an adjacent step swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// One user's traversal state through one tour in one guild.
#[derive(Debug, Clone)]
pub struct UserProgress {
    pub user_id: String,
    pub guild_id: String,
    pub tour_id: TourId,
    pub current_step_id: Option<StepId>,
    pub status: TourStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Analytics event types. Append-only; the core never reads them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TourStarted,
    StepViewed,
    TourCompleted,
    TourExited,
    RoleAssigned,
    RoleAlreadyHeld,
    RoleNotFound,
    RoleAssignFailed,
    RoleNotConfigured,
    MemberUnavailable,
    ErrorNoSteps,
    ErrorStepNotFound,
    DeliveryFallback,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TourStarted => "tour_started",
            Self::StepViewed => "step_viewed",
            Self::TourCompleted => "tour_completed",
            Self::TourExited => "tour_exited",
            Self::RoleAssigned => "completion_role_assigned",
            Self::RoleAlreadyHeld => "completion_role_already_possessed",
            Self::RoleNotFound => "completion_role_not_found",
            Self::RoleAssignFailed => "completion_role_assign_error",
            Self::RoleNotConfigured => "completion_role_not_configured",
            Self::MemberUnavailable => "completion_member_unavailable",
            Self::ErrorNoSteps => "error_no_steps",
            Self::ErrorStepNotFound => "error_step_not_found",
            Self::DeliveryFallback => "delivery_fallback",
        }
    }
}

/// An analytics row to append.
#[derive(Debug, Clone)]
pub struct TourEvent {
    pub guild_id: String,
    pub tour_id: TourId,
    pub user_id: Option<String>,
    pub event_type: EventType,
    pub step_id: Option<StepId>,
    pub metadata: Option<serde_json::Value>,
}

impl TourEvent {
    pub fn new(guild_id: &str, tour_id: TourId, event_type: EventType) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            tour_id,
            user_id: None,
            event_type,
            step_id: None,
            metadata: None,
        }
    }

    pub fn for_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn at_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
