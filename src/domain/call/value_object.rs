//! Call value objects

use crate::domain::shared::value_objects::{UserId, VisitorId};
use serde::{Deserialize, Serialize};

/// Requested media for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Video,
    Audio,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Video => "video",
            CallType::Audio => "audio",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "video" => Some(CallType::Video),
            "audio" => Some(CallType::Audio),
            _ => None,
        }
    }
}

/// Call lifecycle status
///
/// Initial status is `Ringing`; `Rejected`, `Ended` and `Missed` are
/// terminal and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Receiver is being alerted
    Ringing,
    /// Receiver picked up, media is being negotiated or flowing
    Answered,
    /// Receiver declined while ringing
    Rejected,
    /// Answered call hung up by either party
    Ended,
    /// Ended before being answered
    Missed,
}

impl CallStatus {
    /// Check if a status transition is valid
    pub fn can_transition_to(&self, new_status: CallStatus) -> bool {
        use CallStatus::*;

        match (self, new_status) {
            // From Ringing
            (Ringing, Answered) => true,
            (Ringing, Rejected) => true,
            (Ringing, Missed) => true,

            // From Answered
            (Answered, Ended) => true,

            // Terminal statuses are final
            (Rejected, _) | (Ended, _) | (Missed, _) => false,

            // All other transitions are invalid
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Rejected | CallStatus::Ended | CallStatus::Missed
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Rejected => "rejected",
            CallStatus::Ended => "ended",
            CallStatus::Missed => "missed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(CallStatus::Ringing),
            "answered" => Some(CallStatus::Answered),
            "rejected" => Some(CallStatus::Rejected),
            "ended" => Some(CallStatus::Ended),
            "missed" => Some(CallStatus::Missed),
            _ => None,
        }
    }
}

/// Kind of calling party, the serialized face of [`Caller`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerType {
    User,
    Visitor,
}

impl CallerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerType::User => "user",
            CallerType::Visitor => "visitor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(CallerType::User),
            "visitor" => Some(CallerType::Visitor),
            _ => None,
        }
    }
}

/// Calling party identity
///
/// Residents call from an authenticated account; visitors exist only for
/// the lifetime of their connection. Modeled as a tagged variant so the
/// two shapes can never be mixed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Caller {
    User { id: UserId },
    Visitor { id: VisitorId, phone: Option<String> },
}

impl Caller {
    pub fn caller_type(&self) -> CallerType {
        match self {
            Caller::User { .. } => CallerType::User,
            Caller::Visitor { .. } => CallerType::Visitor,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Caller::User { id } => Some(*id),
            Caller::Visitor { .. } => None,
        }
    }

    pub fn visitor_id(&self) -> Option<&VisitorId> {
        match self {
            Caller::User { .. } => None,
            Caller::Visitor { id, .. } => Some(id),
        }
    }

    pub fn phone(&self) -> Option<&str> {
        match self {
            Caller::User { .. } => None,
            Caller::Visitor { phone, .. } => phone.as_deref(),
        }
    }
}
