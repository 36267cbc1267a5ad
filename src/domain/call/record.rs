//! Call record - one row per call attempt
//!
//! The record is owned exclusively by the session manager; no other
//! component mutates it. Status changes go through the repository's
//! conditional update, which applies the same timestamp rules as
//! [`CallRecord::apply_transition`].

use crate::domain::call::value_object::{Caller, CallerType, CallStatus, CallType};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    pub caller: Caller,
    pub caller_name: String,
    pub receiver_id: UserId,
    pub call_type: CallType,
    pub status: CallStatus,

    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds between answer and hangup; set only for answered
    /// calls that have reached a terminal status
    pub duration: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// Create a new record in `Ringing`
    pub fn new(
        caller: Caller,
        caller_name: String,
        receiver_id: UserId,
        call_type: CallType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CallId::new(),
            caller,
            caller_name,
            receiver_id,
            call_type,
            status: CallStatus::Ringing,
            started_at: now,
            answered_at: None,
            ended_at: None,
            duration: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn caller_type(&self) -> CallerType {
        self.caller.caller_type()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether the user participates in this call as caller or receiver
    pub fn involves_user(&self, user_id: &UserId) -> bool {
        self.receiver_id == *user_id || self.caller.user_id() == Some(*user_id)
    }

    /// The terminal status `end` resolves to from the current status
    pub fn end_status(&self) -> Option<CallStatus> {
        match self.status {
            CallStatus::Ringing => Some(CallStatus::Missed),
            CallStatus::Answered => Some(CallStatus::Ended),
            _ => None,
        }
    }

    /// Answer the call
    pub fn answer(&mut self) -> Result<()> {
        self.transition_to(CallStatus::Answered, Utc::now())
    }

    /// Reject the call
    pub fn reject(&mut self) -> Result<()> {
        self.transition_to(CallStatus::Rejected, Utc::now())
    }

    /// End the call: a never-answered call becomes `Missed`, an answered
    /// one becomes `Ended`
    pub fn end(&mut self) -> Result<()> {
        let to = self.end_status().ok_or_else(|| {
            DomainError::InvalidTransition(format!(
                "call {} is already {}",
                self.id,
                self.status.as_str()
            ))
        })?;
        self.transition_to(to, Utc::now())
    }

    fn transition_to(&mut self, to: CallStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition(format!(
                "call {} cannot go from {} to {}",
                self.id,
                self.status.as_str(),
                to.as_str()
            )));
        }
        self.apply_transition(to, at);
        Ok(())
    }

    /// Apply a transition whose guard has already been checked.
    ///
    /// Repositories use this after their conditional update succeeded, so
    /// the timestamp rules live in exactly one place:
    /// - `Answered` sets `answered_at`
    /// - terminal statuses set `ended_at`, and `duration` when the call
    ///   had been answered
    pub fn apply_transition(&mut self, to: CallStatus, at: DateTime<Utc>) {
        match to {
            CallStatus::Answered => {
                self.answered_at = Some(at);
            }
            CallStatus::Rejected | CallStatus::Ended | CallStatus::Missed => {
                self.ended_at = Some(at);
                if let Some(answered_at) = self.answered_at {
                    self.duration = Some((at - answered_at).num_seconds());
                }
            }
            CallStatus::Ringing => {}
        }
        self.status = to;
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::VisitorId;
    use chrono::Duration;

    fn visitor_call() -> CallRecord {
        CallRecord::new(
            Caller::Visitor {
                id: VisitorId::from_raw("front-gate"),
                phone: None,
            },
            "Delivery".to_string(),
            UserId::new(),
            CallType::Video,
        )
    }

    #[test]
    fn test_new_call_is_ringing() {
        let call = visitor_call();
        assert_eq!(call.status, CallStatus::Ringing);
        assert_eq!(call.caller_type(), CallerType::Visitor);
        assert!(call.answered_at.is_none());
        assert!(call.ended_at.is_none());
        assert!(call.duration.is_none());
    }

    #[test]
    fn test_answer_then_end() {
        let mut call = visitor_call();
        call.answer().unwrap();
        assert_eq!(call.status, CallStatus::Answered);
        assert!(call.answered_at.is_some());

        call.end().unwrap();
        assert_eq!(call.status, CallStatus::Ended);
        assert!(call.ended_at.is_some());
        assert!(call.duration.is_some());
    }

    #[test]
    fn test_end_while_ringing_is_missed() {
        let mut call = visitor_call();
        call.end().unwrap();
        assert_eq!(call.status, CallStatus::Missed);
        assert!(call.answered_at.is_none());
        assert!(call.duration.is_none());
    }

    #[test]
    fn test_reject_only_from_ringing() {
        let mut call = visitor_call();
        call.answer().unwrap();
        let result = call.reject();
        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
        assert_eq!(call.status, CallStatus::Answered);
    }

    #[test]
    fn test_end_on_terminal_fails() {
        let mut call = visitor_call();
        call.end().unwrap();
        assert!(call.end().is_err());
        assert_eq!(call.status, CallStatus::Missed);
    }

    #[test]
    fn test_duration_is_whole_seconds() {
        let mut call = visitor_call();
        let answered_at = call.started_at + Duration::seconds(2);
        call.apply_transition(CallStatus::Answered, answered_at);

        let ended_at = answered_at + Duration::seconds(185) + Duration::milliseconds(700);
        call.apply_transition(CallStatus::Ended, ended_at);

        assert_eq!(call.duration, Some(185));
        assert_eq!(call.ended_at, Some(ended_at));
    }

    #[test]
    fn test_involves_user() {
        let resident = UserId::new();
        let other = UserId::new();
        let call = CallRecord::new(
            Caller::User { id: resident },
            "Alice".to_string(),
            other,
            CallType::Audio,
        );
        assert!(call.involves_user(&resident));
        assert!(call.involves_user(&other));
        assert!(!call.involves_user(&UserId::new()));
    }
}
