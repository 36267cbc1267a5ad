//! Call session manager
//!
//! Sole writer of call records. Every status change is delegated to the
//! repository's conditional update, so two sockets racing to transition
//! the same call (receiver answering while the caller hangs up) resolve
//! to exactly one winner regardless of persistence completion order.

use crate::domain::call::record::CallRecord;
use crate::domain::call::repository::CallRepository;
use crate::domain::call::value_object::{Caller, CallStatus, CallType};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

const MAX_HISTORY_PAGE: i64 = 200;

/// Outcome of [`CallSessionManager::end_call`]
///
/// Ends are frequently triggered redundantly by both parties; `transitioned`
/// tells the caller whether this request performed the transition or found
/// the call already terminal, so status events are emitted exactly once.
#[derive(Debug, Clone)]
pub struct CallEnd {
    pub call: CallRecord,
    pub transitioned: bool,
}

pub struct CallSessionManager {
    repository: Arc<dyn CallRepository>,
}

impl CallSessionManager {
    pub fn new(repository: Arc<dyn CallRepository>) -> Self {
        Self { repository }
    }

    /// Create a new call in `Ringing`
    ///
    /// The receiver is not checked for existence here; identity resolution
    /// happens before this call. Nothing prevents a second concurrent call
    /// ringing the same receiver (call waiting).
    pub async fn create_call(
        &self,
        caller: Caller,
        caller_name: &str,
        receiver_id: UserId,
        call_type: CallType,
    ) -> Result<CallRecord> {
        let caller_name = caller_name.trim();
        if caller_name.is_empty() {
            return Err(DomainError::ValidationError(
                "caller name must not be empty".to_string(),
            ));
        }

        let record = CallRecord::new(caller, caller_name.to_string(), receiver_id, call_type);
        self.repository.insert(&record).await?;

        info!(
            "Call {} created: {} ({}) -> {}",
            record.id,
            record.caller_name,
            record.caller_type().as_str(),
            record.receiver_id
        );
        Ok(record)
    }

    /// Answer a ringing call
    pub async fn answer_call(&self, call_id: &CallId) -> Result<CallRecord> {
        match self
            .repository
            .transition(call_id, CallStatus::Ringing, CallStatus::Answered, Utc::now())
            .await?
        {
            Some(call) => {
                info!("Call {} answered", call.id);
                Ok(call)
            }
            None => Err(self.transition_failure(call_id, "answer").await?),
        }
    }

    /// Reject a ringing call
    pub async fn reject_call(&self, call_id: &CallId) -> Result<CallRecord> {
        match self
            .repository
            .transition(call_id, CallStatus::Ringing, CallStatus::Rejected, Utc::now())
            .await?
        {
            Some(call) => {
                info!("Call {} rejected", call.id);
                Ok(call)
            }
            None => Err(self.transition_failure(call_id, "reject").await?),
        }
    }

    /// End a call from any non-terminal status
    ///
    /// A never-answered call resolves to `Missed`, an answered one to
    /// `Ended`. Ending an already-terminal call is a no-op returning the
    /// existing record with `transitioned = false`.
    pub async fn end_call(&self, call_id: &CallId) -> Result<CallEnd> {
        // The status can move between the two guarded attempts (e.g. the
        // receiver answers while we try Ringing -> Missed); statuses only
        // advance toward terminal, so retrying converges.
        loop {
            let now = Utc::now();
            if let Some(call) = self
                .repository
                .transition(call_id, CallStatus::Ringing, CallStatus::Missed, now)
                .await?
            {
                info!("Call {} missed", call.id);
                return Ok(CallEnd {
                    call,
                    transitioned: true,
                });
            }
            if let Some(call) = self
                .repository
                .transition(call_id, CallStatus::Answered, CallStatus::Ended, now)
                .await?
            {
                info!("Call {} ended, duration {:?}s", call.id, call.duration);
                return Ok(CallEnd {
                    call,
                    transitioned: true,
                });
            }

            match self.repository.find_by_id(call_id).await? {
                None => return Err(DomainError::NotFound(format!("call {}", call_id))),
                Some(call) if call.is_terminal() => {
                    debug!("Call {} already {}", call.id, call.status.as_str());
                    return Ok(CallEnd {
                        call,
                        transitioned: false,
                    });
                }
                Some(_) => continue,
            }
        }
    }

    /// Resolve an abandoned ringing call to `Missed`
    ///
    /// Used by the server-side ring timer. Unlike [`end_call`] this never
    /// touches an answered call: the guard only matches `Ringing`, so a
    /// timer firing after the receiver picked up is a no-op.
    ///
    /// [`end_call`]: CallSessionManager::end_call
    pub async fn expire_ringing(&self, call_id: &CallId) -> Result<Option<CallRecord>> {
        let expired = self
            .repository
            .transition(call_id, CallStatus::Ringing, CallStatus::Missed, Utc::now())
            .await?;
        if let Some(call) = &expired {
            info!("Call {} timed out while ringing", call.id);
        }
        Ok(expired)
    }

    /// Fetch a call by id
    pub async fn get_call(&self, call_id: &CallId) -> Result<CallRecord> {
        self.repository
            .find_by_id(call_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("call {}", call_id)))
    }

    /// Most recent ringing or answered call the user participates in
    pub async fn get_active_call(&self, user_id: &UserId) -> Result<Option<CallRecord>> {
        self.repository.find_active_for_user(user_id).await
    }

    /// Call history for a user, newest first
    pub async fn call_history(
        &self,
        user_id: &UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CallRecord>> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let offset = offset.max(0);
        self.repository.history_for_user(user_id, limit, offset).await
    }

    /// Number of currently active calls, for the metrics gauge
    pub async fn active_call_count(&self) -> Result<i64> {
        self.repository.count_active().await
    }

    async fn transition_failure(&self, call_id: &CallId, verb: &str) -> Result<DomainError> {
        Ok(match self.repository.find_by_id(call_id).await? {
            None => DomainError::NotFound(format!("call {}", call_id)),
            Some(call) => DomainError::InvalidTransition(format!(
                "cannot {} call {} in status {}",
                verb,
                call_id,
                call.status.as_str()
            )),
        })
    }
}
