//! Call repository interface

use crate::domain::call::record::CallRecord;
use crate::domain::call::value_object::CallStatus;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Repository interface for call records
///
/// Defined in the domain layer as a trait (port), implemented in the
/// infrastructure layer (adapter).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallRepository: Send + Sync {
    /// Persist a freshly created record
    async fn insert(&self, call: &CallRecord) -> Result<()>;

    /// Find a call by its ID
    async fn find_by_id(&self, id: &CallId) -> Result<Option<CallRecord>>;

    /// Conditionally transition a call: apply `to` iff the stored status
    /// equals `expected`, in a single atomic step.
    ///
    /// Returns the updated record when the guard held, `None` when it did
    /// not (missing call or status moved on). Timestamp and duration rules
    /// follow [`CallRecord::apply_transition`] using `at`.
    async fn transition(
        &self,
        id: &CallId,
        expected: CallStatus,
        to: CallStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<CallRecord>>;

    /// Most recent ringing or answered call the user participates in
    async fn find_active_for_user(&self, user_id: &UserId) -> Result<Option<CallRecord>>;

    /// Call history for a user, newest first
    async fn history_for_user(
        &self,
        user_id: &UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CallRecord>>;

    /// Number of calls currently ringing or answered
    async fn count_active(&self) -> Result<i64>;
}
