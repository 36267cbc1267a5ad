//! In-memory implementation of the call repository
//!
//! Used by the `memory` feature (database-less runs) and by tests. The
//! conditional transition holds the map lock across the compare and the
//! write, giving the same exactly-one-winner guarantee as the SQL
//! conditional update.

use crate::domain::call::record::CallRecord;
use crate::domain::call::repository::CallRepository;
use crate::domain::call::value_object::CallStatus;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct InMemoryCallRepository {
    calls: Mutex<HashMap<CallId, CallRecord>>,
}

impl InMemoryCallRepository {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCallRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallRepository for InMemoryCallRepository {
    async fn insert(&self, call: &CallRecord) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &CallId) -> Result<Option<CallRecord>> {
        let calls = self.calls.lock().unwrap();
        Ok(calls.get(id).cloned())
    }

    async fn transition(
        &self,
        id: &CallId,
        expected: CallStatus,
        to: CallStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<CallRecord>> {
        let mut calls = self.calls.lock().unwrap();
        match calls.get_mut(id) {
            Some(call) if call.status == expected => {
                call.apply_transition(to, at);
                Ok(Some(call.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_active_for_user(&self, user_id: &UserId) -> Result<Option<CallRecord>> {
        let calls = self.calls.lock().unwrap();
        Ok(calls
            .values()
            .filter(|c| c.is_active() && c.involves_user(user_id))
            .max_by_key(|c| c.started_at)
            .cloned())
    }

    async fn history_for_user(
        &self,
        user_id: &UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CallRecord>> {
        let calls = self.calls.lock().unwrap();
        let mut history: Vec<CallRecord> = calls
            .values()
            .filter(|c| c.involves_user(user_id))
            .cloned()
            .collect();
        history.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(history
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_active(&self) -> Result<i64> {
        let calls = self.calls.lock().unwrap();
        Ok(calls.values().filter(|c| c.is_active()).count() as i64)
    }
}
