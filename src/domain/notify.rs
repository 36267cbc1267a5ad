//! Notification hook
//!
//! The relay's only obligation toward the external push/SMS notifier:
//! after each status transition it hands over enough data for the
//! collaborator to decide whether to notify an offline receiver or log a
//! missed call. Delivery itself happens outside this core.

use crate::domain::call::value_object::CallStatus;
use crate::domain::shared::value_objects::{CallId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Snapshot handed to the notifier after a status transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallNotice {
    pub call_id: CallId,
    pub receiver_id: UserId,
    pub caller_name: String,
    pub status: CallStatus,
    /// True when the receiver had zero live connections at delivery time
    pub receiver_offline: bool,
    pub occurred_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallNotifier: Send + Sync {
    async fn notify(&self, notice: CallNotice);
}

/// Default notifier: structured log lines only
///
/// Deployments wire a real push/SMS bridge here.
pub struct LogNotifier;

#[async_trait]
impl CallNotifier for LogNotifier {
    async fn notify(&self, notice: CallNotice) {
        info!(
            call_id = %notice.call_id,
            receiver_id = %notice.receiver_id,
            caller_name = %notice.caller_name,
            status = notice.status.as_str(),
            receiver_offline = notice.receiver_offline,
            "call notification"
        );
    }
}
