//! Call API DTOs

use crate::domain::call::record::CallRecord;
use crate::domain::call::value_object::{Caller, CallerType, CallStatus, CallType};
use crate::domain::shared::value_objects::{UserId, VisitorId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call representation shared by the REST surface and signaling events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    pub id: Uuid,
    pub caller_type: CallerType,
    /// Set for resident callers
    pub caller_id: Option<Uuid>,
    /// Set for visitor callers
    pub caller_visitor_id: Option<String>,
    pub caller_phone: Option<String>,
    pub caller_name: String,
    pub receiver_id: Uuid,
    pub call_type: CallType,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
}

impl From<&CallRecord> for CallResponse {
    fn from(call: &CallRecord) -> Self {
        CallResponse {
            id: call.id.as_uuid(),
            caller_type: call.caller_type(),
            caller_id: call.caller.user_id().map(|id| id.as_uuid()),
            caller_visitor_id: call.caller.visitor_id().map(|id| id.as_str().to_string()),
            caller_phone: call.caller.phone().map(|p| p.to_string()),
            caller_name: call.caller_name.clone(),
            receiver_id: call.receiver_id.as_uuid(),
            call_type: call.call_type,
            status: call.status,
            started_at: call.started_at,
            answered_at: call.answered_at,
            ended_at: call.ended_at,
            duration: call.duration,
        }
    }
}

impl From<CallRecord> for CallResponse {
    fn from(call: CallRecord) -> Self {
        CallResponse::from(&call)
    }
}

/// Request body for initiating a call
///
/// A resident caller names their `caller_user_id`; a visitor flow names a
/// `visitor_id` (minted server-side when absent) plus display data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateCallRequest {
    pub caller_user_id: Option<Uuid>,
    pub visitor_id: Option<String>,
    pub visitor_phone: Option<String>,
    pub caller_name: String,
    pub receiver_id: Uuid,
    pub call_type: CallType,
}

impl InitiateCallRequest {
    pub fn caller(&self) -> Caller {
        match self.caller_user_id {
            Some(id) => Caller::User {
                id: UserId::from_uuid(id),
            },
            None => Caller::Visitor {
                id: self
                    .visitor_id
                    .clone()
                    .map(VisitorId::from_raw)
                    .unwrap_or_default(),
                phone: self.visitor_phone.clone(),
            },
        }
    }
}

/// Query parameters for listing call history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Uuid,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Call history page
#[derive(Debug, Serialize, Deserialize)]
pub struct CallListResponse {
    pub calls: Vec<CallResponse>,
    pub limit: i64,
    pub offset: i64,
}

/// Runtime statistics
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub active_calls: i64,
    pub total_connections: usize,
    pub online_users: usize,
    pub connected_visitors: usize,
}

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code from the domain taxonomy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(code: &str, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visitor_request_without_id_mints_one() {
        let request = InitiateCallRequest {
            caller_user_id: None,
            visitor_id: None,
            visitor_phone: None,
            caller_name: "Courier".to_string(),
            receiver_id: Uuid::new_v4(),
            call_type: CallType::Video,
        };

        match request.caller() {
            Caller::Visitor { id, phone } => {
                assert!(!id.as_str().is_empty());
                assert!(phone.is_none());
            }
            _ => panic!("expected visitor caller"),
        }
    }

    #[test]
    fn test_user_request_overrides_visitor_fields() {
        let user = Uuid::new_v4();
        let request = InitiateCallRequest {
            caller_user_id: Some(user),
            visitor_id: Some("ignored".to_string()),
            visitor_phone: None,
            caller_name: "Alice".to_string(),
            receiver_id: Uuid::new_v4(),
            call_type: CallType::Audio,
        };

        match request.caller() {
            Caller::User { id } => assert_eq!(id.as_uuid(), user),
            _ => panic!("expected user caller"),
        }
    }

    #[test]
    fn test_response_serialization_skips_empty_fields() {
        let response: ApiResponse<String> = ApiResponse::success("ok".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));
        assert!(!json.contains("code"));
    }
}
