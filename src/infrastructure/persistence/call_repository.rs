//! PostgreSQL implementation of the call repository
//!
//! The status transition is a single conditional UPDATE keyed on the
//! expected prior status; the row count doubles as the "transitioned"
//! flag, so concurrent transitions resolve in the database regardless of
//! request interleaving.

use crate::domain::call::record::CallRecord;
use crate::domain::call::repository::CallRepository;
use crate::domain::call::value_object::{Caller, CallStatus, CallType};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId, VisitorId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, error};
use uuid::Uuid;

const CALL_COLUMNS: &str = "id, caller_type, caller_user_id, caller_visitor_id, caller_phone, \
     caller_name, receiver_id, call_type, status, started_at, answered_at, ended_at, duration, \
     created_at, updated_at";

#[derive(FromRow)]
struct CallRow {
    id: Uuid,
    caller_type: String,
    caller_user_id: Option<Uuid>,
    caller_visitor_id: Option<String>,
    caller_phone: Option<String>,
    caller_name: String,
    receiver_id: Uuid,
    call_type: String,
    status: String,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CallRow> for CallRecord {
    fn from(r: CallRow) -> Self {
        let caller = match (r.caller_type.as_str(), r.caller_user_id) {
            ("user", Some(id)) => Caller::User {
                id: UserId::from_uuid(id),
            },
            _ => Caller::Visitor {
                id: VisitorId::from_raw(r.caller_visitor_id.unwrap_or_default()),
                phone: r.caller_phone,
            },
        };

        CallRecord {
            id: CallId::from_uuid(r.id),
            caller,
            caller_name: r.caller_name,
            receiver_id: UserId::from_uuid(r.receiver_id),
            call_type: CallType::from_str(&r.call_type).unwrap_or(CallType::Video),
            status: CallStatus::from_str(&r.status).unwrap_or(CallStatus::Ended),
            started_at: r.started_at,
            answered_at: r.answered_at,
            ended_at: r.ended_at,
            duration: r.duration,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

pub struct PgCallRepository {
    pool: PgPool,
}

impl PgCallRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    error!("{}: {}", context, e);
    DomainError::Internal(format!("database error: {}", e))
}

#[async_trait]
impl CallRepository for PgCallRepository {
    async fn insert(&self, call: &CallRecord) -> Result<()> {
        debug!("Inserting call {}", call.id);

        sqlx::query(
            r#"
            INSERT INTO calls (
                id, caller_type, caller_user_id, caller_visitor_id, caller_phone,
                caller_name, receiver_id, call_type, status,
                started_at, answered_at, ended_at, duration,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(call.id.as_uuid())
        .bind(call.caller_type().as_str())
        .bind(call.caller.user_id().map(|id| id.as_uuid()))
        .bind(call.caller.visitor_id().map(|id| id.as_str().to_string()))
        .bind(call.caller.phone().map(|p| p.to_string()))
        .bind(&call.caller_name)
        .bind(call.receiver_id.as_uuid())
        .bind(call.call_type.as_str())
        .bind(call.status.as_str())
        .bind(call.started_at)
        .bind(call.answered_at)
        .bind(call.ended_at)
        .bind(call.duration)
        .bind(call.created_at)
        .bind(call.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert call", e))?;

        Ok(())
    }

    async fn find_by_id(&self, id: &CallId) -> Result<Option<CallRecord>> {
        let sql = format!("SELECT {} FROM calls WHERE id = $1", CALL_COLUMNS);
        let row = sqlx::query_as::<_, CallRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch call", e))?;

        Ok(row.map(CallRecord::from))
    }

    async fn transition(
        &self,
        id: &CallId,
        expected: CallStatus,
        to: CallStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<CallRecord>> {
        debug!(
            "Transitioning call {}: {} -> {}",
            id,
            expected.as_str(),
            to.as_str()
        );

        let sql = format!(
            r#"
            UPDATE calls SET
                status = $3,
                answered_at = CASE WHEN $3 = 'answered' THEN $4 ELSE answered_at END,
                ended_at = CASE
                    WHEN $3 IN ('rejected', 'ended', 'missed') THEN $4
                    ELSE ended_at
                END,
                duration = CASE
                    WHEN $3 IN ('rejected', 'ended', 'missed') AND answered_at IS NOT NULL
                    THEN FLOOR(EXTRACT(EPOCH FROM ($4 - answered_at)))::BIGINT
                    ELSE duration
                END,
                updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            CALL_COLUMNS
        );
        let row = sqlx::query_as::<_, CallRow>(&sql)
            .bind(id.as_uuid())
            .bind(expected.as_str())
            .bind(to.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to transition call", e))?;

        Ok(row.map(CallRecord::from))
    }

    async fn find_active_for_user(&self, user_id: &UserId) -> Result<Option<CallRecord>> {
        let sql = format!(
            r#"
            SELECT {} FROM calls
            WHERE status IN ('ringing', 'answered')
              AND (receiver_id = $1 OR caller_user_id = $1)
            ORDER BY started_at DESC
            LIMIT 1
            "#,
            CALL_COLUMNS
        );
        let row = sqlx::query_as::<_, CallRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch active call", e))?;

        Ok(row.map(CallRecord::from))
    }

    async fn history_for_user(
        &self,
        user_id: &UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CallRecord>> {
        let sql = format!(
            r#"
            SELECT {} FROM calls
            WHERE receiver_id = $1 OR caller_user_id = $1
            ORDER BY started_at DESC
            LIMIT $2 OFFSET $3
            "#,
            CALL_COLUMNS
        );
        let rows = sqlx::query_as::<_, CallRow>(&sql)
            .bind(user_id.as_uuid())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch call history", e))?;

        Ok(rows.into_iter().map(CallRecord::from).collect())
    }

    async fn count_active(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM calls WHERE status IN ('ringing', 'answered')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to count active calls", e))?;

        Ok(count)
    }
}
