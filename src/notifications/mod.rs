//! Best-effort notification dispatch.
//!
//! Stage transitions and approvals fan out notifications through
//! [`notify`]. Delivery problems are logged and swallowed; a failed
//! dispatch never aborts the state transition that triggered it.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::schema::notifications;
use crate::core::shared::state::AppState;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub reference_id: Option<Uuid>,
    pub priority: i32,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

pub const PRIORITY_NORMAL: i32 = 1;
pub const PRIORITY_HIGH: i32 = 2;

/// Deliver a notification to each recipient. Returns how many were actually
/// stored; failures are logged per recipient and do not propagate.
pub fn notify(
    conn: &mut PgConnection,
    recipient_ids: &[Uuid],
    kind: &str,
    title: &str,
    message: &str,
    reference_id: Option<Uuid>,
    priority: i32,
) -> usize {
    let now = Utc::now();
    let mut delivered = 0;
    for recipient in recipient_ids {
        let row = Notification {
            id: Uuid::new_v4(),
            user_id: *recipient,
            kind: kind.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            reference_id,
            priority,
            is_read: false,
            created_at: now,
        };
        match diesel::insert_into(notifications::table)
            .values(&row)
            .execute(conn)
        {
            Ok(_) => delivered += 1,
            Err(e) => warn!("notification to {} dropped: {}", recipient, e),
        }
    }
    delivered
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let mut conn = state.conn.get()?;
    let rows: Vec<Notification> = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .order(notifications::created_at.desc())
        .limit(100)
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.conn.get()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::id.eq(id))
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(ApiError::NotFound("notification not found".to_string()));
    }
    Ok(Json(serde_json::json!({ "id": id, "is_read": true })))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id/read", post(mark_read))
}
