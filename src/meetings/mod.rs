//! Meetings and minutes-of-meeting records.
//!
//! Sales meetings gate pricing: a lead needs at least one meeting with
//! recorded minutes before a pricing plan may exist. Scheduling a kickoff
//! meeting is the event that freezes the agreement's statement of work.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::shared::enums::{MeetingKind, PipelineStage};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{agreements, leads, meetings, projects};
use crate::core::shared::state::AppState;
use crate::leads::stage;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = meetings)]
pub struct Meeting {
    pub id: Uuid,
    pub lead_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub agreement_id: Option<Uuid>,
    pub kind: MeetingKind,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub discussion_points: Option<String>,
    pub decisions_made: Option<String>,
    pub action_items: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// Minutes count as recorded once discussion points exist.
    pub fn has_mom(&self) -> bool {
        self.discussion_points
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub kind: MeetingKind,
    pub title: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub lead_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub agreement_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RecordMomRequest {
    pub discussion_points: String,
    pub decisions_made: Option<String>,
    pub action_items: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListMeetingsQuery {
    pub lead_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub kind: Option<MeetingKind>,
}

pub async fn create_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateMeetingRequest>,
) -> Result<Json<Meeting>, ApiError> {
    let mut conn = state.conn.get()?;

    match req.kind {
        MeetingKind::Sales => {
            let lead_id = req.lead_id.ok_or_else(|| {
                ApiError::Validation("sales meeting requires lead_id".to_string())
            })?;
            let exists: bool = diesel::select(diesel::dsl::exists(
                leads::table.filter(leads::id.eq(lead_id)),
            ))
            .get_result(&mut conn)?;
            if !exists {
                return Err(ApiError::NotFound("lead not found".to_string()));
            }
        }
        MeetingKind::Kickoff => {
            let agreement_id = req.agreement_id.ok_or_else(|| {
                ApiError::Validation("kickoff meeting requires agreement_id".to_string())
            })?;
            let exists: bool = diesel::select(diesel::dsl::exists(
                agreements::table.filter(agreements::id.eq(agreement_id)),
            ))
            .get_result(&mut conn)?;
            if !exists {
                return Err(ApiError::NotFound("agreement not found".to_string()));
            }
        }
        MeetingKind::Consulting => {
            let project_id = req.project_id.ok_or_else(|| {
                ApiError::Validation("consulting meeting requires project_id".to_string())
            })?;
            let exists: bool = diesel::select(diesel::dsl::exists(
                projects::table.filter(projects::id.eq(project_id)),
            ))
            .get_result(&mut conn)?;
            if !exists {
                return Err(ApiError::NotFound("project not found".to_string()));
            }
        }
    }

    let now = Utc::now();
    let meeting = Meeting {
        id: Uuid::new_v4(),
        lead_id: req.lead_id,
        project_id: req.project_id,
        agreement_id: req.agreement_id,
        kind: req.kind,
        title: req.title,
        scheduled_at: req.scheduled_at.unwrap_or(now),
        discussion_points: None,
        decisions_made: None,
        action_items: None,
        created_by: user.user_id,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(meetings::table)
        .values(&meeting)
        .execute(&mut conn)?;

    match meeting.kind {
        MeetingKind::Sales => {
            if let Some(lead_id) = meeting.lead_id {
                stage::advance(&mut conn, lead_id, PipelineStage::Meeting)?;
            }
        }
        MeetingKind::Kickoff => {
            // Scheduling the kickoff meeting is the freeze trigger for the
            // agreement's statement of work.
            if let Some(agreement_id) = meeting.agreement_id {
                if let Some(sow_id) =
                    crate::sow::freeze_for_agreement(&mut conn, agreement_id, user.user_id)?
                {
                    info!("kickoff meeting {} froze sow {}", meeting.id, sow_id);
                }
            }
        }
        MeetingKind::Consulting => {}
    }

    Ok(Json(meeting))
}

pub async fn list_meetings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListMeetingsQuery>,
) -> Result<Json<Vec<Meeting>>, ApiError> {
    let mut conn = state.conn.get()?;
    let mut q = meetings::table.into_boxed();
    if let Some(lead_id) = query.lead_id {
        q = q.filter(meetings::lead_id.eq(lead_id));
    }
    if let Some(project_id) = query.project_id {
        q = q.filter(meetings::project_id.eq(project_id));
    }
    if let Some(kind) = query.kind {
        q = q.filter(meetings::kind.eq(kind));
    }
    let rows: Vec<Meeting> = q.order(meetings::scheduled_at.desc()).load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn get_meeting(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Meeting>, ApiError> {
    let mut conn = state.conn.get()?;
    let meeting: Meeting = meetings::table
        .filter(meetings::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("meeting not found".to_string()))?;
    Ok(Json(meeting))
}

pub async fn record_mom(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordMomRequest>,
) -> Result<Json<Meeting>, ApiError> {
    if req.discussion_points.trim().is_empty() {
        return Err(ApiError::Validation(
            "discussion_points must not be empty".to_string(),
        ));
    }

    let mut conn = state.conn.get()?;
    let meeting: Meeting = diesel::update(meetings::table.filter(meetings::id.eq(id)))
        .set((
            meetings::discussion_points.eq(Some(req.discussion_points)),
            meetings::decisions_made.eq(req.decisions_made),
            meetings::action_items.eq(req.action_items),
            meetings::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)
        .map_err(|_| ApiError::NotFound("meeting not found".to_string()))?;

    Ok(Json(meeting))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/meetings", post(create_meeting).get(list_meetings))
        .route("/meetings/:id", get(get_meeting))
        .route("/meetings/:id/mom", put(record_mom))
}
