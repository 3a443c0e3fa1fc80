//! Lead capture and the sales-funnel stage surface.

pub mod stage;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::enums::{LeadStatus, PipelineStage};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{lead_stage_history, leads};
use crate::core::shared::state::AppState;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = leads)]
pub struct Lead {
    pub id: Uuid,
    pub lead_number: String,
    pub company: String,
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub estimated_value: Option<BigDecimal>,
    pub status: LeadStatus,
    pub current_stage: PipelineStage,
    pub assigned_to: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
#[diesel(table_name = lead_stage_history)]
pub struct StageHistoryEntry {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub stage: PipelineStage,
    pub entered_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
    pub company: String,
    pub contact_name: String,
    pub contact_email: Option<String>,
    pub estimated_value: Option<BigDecimal>,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListLeadsQuery {
    pub search: Option<String>,
    pub status: Option<LeadStatus>,
    pub assigned_to: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ResetStageRequest {
    pub stage: PipelineStage,
}

#[derive(Debug, Serialize)]
pub struct LeadDetail {
    pub lead: Lead,
    pub stage_history: Vec<StageHistoryEntry>,
}

fn generate_lead_number(conn: &mut PgConnection) -> String {
    let count: i64 = leads::table.count().get_result(conn).unwrap_or(0);
    format!("LD-{:06}", count + 1)
}

pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateLeadRequest>,
) -> Result<Json<Lead>, ApiError> {
    if req.company.trim().is_empty() {
        return Err(ApiError::Validation("company is required".to_string()));
    }

    let mut conn = state.conn.get()?;
    let now = Utc::now();
    let lead = Lead {
        id: Uuid::new_v4(),
        lead_number: generate_lead_number(&mut conn),
        company: req.company,
        contact_name: req.contact_name,
        contact_email: req.contact_email,
        estimated_value: req.estimated_value,
        status: LeadStatus::Open,
        current_stage: PipelineStage::Lead,
        assigned_to: req.assigned_to.or(Some(user.user_id)),
        created_by: user.user_id,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(leads::table)
        .values(&lead)
        .execute(&mut conn)?;
    diesel::insert_into(lead_stage_history::table)
        .values((
            lead_stage_history::id.eq(Uuid::new_v4()),
            lead_stage_history::lead_id.eq(lead.id),
            lead_stage_history::stage.eq(PipelineStage::Lead),
            lead_stage_history::entered_at.eq(now),
        ))
        .execute(&mut conn)?;

    Ok(Json(lead))
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLeadsQuery>,
) -> Result<Json<Vec<Lead>>, ApiError> {
    let mut conn = state.conn.get()?;
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = leads::table.into_boxed();
    if let Some(status) = query.status {
        q = q.filter(leads::status.eq(status));
    }
    if let Some(assigned_to) = query.assigned_to {
        q = q.filter(leads::assigned_to.eq(assigned_to));
    }
    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            leads::company
                .ilike(pattern.clone())
                .or(leads::contact_name.ilike(pattern.clone()))
                .or(leads::lead_number.ilike(pattern)),
        );
    }

    let rows: Vec<Lead> = q
        .order(leads::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<LeadDetail>, ApiError> {
    let mut conn = state.conn.get()?;
    let lead: Lead = leads::table
        .filter(leads::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("lead not found".to_string()))?;

    let stage_history: Vec<StageHistoryEntry> = lead_stage_history::table
        .filter(lead_stage_history::lead_id.eq(id))
        .order(lead_stage_history::entered_at.asc())
        .load(&mut conn)?;

    Ok(Json(LeadDetail {
        lead,
        stage_history,
    }))
}

/// The stage endpoint consulted before a client offers the "create next
/// entity" action.
pub async fn get_lead_stage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<stage::StageSnapshot>, ApiError> {
    let mut conn = state.conn.get()?;

    let exists: bool = diesel::select(diesel::dsl::exists(
        leads::table.filter(leads::id.eq(id)),
    ))
    .get_result(&mut conn)?;
    if !exists {
        return Err(ApiError::NotFound("lead not found".to_string()));
    }

    let probes = stage::load_probes(&mut conn, id)?;
    Ok(Json(stage::resolve(&probes)))
}

pub async fn close_lead(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !user.is_admin() {
        return Err(ApiError::Forbidden("only admin may close a lead".to_string()));
    }

    let mut conn = state.conn.get()?;
    let updated = diesel::update(leads::table.filter(leads::id.eq(id)))
        .set((
            leads::status.eq(LeadStatus::Closed),
            leads::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(ApiError::NotFound("lead not found".to_string()));
    }
    Ok(Json(serde_json::json!({ "id": id, "status": "closed" })))
}

pub async fn reset_stage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResetStageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !user.is_admin() {
        return Err(ApiError::Forbidden(
            "only admin may reset a lead's stage".to_string(),
        ));
    }

    let mut conn = state.conn.get()?;
    let exists: bool = diesel::select(diesel::dsl::exists(
        leads::table.filter(leads::id.eq(id)),
    ))
    .get_result(&mut conn)?;
    if !exists {
        return Err(ApiError::NotFound("lead not found".to_string()));
    }

    stage::reset(&mut conn, id, req.stage)?;
    Ok(Json(
        serde_json::json!({ "id": id, "current_stage": req.stage }),
    ))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/leads", post(create_lead).get(list_leads))
        .route("/leads/:id", get(get_lead))
        .route("/leads/:id/stage", get(get_lead_stage))
        .route("/leads/:id/close", post(close_lead))
        .route("/leads/:id/reset-stage", post(reset_stage))
}
