//! Pricing plans and their dual sign-off.
//!
//! A plan needs a sales meeting with recorded minutes behind it, and two
//! qualifying approvals before anything downstream (SOW, quotation) can be
//! built on it. The legacy `/ctc` routes are a thin alias into the same
//! gate.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::approvals;
use crate::core::shared::enums::{ApprovalEntity, PipelineStage, PlanStatus, UserRole};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{leads, meetings, pricing_plans};
use crate::core::shared::state::AppState;
use crate::leads::stage;
use crate::security::AuthenticatedUser;

/// Roles that may sign off on a pricing plan.
const PRICING_APPROVER_ROLES: &[UserRole] = &[UserRole::SalesManager, UserRole::Admin];
const PRICING_QUORUM: i32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = pricing_plans)]
pub struct PricingPlan {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub title: String,
    pub engagement_model: Option<String>,
    pub total_value: BigDecimal,
    pub notes: Option<String>,
    pub status: PlanStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePricingPlanRequest {
    pub lead_id: Uuid,
    pub title: String,
    pub engagement_model: Option<String>,
    pub total_value: BigDecimal,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CtcRejectRequest {
    pub reason: Option<String>,
}

pub async fn create_pricing_plan(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreatePricingPlanRequest>,
) -> Result<Json<PricingPlan>, ApiError> {
    let mut conn = state.conn.get()?;

    let lead_exists: bool = diesel::select(diesel::dsl::exists(
        leads::table.filter(leads::id.eq(req.lead_id)),
    ))
    .get_result(&mut conn)?;
    if !lead_exists {
        return Err(ApiError::NotFound("lead not found".to_string()));
    }

    let has_mom: bool = diesel::select(diesel::dsl::exists(
        meetings::table
            .filter(meetings::lead_id.eq(req.lead_id))
            .filter(meetings::discussion_points.is_not_null()),
    ))
    .get_result(&mut conn)?;
    if !has_mom {
        return Err(ApiError::InvalidState(
            "lead has no meeting with recorded minutes".to_string(),
        ));
    }

    let now = Utc::now();
    let plan = PricingPlan {
        id: Uuid::new_v4(),
        lead_id: req.lead_id,
        title: req.title,
        engagement_model: req.engagement_model,
        total_value: req.total_value,
        notes: req.notes,
        status: PlanStatus::Draft,
        created_by: user.user_id,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(pricing_plans::table)
        .values(&plan)
        .execute(&mut conn)?;

    stage::advance(&mut conn, req.lead_id, PipelineStage::Pricing)?;
    Ok(Json(plan))
}

pub async fn get_pricing_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PricingPlan>, ApiError> {
    let mut conn = state.conn.get()?;
    let plan: PricingPlan = pricing_plans::table
        .filter(pricing_plans::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("pricing plan not found".to_string()))?;
    Ok(Json(plan))
}

/// Open the dual sign-off. The plan's financials are already persisted at
/// this point; approval only activates them.
pub async fn submit_pricing_plan(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<approvals::ApprovalRequest>, ApiError> {
    let mut conn = state.conn.get()?;

    let request = conn.transaction::<approvals::ApprovalRequest, ApiError, _>(|conn| {
        let plan: PricingPlan = pricing_plans::table
            .filter(pricing_plans::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("pricing plan not found".to_string()))?;

        match plan.status {
            PlanStatus::Draft | PlanStatus::Rejected => {}
            PlanStatus::Pending => {
                return Err(ApiError::Conflict(
                    "pricing plan already pending approval".to_string(),
                ))
            }
            PlanStatus::Approved => {
                return Err(ApiError::InvalidState(
                    "pricing plan already approved".to_string(),
                ))
            }
        }

        let request = approvals::submit(
            conn,
            ApprovalEntity::PricingPlan,
            id,
            user.user_id,
            PRICING_APPROVER_ROLES,
            PRICING_QUORUM,
        )?;

        diesel::update(pricing_plans::table.filter(pricing_plans::id.eq(id)))
            .set((
                pricing_plans::status.eq(PlanStatus::Pending),
                pricing_plans::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        Ok(request)
    })?;

    Ok(Json(request))
}

// Legacy cost-sheet routes kept for client compatibility; they address the
// plan directly and resolve to the newest gate request behind it.

pub async fn ctc_submit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<approvals::ApprovalRequest>, ApiError> {
    let plan_id = body
        .get("pricing_plan_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| ApiError::Validation("pricing_plan_id is required".to_string()))?;
    submit_pricing_plan(State(state), Extension(user), Path(plan_id)).await
}

pub async fn ctc_approve(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<approvals::ApprovalRequest>, ApiError> {
    let request =
        approvals::vote_on_entity(&state, ApprovalEntity::PricingPlan, id, &user, true, None)?;
    Ok(Json(request))
}

pub async fn ctc_reject(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<CtcRejectRequest>,
) -> Result<Json<approvals::ApprovalRequest>, ApiError> {
    let request = approvals::vote_on_entity(
        &state,
        ApprovalEntity::PricingPlan,
        id,
        &user,
        false,
        req.reason,
    )?;
    Ok(Json(request))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pricing-plans", post(create_pricing_plan))
        .route("/pricing-plans/:id", get(get_pricing_plan))
        .route("/pricing-plans/:id/submit", post(submit_pricing_plan))
        .route("/ctc", post(ctc_submit))
        .route("/ctc/:id/approve", post(ctc_approve))
        .route("/ctc/:id/reject", post(ctc_reject))
}
