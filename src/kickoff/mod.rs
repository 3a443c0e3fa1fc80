//! Kickoff workflow: the hand-off from sales to delivery.
//!
//! pending -> converted | rejected | returned, returned -> pending via
//! resubmit. Creation is gated on payment eligibility and a single active
//! request per agreement; acceptance materializes the Project, freezes the
//! statement of work and fans staffing requirements out to HR.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::agreements::{parse_team_deployment, TeamDeployment};
use crate::core::shared::enums::{AgreementStatus, KickoffStatus, PipelineStage, UserRole};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{agreements, kickoff_requests};
use crate::core::shared::state::AppState;
use crate::leads::stage;
use crate::notifications::{self, PRIORITY_HIGH, PRIORITY_NORMAL};
use crate::payments::check_agreement_eligibility;
use crate::projects::{self, Project};
use crate::security::AuthenticatedUser;
use crate::sow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickoffAction {
    Accept,
    Reject,
    Return,
    Resubmit,
}

/// The transition table. Terminal states answer "already processed";
/// anything else not in the table is an invalid transition for the current
/// state.
pub fn check_transition(
    from: KickoffStatus,
    action: KickoffAction,
) -> Result<KickoffStatus, ApiError> {
    if from.is_terminal() {
        return Err(ApiError::InvalidState(format!(
            "kickoff request already processed ({from})"
        )));
    }
    match (from, action) {
        (KickoffStatus::Pending, KickoffAction::Accept) => Ok(KickoffStatus::Converted),
        (KickoffStatus::Pending, KickoffAction::Reject) => Ok(KickoffStatus::Rejected),
        (KickoffStatus::Pending, KickoffAction::Return) => Ok(KickoffStatus::Returned),
        (KickoffStatus::Returned, KickoffAction::Resubmit) => Ok(KickoffStatus::Pending),
        (KickoffStatus::Returned, _) => Err(ApiError::InvalidState(
            "returned request must be resubmitted first".to_string(),
        )),
        (KickoffStatus::Pending, KickoffAction::Resubmit) => Err(ApiError::InvalidState(
            "only returned requests can be resubmitted".to_string(),
        )),
        _ => Err(ApiError::InvalidState(
            "transition not allowed from current state".to_string(),
        )),
    }
}

/// Aggregate the deployment roster into per-role headcounts, preserving
/// first-appearance order.
pub fn staffing_requirements(roster: &[TeamDeployment]) -> Vec<StaffingRequirement> {
    let mut out: Vec<StaffingRequirement> = Vec::new();
    for line in roster {
        match out.iter_mut().find(|r| r.role == line.role) {
            Some(existing) => existing.headcount += 1,
            None => out.push(StaffingRequirement {
                role: line.role.clone(),
                headcount: 1,
            }),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffingRequirement {
    pub role: String,
    pub headcount: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = kickoff_requests)]
pub struct KickoffRequest {
    pub id: Uuid,
    pub request_number: String,
    pub agreement_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub status: KickoffStatus,
    pub return_reason: Option<String>,
    pub rejected_reason: Option<String>,
    pub meeting_frequency: Option<String>,
    pub project_tenure_months: Option<i32>,
    pub team_deployment: serde_json::Value,
    pub project_manager_id: Option<Uuid>,
    pub requested_by: Uuid,
    pub reviewed_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateKickoffRequest {
    pub agreement_id: Uuid,
    pub project_manager_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReasonParams {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnRequest {
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListKickoffQuery {
    pub status: Option<KickoffStatus>,
}

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub id: Uuid,
    pub status: KickoffStatus,
    pub project_id: Uuid,
    pub project: Project,
    pub hr_notified: usize,
    pub staffing_requirements: Vec<StaffingRequirement>,
}

fn generate_request_number(conn: &mut PgConnection) -> String {
    let count: i64 = kickoff_requests::table
        .count()
        .get_result(conn)
        .unwrap_or(0);
    format!("KO-{:06}", count + 1)
}

pub async fn create_kickoff(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateKickoffRequest>,
) -> Result<Json<KickoffRequest>, ApiError> {
    if !user.capabilities().can_submit_kickoff {
        return Err(ApiError::Forbidden(
            "role may not request a kickoff".to_string(),
        ));
    }

    let mut conn = state.conn.get()?;

    let kickoff = conn.transaction::<KickoffRequest, ApiError, _>(|conn| {
        let agreement: (Uuid, AgreementStatus, Option<String>, Option<i32>, serde_json::Value) =
            agreements::table
                .filter(agreements::id.eq(req.agreement_id))
                .select((
                    agreements::lead_id,
                    agreements::status,
                    agreements::meeting_frequency,
                    agreements::project_tenure_months,
                    agreements::team_deployment,
                ))
                .first(conn)
                .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;
        let (lead_id, status, meeting_frequency, tenure, team_deployment) = agreement;

        if status < AgreementStatus::Approved {
            return Err(ApiError::InvalidState(
                "agreement is not approved".to_string(),
            ));
        }

        let decision = check_agreement_eligibility(conn, req.agreement_id)?;
        if !decision.is_eligible {
            return Err(ApiError::Validation(
                "first installment payment is not verified for this agreement".to_string(),
            ));
        }

        let active_exists: bool = diesel::select(diesel::dsl::exists(
            kickoff_requests::table
                .filter(kickoff_requests::agreement_id.eq(req.agreement_id))
                .filter(
                    kickoff_requests::status
                        .eq(KickoffStatus::Pending)
                        .or(kickoff_requests::status.eq(KickoffStatus::Returned)),
                ),
        ))
        .get_result(conn)?;
        if active_exists {
            return Err(ApiError::Conflict(
                "an active kickoff request already exists for this agreement".to_string(),
            ));
        }

        let now = Utc::now();
        let kickoff = KickoffRequest {
            id: Uuid::new_v4(),
            request_number: generate_request_number(conn),
            agreement_id: req.agreement_id,
            lead_id: Some(lead_id),
            project_id: None,
            status: KickoffStatus::Pending,
            return_reason: None,
            rejected_reason: None,
            meeting_frequency,
            project_tenure_months: tenure,
            team_deployment,
            project_manager_id: req.project_manager_id,
            requested_by: user.user_id,
            reviewed_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        // The partial unique index on active requests decides races the
        // exists-check above cannot see.
        diesel::insert_into(kickoff_requests::table)
            .values(&kickoff)
            .execute(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => ApiError::Conflict(
                    "an active kickoff request already exists for this agreement".to_string(),
                ),
                other => other.into(),
            })?;

        stage::advance(conn, lead_id, PipelineStage::Kickoff)?;
        Ok(kickoff)
    })?;

    let reviewers = crate::directory::user_ids_with_role(&mut conn, UserRole::ProjectManager)
        .unwrap_or_default();
    notifications::notify(
        &mut conn,
        &reviewers,
        "kickoff_submitted",
        "Kickoff request pending review",
        &format!("Kickoff {} awaits review", kickoff.request_number),
        Some(kickoff.id),
        PRIORITY_NORMAL,
    );

    Ok(Json(kickoff))
}

pub async fn list_kickoffs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListKickoffQuery>,
) -> Result<Json<Vec<KickoffRequest>>, ApiError> {
    let mut conn = state.conn.get()?;
    let mut q = kickoff_requests::table.into_boxed();

    // Sales actors see their own requests (with return reasons); reviewers
    // see the whole queue.
    if !user.capabilities().can_review_kickoff {
        q = q.filter(kickoff_requests::requested_by.eq(user.user_id));
    }
    if let Some(status) = query.status {
        q = q.filter(kickoff_requests::status.eq(status));
    }

    let rows: Vec<KickoffRequest> = q
        .order(kickoff_requests::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn get_kickoff(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<KickoffRequest>, ApiError> {
    let mut conn = state.conn.get()?;
    let kickoff: KickoffRequest = kickoff_requests::table
        .filter(kickoff_requests::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("kickoff request not found".to_string()))?;

    if !user.capabilities().can_review_kickoff && kickoff.requested_by != user.user_id {
        return Err(ApiError::Forbidden(
            "not your kickoff request".to_string(),
        ));
    }
    Ok(Json(kickoff))
}

pub async fn accept_kickoff(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<AcceptResponse>, ApiError> {
    if !user.capabilities().can_review_kickoff {
        return Err(ApiError::Forbidden(
            "role may not accept kickoff requests".to_string(),
        ));
    }

    let mut conn = state.conn.get()?;

    let (kickoff, project) = conn.transaction::<(KickoffRequest, Project), ApiError, _>(|conn| {
        let kickoff: KickoffRequest = kickoff_requests::table
            .filter(kickoff_requests::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("kickoff request not found".to_string()))?;

        check_transition(kickoff.status, KickoffAction::Accept)?;

        let project = projects::create_from_kickoff(conn, &kickoff, user.user_id)?;

        if let Some(sow_id) = sow::freeze_for_agreement(conn, kickoff.agreement_id, user.user_id)?
        {
            info!("kickoff {} froze sow {}", kickoff.id, sow_id);
        }

        let updated: KickoffRequest =
            diesel::update(kickoff_requests::table.filter(kickoff_requests::id.eq(id)))
                .set((
                    kickoff_requests::status.eq(KickoffStatus::Converted),
                    kickoff_requests::project_id.eq(Some(project.id)),
                    kickoff_requests::reviewed_by.eq(Some(user.user_id)),
                    kickoff_requests::resolved_at.eq(Some(Utc::now())),
                    kickoff_requests::updated_at.eq(Utc::now()),
                ))
                .get_result(conn)?;

        if let Some(lead_id) = updated.lead_id {
            stage::advance(conn, lead_id, PipelineStage::Closed)?;
        }
        Ok((updated, project))
    })?;

    // Post-commit fan-out: best-effort by contract.
    let roster = parse_team_deployment(&kickoff.team_deployment)?;
    let requirements = staffing_requirements(&roster);
    let hr_ids =
        crate::directory::user_ids_with_role(&mut conn, UserRole::HrManager).unwrap_or_default();
    let hr_notified = notifications::notify(
        &mut conn,
        &hr_ids,
        "kickoff_converted",
        "New project staffing required",
        &format!(
            "Project {} needs staffing for {} role(s)",
            project.name,
            requirements.len()
        ),
        Some(project.id),
        PRIORITY_HIGH,
    );
    notifications::notify(
        &mut conn,
        &[kickoff.requested_by],
        "kickoff_converted",
        "Kickoff accepted",
        &format!("Kickoff {} was converted to a project", kickoff.request_number),
        Some(kickoff.id),
        PRIORITY_NORMAL,
    );

    Ok(Json(AcceptResponse {
        id: kickoff.id,
        status: kickoff.status,
        project_id: project.id,
        project,
        hr_notified,
        staffing_requirements: requirements,
    }))
}

pub async fn reject_kickoff(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Query(params): Query<ReasonParams>,
    body: Option<Json<ReasonParams>>,
) -> Result<Json<KickoffRequest>, ApiError> {
    if !user.capabilities().can_review_kickoff {
        return Err(ApiError::Forbidden(
            "role may not reject kickoff requests".to_string(),
        ));
    }

    let reason = params
        .reason
        .or_else(|| body.and_then(|Json(b)| b.reason))
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("rejection reason is required".to_string()))?;

    let mut conn = state.conn.get()?;

    let kickoff = conn.transaction::<KickoffRequest, ApiError, _>(|conn| {
        let kickoff: KickoffRequest = kickoff_requests::table
            .filter(kickoff_requests::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("kickoff request not found".to_string()))?;

        let next = check_transition(kickoff.status, KickoffAction::Reject)?;

        let updated: KickoffRequest =
            diesel::update(kickoff_requests::table.filter(kickoff_requests::id.eq(id)))
                .set((
                    kickoff_requests::status.eq(next),
                    kickoff_requests::rejected_reason.eq(Some(reason.clone())),
                    kickoff_requests::reviewed_by.eq(Some(user.user_id)),
                    kickoff_requests::resolved_at.eq(Some(Utc::now())),
                    kickoff_requests::updated_at.eq(Utc::now()),
                ))
                .get_result(conn)?;
        Ok(updated)
    })?;

    notifications::notify(
        &mut conn,
        &[kickoff.requested_by],
        "kickoff_rejected",
        "Kickoff rejected",
        &format!("Kickoff {} was rejected: {}", kickoff.request_number, reason),
        Some(kickoff.id),
        PRIORITY_NORMAL,
    );

    Ok(Json(kickoff))
}

pub async fn return_kickoff(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReturnRequest>,
) -> Result<Json<KickoffRequest>, ApiError> {
    if !user.capabilities().can_review_kickoff {
        return Err(ApiError::Forbidden(
            "role may not return kickoff requests".to_string(),
        ));
    }
    if req.reason.trim().is_empty() {
        return Err(ApiError::Validation(
            "return reason is required".to_string(),
        ));
    }

    let mut conn = state.conn.get()?;

    let kickoff = conn.transaction::<KickoffRequest, ApiError, _>(|conn| {
        let kickoff: KickoffRequest = kickoff_requests::table
            .filter(kickoff_requests::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("kickoff request not found".to_string()))?;

        let next = check_transition(kickoff.status, KickoffAction::Return)?;

        let reason = match req.notes.as_deref() {
            Some(notes) if !notes.trim().is_empty() => format!("{} ({})", req.reason, notes),
            _ => req.reason.clone(),
        };
        let updated: KickoffRequest =
            diesel::update(kickoff_requests::table.filter(kickoff_requests::id.eq(id)))
                .set((
                    kickoff_requests::status.eq(next),
                    kickoff_requests::return_reason.eq(Some(reason)),
                    kickoff_requests::reviewed_by.eq(Some(user.user_id)),
                    kickoff_requests::updated_at.eq(Utc::now()),
                ))
                .get_result(conn)?;
        Ok(updated)
    })?;

    notifications::notify(
        &mut conn,
        &[kickoff.requested_by],
        "kickoff_returned",
        "Kickoff returned for changes",
        &format!(
            "Kickoff {} was returned: {}",
            kickoff.request_number,
            kickoff.return_reason.as_deref().unwrap_or("")
        ),
        Some(kickoff.id),
        PRIORITY_NORMAL,
    );

    Ok(Json(kickoff))
}

pub async fn resubmit_kickoff(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<KickoffRequest>, ApiError> {
    let mut conn = state.conn.get()?;

    let kickoff = conn.transaction::<KickoffRequest, ApiError, _>(|conn| {
        let kickoff: KickoffRequest = kickoff_requests::table
            .filter(kickoff_requests::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("kickoff request not found".to_string()))?;

        // Only the original requester may resubmit; admin can step in.
        if kickoff.requested_by != user.user_id && !user.is_admin() {
            return Err(ApiError::Forbidden(
                "only the original requester may resubmit".to_string(),
            ));
        }

        let next = check_transition(kickoff.status, KickoffAction::Resubmit)?;

        // The return reason stays on the record as history.
        let updated: KickoffRequest =
            diesel::update(kickoff_requests::table.filter(kickoff_requests::id.eq(id)))
                .set((
                    kickoff_requests::status.eq(next),
                    kickoff_requests::updated_at.eq(Utc::now()),
                ))
                .get_result(conn)?;
        Ok(updated)
    })?;

    let reviewers = crate::directory::user_ids_with_role(&mut conn, UserRole::ProjectManager)
        .unwrap_or_default();
    notifications::notify(
        &mut conn,
        &reviewers,
        "kickoff_resubmitted",
        "Kickoff resubmitted",
        &format!("Kickoff {} is pending again", kickoff.request_number),
        Some(kickoff.id),
        PRIORITY_NORMAL,
    );

    Ok(Json(kickoff))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sales-funnel/request-kickoff", post(create_kickoff))
        .route("/sales-funnel/approve-kickoff/:id", post(accept_kickoff))
        .route("/sales-funnel/reject-kickoff/:id", post(reject_kickoff))
        .route("/kickoff-requests", get(list_kickoffs))
        .route("/kickoff-requests/:id", get(get_kickoff))
        .route("/kickoff-requests/:id/return", post(return_kickoff))
        .route("/kickoff-requests/:id/resubmit", post(resubmit_kickoff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_accepts_review_actions() {
        assert_eq!(
            check_transition(KickoffStatus::Pending, KickoffAction::Accept).unwrap(),
            KickoffStatus::Converted
        );
        assert_eq!(
            check_transition(KickoffStatus::Pending, KickoffAction::Reject).unwrap(),
            KickoffStatus::Rejected
        );
        assert_eq!(
            check_transition(KickoffStatus::Pending, KickoffAction::Return).unwrap(),
            KickoffStatus::Returned
        );
    }

    #[test]
    fn resubmit_only_from_returned() {
        assert_eq!(
            check_transition(KickoffStatus::Returned, KickoffAction::Resubmit).unwrap(),
            KickoffStatus::Pending
        );
        for from in [
            KickoffStatus::Pending,
            KickoffStatus::Converted,
            KickoffStatus::Rejected,
        ] {
            let err = check_transition(from, KickoffAction::Resubmit).unwrap_err();
            assert!(matches!(err, ApiError::InvalidState(_)));
        }
    }

    #[test]
    fn returned_requests_must_go_back_through_pending() {
        for action in [KickoffAction::Accept, KickoffAction::Reject, KickoffAction::Return] {
            let err = check_transition(KickoffStatus::Returned, action).unwrap_err();
            assert!(matches!(err, ApiError::InvalidState(_)));
        }
    }

    #[test]
    fn terminal_states_answer_already_processed() {
        for from in [KickoffStatus::Converted, KickoffStatus::Rejected] {
            for action in [
                KickoffAction::Accept,
                KickoffAction::Reject,
                KickoffAction::Return,
                KickoffAction::Resubmit,
            ] {
                let err = check_transition(from, action).unwrap_err();
                assert!(matches!(err, ApiError::InvalidState(_)));
                assert!(err.detail().contains("already"));
            }
        }
    }

    fn deployment(role: &str) -> TeamDeployment {
        TeamDeployment {
            role: role.to_string(),
            meeting_type: "weekly_review".to_string(),
            frequency: "weekly".to_string(),
            mode: "remote".to_string(),
        }
    }

    #[test]
    fn staffing_requirements_group_by_role() {
        let roster = vec![
            deployment("recruiter"),
            deployment("trainer"),
            deployment("recruiter"),
            deployment("hr_ops"),
        ];
        let reqs = staffing_requirements(&roster);
        assert_eq!(
            reqs,
            vec![
                StaffingRequirement {
                    role: "recruiter".to_string(),
                    headcount: 2
                },
                StaffingRequirement {
                    role: "trainer".to_string(),
                    headcount: 1
                },
                StaffingRequirement {
                    role: "hr_ops".to_string(),
                    headcount: 1
                },
            ]
        );
    }

    #[test]
    fn empty_roster_yields_no_requirements() {
        assert!(staffing_requirements(&[]).is_empty());
    }
}
