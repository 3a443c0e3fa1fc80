//! Generic approval gate.
//!
//! An entity (pricing plan, CTC record, agreement) is submitted with a role
//! allow-list and a quorum; qualifying approvers vote until the quorum is
//! reached or a single rejection finalizes the request. Resolution flips
//! the owning entity's status; it activates, it never recomputes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::shared::enums::{
    AgreementStatus, ApprovalEntity, ApprovalStatus, PlanStatus, UserRole,
};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{agreements, approval_requests, approval_votes, pricing_plans};
use crate::core::shared::state::AppState;
use crate::notifications::{self, PRIORITY_NORMAL};
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = approval_requests)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub entity_type: ApprovalEntity,
    pub entity_id: Uuid,
    pub requested_by: Uuid,
    pub allowed_roles: Vec<i16>,
    pub required_approvers: i32,
    pub approvals_count: i32,
    pub status: ApprovalStatus,
    pub rejected_reason: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn allows_role(&self, role: UserRole) -> bool {
        self.allowed_roles.contains(&(role as i16))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = approval_votes)]
pub struct ApprovalVote {
    pub id: Uuid,
    pub request_id: Uuid,
    pub approver_id: Uuid,
    pub approver_role: UserRole,
    pub approved: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

/// Pure vote arithmetic. Terminal requests answer "already processed";
/// rejection demands a reason; approval increments and compares against the
/// quorum in one step.
pub fn apply_vote(
    status: ApprovalStatus,
    approvals_count: i32,
    required_approvers: i32,
    approve: bool,
    reason: Option<&str>,
) -> Result<(ApprovalStatus, i32), ApiError> {
    if status.is_terminal() {
        return Err(ApiError::InvalidState(
            "approval request already processed".to_string(),
        ));
    }
    if !approve {
        match reason {
            Some(r) if !r.trim().is_empty() => {}
            _ => {
                return Err(ApiError::Validation(
                    "rejection reason is required".to_string(),
                ))
            }
        }
        return Ok((ApprovalStatus::Rejected, approvals_count));
    }
    let count = approvals_count + 1;
    if count >= required_approvers {
        Ok((ApprovalStatus::Approved, count))
    } else {
        Ok((ApprovalStatus::Pending, count))
    }
}

/// Open an approval request for an entity. Called from the owning module's
/// submit operation, inside that operation's transaction.
pub fn submit(
    conn: &mut PgConnection,
    entity_type: ApprovalEntity,
    entity_id: Uuid,
    requested_by: Uuid,
    allowed_roles: &[UserRole],
    required_approvers: i32,
) -> Result<ApprovalRequest, ApiError> {
    if required_approvers < 1 {
        return Err(ApiError::Validation(
            "required_approvers must be at least 1".to_string(),
        ));
    }

    let already_open: bool = diesel::select(diesel::dsl::exists(
        approval_requests::table
            .filter(approval_requests::entity_type.eq(entity_type))
            .filter(approval_requests::entity_id.eq(entity_id))
            .filter(approval_requests::status.eq(ApprovalStatus::Pending)),
    ))
    .get_result(conn)?;
    if already_open {
        return Err(ApiError::Conflict(
            "an approval request is already pending for this entity".to_string(),
        ));
    }

    let now = Utc::now();
    let request = ApprovalRequest {
        id: Uuid::new_v4(),
        entity_type,
        entity_id,
        requested_by,
        allowed_roles: allowed_roles.iter().map(|r| *r as i16).collect(),
        required_approvers,
        approvals_count: 0,
        status: ApprovalStatus::Pending,
        rejected_reason: None,
        resolved_at: None,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(approval_requests::table)
        .values(&request)
        .execute(conn)?;

    let mut recipients = Vec::new();
    for role in allowed_roles {
        recipients.extend(crate::directory::user_ids_with_role(conn, *role)?);
    }
    notifications::notify(
        conn,
        &recipients,
        "approval_submitted",
        &format!("{} awaiting approval", request.entity_type),
        &format!(
            "A {} requires {} approval(s)",
            request.entity_type, required_approvers
        ),
        Some(request.id),
        PRIORITY_NORMAL,
    );

    info!(
        "approval request {} opened for {} {}",
        request.id, request.entity_type, entity_id
    );
    Ok(request)
}

/// Flip the gated entity's own status once the request resolves. CTC
/// records live in the payroll engine; for those only the requester is
/// notified and the engine picks the verdict up from the request row.
fn finalize_entity(
    conn: &mut PgConnection,
    request: &ApprovalRequest,
    approved: bool,
) -> Result<(), ApiError> {
    match request.entity_type {
        ApprovalEntity::PricingPlan => {
            let status = if approved {
                PlanStatus::Approved
            } else {
                PlanStatus::Rejected
            };
            diesel::update(pricing_plans::table.filter(pricing_plans::id.eq(request.entity_id)))
                .set((
                    pricing_plans::status.eq(status),
                    pricing_plans::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
        }
        ApprovalEntity::Agreement => {
            if approved {
                diesel::update(agreements::table.filter(agreements::id.eq(request.entity_id)))
                    .set((
                        agreements::status.eq(AgreementStatus::Approved),
                        agreements::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
            }
        }
        ApprovalEntity::Ctc => {}
    }
    Ok(())
}

fn cast_vote(
    state: &AppState,
    request_id: Uuid,
    user: &AuthenticatedUser,
    approve: bool,
    reason: Option<String>,
) -> Result<ApprovalRequest, ApiError> {
    let mut conn = state.conn.get()?;

    let request = conn.transaction::<ApprovalRequest, ApiError, _>(|conn| {
        let request: ApprovalRequest = approval_requests::table
            .filter(approval_requests::id.eq(request_id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("approval request not found".to_string()))?;

        if !user.capabilities().can_approve || !request.allows_role(user.role) {
            return Err(ApiError::Forbidden(
                "role is not on the approval allow-list".to_string(),
            ));
        }
        if request.requested_by == user.user_id {
            return Err(ApiError::Forbidden(
                "requester may not approve their own request".to_string(),
            ));
        }

        let (new_status, new_count) = apply_vote(
            request.status,
            request.approvals_count,
            request.required_approvers,
            approve,
            reason.as_deref(),
        )?;

        let vote = ApprovalVote {
            id: Uuid::new_v4(),
            request_id,
            approver_id: user.user_id,
            approver_role: user.role,
            approved: approve,
            reason: reason.clone(),
            created_at: Utc::now(),
        };
        diesel::insert_into(approval_votes::table)
            .values(&vote)
            .execute(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => ApiError::Conflict("approver already voted on this request".to_string()),
                other => other.into(),
            })?;

        let resolved = new_status.is_terminal();
        let updated: ApprovalRequest =
            diesel::update(approval_requests::table.filter(approval_requests::id.eq(request_id)))
                .set((
                    approval_requests::status.eq(new_status),
                    approval_requests::approvals_count.eq(new_count),
                    approval_requests::rejected_reason
                        .eq(if approve { None } else { reason.clone() }),
                    approval_requests::resolved_at
                        .eq(if resolved { Some(Utc::now()) } else { None }),
                    approval_requests::updated_at.eq(Utc::now()),
                ))
                .get_result(conn)?;

        if resolved {
            finalize_entity(conn, &updated, new_status == ApprovalStatus::Approved)?;
        }
        Ok(updated)
    })?;

    if request.status.is_terminal() {
        let verdict = if request.status == ApprovalStatus::Approved {
            "approved"
        } else {
            "rejected"
        };
        notifications::notify(
            &mut conn,
            &[request.requested_by],
            "approval_resolved",
            &format!("{} {}", request.entity_type, verdict),
            &format!("Your {} request was {}", request.entity_type, verdict),
            Some(request.id),
            PRIORITY_NORMAL,
        );
    }

    Ok(request)
}

/// Vote addressed by entity instead of request id (the `/ctc` compat
/// surface). The latest request for the entity is used, so a vote on an
/// already-resolved entity reports "already processed" rather than 404.
pub(crate) fn vote_on_entity(
    state: &AppState,
    entity_type: ApprovalEntity,
    entity_id: Uuid,
    user: &AuthenticatedUser,
    approve: bool,
    reason: Option<String>,
) -> Result<ApprovalRequest, ApiError> {
    let mut conn = state.conn.get()?;
    let request_id: Uuid = approval_requests::table
        .filter(approval_requests::entity_type.eq(entity_type))
        .filter(approval_requests::entity_id.eq(entity_id))
        .order(approval_requests::created_at.desc())
        .select(approval_requests::id)
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("no approval request for this entity".to_string()))?;
    cast_vote(state, request_id, user, approve, reason)
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let request = cast_vote(&state, id, &user, true, None)?;
    Ok(Json(request))
}

pub async fn reject(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let request = cast_vote(&state, id, &user, false, req.reason)?;
    Ok(Json(request))
}

/// Pending requests the caller is allowed to act on.
pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    let mut conn = state.conn.get()?;
    let rows: Vec<ApprovalRequest> = approval_requests::table
        .filter(approval_requests::status.eq(ApprovalStatus::Pending))
        .order(approval_requests::created_at.asc())
        .load(&mut conn)?;
    let actionable = rows
        .into_iter()
        .filter(|r| r.allows_role(user.role))
        .collect();
    Ok(Json(actionable))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/approvals/pending", get(list_pending))
        .route("/approvals/:id/approve", post(approve))
        .route("/approvals/:id/reject", post(reject))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_of_two_needs_two_votes() {
        let (status, count) =
            apply_vote(ApprovalStatus::Pending, 0, 2, true, None).unwrap();
        assert_eq!(status, ApprovalStatus::Pending);
        assert_eq!(count, 1);

        let (status, count) = apply_vote(status, count, 2, true, None).unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
        assert_eq!(count, 2);
    }

    #[test]
    fn single_approver_mode_finalizes_immediately() {
        let (status, count) =
            apply_vote(ApprovalStatus::Pending, 0, 1, true, None).unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
        assert_eq!(count, 1);
    }

    #[test]
    fn rejection_without_reason_is_a_validation_failure() {
        let err = apply_vote(ApprovalStatus::Pending, 0, 2, false, None).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = apply_vote(ApprovalStatus::Pending, 0, 2, false, Some("  ")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn any_rejection_is_terminal() {
        let (status, count) =
            apply_vote(ApprovalStatus::Pending, 1, 2, false, Some("scope unclear")).unwrap();
        assert_eq!(status, ApprovalStatus::Rejected);
        assert_eq!(count, 1);
    }

    #[test]
    fn votes_on_terminal_requests_fail_with_already_processed() {
        for terminal in [ApprovalStatus::Approved, ApprovalStatus::Rejected] {
            let err = apply_vote(terminal, 2, 2, true, None).unwrap_err();
            assert!(matches!(err, ApiError::InvalidState(_)));
            assert!(err.detail().contains("already"));

            let err = apply_vote(terminal, 2, 2, false, Some("late")).unwrap_err();
            assert!(matches!(err, ApiError::InvalidState(_)));
        }
    }

    #[test]
    fn allow_list_checks_use_the_role_enum() {
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            entity_type: ApprovalEntity::PricingPlan,
            entity_id: Uuid::new_v4(),
            requested_by: Uuid::new_v4(),
            allowed_roles: vec![UserRole::SalesManager as i16, UserRole::Admin as i16],
            required_approvers: 2,
            approvals_count: 0,
            status: ApprovalStatus::Pending,
            rejected_reason: None,
            resolved_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(request.allows_role(UserRole::Admin));
        assert!(request.allows_role(UserRole::SalesManager));
        assert!(!request.allows_role(UserRole::ProjectManager));
        assert!(!request.allows_role(UserRole::SalesExecutive));
    }
}
