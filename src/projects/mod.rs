//! Delivery projects, created exactly once per accepted kickoff.
//!
//! Contract financials are stripped from payloads for roles without the
//! `can_see_financials` capability; visibility is a flag, not an error.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{agreements, leads, projects, quotations, sows};
use crate::core::shared::state::AppState;
use crate::kickoff::KickoffRequest;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub agreement_id: Uuid,
    pub kickoff_request_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub sow_id: Option<Uuid>,
    pub sow_items: serde_json::Value,
    pub team_deployment: serde_json::Value,
    pub project_manager_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_value: Option<BigDecimal>,
    pub tenure_months: Option<i32>,
    pub meeting_frequency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Apply the caller's financial visibility to the payload.
    pub fn scoped_for(mut self, user: &AuthenticatedUser) -> Self {
        if !user.capabilities().can_see_financials {
            self.contract_value = None;
        }
        self
    }
}

/// Materialize the project an accepted kickoff hands over to delivery.
/// Runs inside the acceptance transaction; inherits the statement of work,
/// the deployment roster and the PM assignment.
pub fn create_from_kickoff(
    conn: &mut PgConnection,
    kickoff: &KickoffRequest,
    reviewer: Uuid,
) -> Result<Project, ApiError> {
    let (quotation_id, lead_id): (Uuid, Uuid) = agreements::table
        .filter(agreements::id.eq(kickoff.agreement_id))
        .select((agreements::quotation_id, agreements::lead_id))
        .first(conn)
        .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;

    let (pricing_plan_id, grand_total): (Uuid, BigDecimal) = quotations::table
        .filter(quotations::id.eq(quotation_id))
        .select((quotations::pricing_plan_id, quotations::grand_total))
        .first(conn)?;

    let sow: Option<(Uuid, serde_json::Value)> = sows::table
        .filter(sows::pricing_plan_id.eq(pricing_plan_id))
        .select((sows::id, sows::items))
        .first(conn)
        .optional()?;
    let (sow_id, sow_items) = match sow {
        Some((id, items)) => (Some(id), items),
        None => (None, serde_json::json!([])),
    };

    let company: String = leads::table
        .filter(leads::id.eq(lead_id))
        .select(leads::company)
        .first(conn)
        .unwrap_or_else(|_| kickoff.request_number.clone());

    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        name: format!("{company} Engagement"),
        agreement_id: kickoff.agreement_id,
        kickoff_request_id: kickoff.id,
        lead_id: kickoff.lead_id,
        sow_id,
        sow_items,
        team_deployment: kickoff.team_deployment.clone(),
        project_manager_id: kickoff.project_manager_id.or(Some(reviewer)),
        contract_value: Some(grand_total),
        tenure_months: kickoff.project_tenure_months,
        meeting_frequency: kickoff.meeting_frequency.clone(),
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(projects::table)
        .values(&project)
        .execute(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => ApiError::Conflict(
                "a project already exists for this kickoff request".to_string(),
            ),
            other => other.into(),
        })?;

    info!("project {} materialized from kickoff {}", project.id, kickoff.id);
    Ok(project)
}

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Project>>, ApiError> {
    let mut conn = state.conn.get()?;
    let rows: Vec<Project> = projects::table
        .order(projects::created_at.desc())
        .load(&mut conn)?;
    let scoped = rows.into_iter().map(|p| p.scoped_for(&user)).collect();
    Ok(Json(scoped))
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, ApiError> {
    let mut conn = state.conn.get()?;
    let project: Project = projects::table
        .filter(projects::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("project not found".to_string()))?;
    Ok(Json(project.scoped_for(&user)))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects", get(list_projects))
        .route("/projects/:id", get(get_project))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::enums::UserRole;
    use std::str::FromStr;

    fn project() -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "Acme Engagement".to_string(),
            agreement_id: Uuid::new_v4(),
            kickoff_request_id: Uuid::new_v4(),
            lead_id: None,
            sow_id: None,
            sow_items: serde_json::json!([]),
            team_deployment: serde_json::json!([]),
            project_manager_id: None,
            contract_value: Some(BigDecimal::from_str("136000").unwrap()),
            tenure_months: Some(12),
            meeting_frequency: Some("weekly".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn user(role: UserRole) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn project_manager_payloads_carry_no_financials() {
        let scoped = project().scoped_for(&user(UserRole::ProjectManager));
        assert!(scoped.contract_value.is_none());
        let scoped = project().scoped_for(&user(UserRole::SalesExecutive));
        assert!(scoped.contract_value.is_none());
    }

    #[test]
    fn finance_facing_payloads_keep_contract_value() {
        for role in [UserRole::Admin, UserRole::Finance, UserRole::SalesManager] {
            let scoped = project().scoped_for(&user(role));
            assert!(scoped.contract_value.is_some());
        }
    }
}
