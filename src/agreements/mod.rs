//! Agreements: the signed contract behind a finalized quotation.
//!
//! Lifecycle is draft -> approved (single qualifying approver) -> signed.
//! Payments recorded here feed the eligibility gate that the kickoff
//! workflow consults.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::approvals;
use crate::core::shared::enums::{
    AgreementStatus, ApprovalEntity, PaymentMode, PipelineStage, UserRole,
};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{agreement_payments, agreements, quotations};
use crate::core::shared::state::AppState;
use crate::leads::stage;
use crate::payments::validate_payment_refs;
use crate::security::AuthenticatedUser;

/// Roles that may countersign an agreement.
const AGREEMENT_APPROVER_ROLES: &[UserRole] = &[UserRole::Admin, UserRole::Finance];
const AGREEMENT_QUORUM: i32 = 1;

/// One line of the delivery roster carried from agreement to kickoff to
/// project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDeployment {
    pub role: String,
    pub meeting_type: String,
    pub frequency: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = agreements)]
pub struct Agreement {
    pub id: Uuid,
    pub quotation_id: Uuid,
    pub lead_id: Uuid,
    pub status: AgreementStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub meeting_frequency: Option<String>,
    pub project_tenure_months: Option<i32>,
    pub team_deployment: serde_json::Value,
    pub sow_handover_triggered: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = agreement_payments)]
pub struct AgreementPayment {
    pub id: Uuid,
    pub agreement_id: Uuid,
    pub installment_number: i32,
    pub amount: BigDecimal,
    pub paid_at: DateTime<Utc>,
    pub mode: PaymentMode,
    pub utr_number: Option<String>,
    pub cheque_number: Option<String>,
    pub transaction_id: Option<String>,
    pub recorded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgreementRequest {
    pub quotation_id: Uuid,
    pub meeting_frequency: Option<String>,
    pub project_tenure_months: Option<i32>,
    #[serde(default)]
    pub team_deployment: Vec<TeamDeployment>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub installment_number: i32,
    pub amount: BigDecimal,
    pub paid_at: Option<DateTime<Utc>>,
    pub mode: PaymentMode,
    pub utr_number: Option<String>,
    pub cheque_number: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AgreementDetail {
    pub agreement: Agreement,
    pub payments: Vec<AgreementPayment>,
    pub total_paid: BigDecimal,
}

pub fn parse_team_deployment(
    value: &serde_json::Value,
) -> Result<Vec<TeamDeployment>, ApiError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ApiError::Internal(format!("malformed team deployment: {e}")))
}

pub async fn create_agreement(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateAgreementRequest>,
) -> Result<Json<Agreement>, ApiError> {
    let mut conn = state.conn.get()?;

    let agreement = conn.transaction::<Agreement, ApiError, _>(|conn| {
        let (lead_id, is_final): (Uuid, bool) = quotations::table
            .filter(quotations::id.eq(req.quotation_id))
            .select((quotations::lead_id, quotations::is_final))
            .first(conn)
            .map_err(|_| ApiError::NotFound("quotation not found".to_string()))?;
        if !is_final {
            return Err(ApiError::InvalidState(
                "quotation is not finalized".to_string(),
            ));
        }

        let now = Utc::now();
        let agreement = Agreement {
            id: Uuid::new_v4(),
            quotation_id: req.quotation_id,
            lead_id,
            status: AgreementStatus::Draft,
            signed_at: None,
            meeting_frequency: req.meeting_frequency,
            project_tenure_months: req.project_tenure_months,
            team_deployment: serde_json::to_value(&req.team_deployment)
                .map_err(|e| ApiError::Internal(format!("team deployment: {e}")))?,
            sow_handover_triggered: false,
            created_by: user.user_id,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(agreements::table)
            .values(&agreement)
            .execute(conn)?;

        stage::advance(conn, lead_id, PipelineStage::Agreement)?;
        Ok(agreement)
    })?;

    Ok(Json(agreement))
}

pub async fn get_agreement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AgreementDetail>, ApiError> {
    let mut conn = state.conn.get()?;
    let agreement: Agreement = agreements::table
        .filter(agreements::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;

    let payments: Vec<AgreementPayment> = agreement_payments::table
        .filter(agreement_payments::agreement_id.eq(id))
        .order(agreement_payments::installment_number.asc())
        .load(&mut conn)?;

    let total_paid = payments
        .iter()
        .fold(BigDecimal::zero(), |acc, p| acc + p.amount.clone());

    Ok(Json(AgreementDetail {
        agreement,
        payments,
        total_paid,
    }))
}

/// Single-approver sign-off through the generic gate.
pub async fn submit_agreement(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<approvals::ApprovalRequest>, ApiError> {
    let mut conn = state.conn.get()?;

    let request = conn.transaction::<approvals::ApprovalRequest, ApiError, _>(|conn| {
        let status: AgreementStatus = agreements::table
            .filter(agreements::id.eq(id))
            .select(agreements::status)
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;
        if status != AgreementStatus::Draft {
            return Err(ApiError::InvalidState(
                "agreement already approved".to_string(),
            ));
        }

        approvals::submit(
            conn,
            ApprovalEntity::Agreement,
            id,
            user.user_id,
            AGREEMENT_APPROVER_ROLES,
            AGREEMENT_QUORUM,
        )
    })?;

    Ok(Json(request))
}

pub async fn sign_agreement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Agreement>, ApiError> {
    let mut conn = state.conn.get()?;

    let agreement = conn.transaction::<Agreement, ApiError, _>(|conn| {
        let agreement: Agreement = agreements::table
            .filter(agreements::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;

        match agreement.status {
            AgreementStatus::Approved => {}
            AgreementStatus::Draft => {
                return Err(ApiError::InvalidState(
                    "agreement is not approved yet".to_string(),
                ))
            }
            AgreementStatus::Signed => {
                return Err(ApiError::InvalidState(
                    "agreement already signed".to_string(),
                ))
            }
        }

        let updated: Agreement = diesel::update(agreements::table.filter(agreements::id.eq(id)))
            .set((
                agreements::status.eq(AgreementStatus::Signed),
                agreements::signed_at.eq(Some(Utc::now())),
                agreements::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        stage::advance(conn, updated.lead_id, PipelineStage::Payment)?;
        Ok(updated)
    })?;

    Ok(Json(agreement))
}

pub async fn record_payment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<Json<AgreementPayment>, ApiError> {
    if req.installment_number < 1 {
        return Err(ApiError::Validation(
            "installment_number must be positive".to_string(),
        ));
    }
    if req.amount <= BigDecimal::zero() {
        return Err(ApiError::Validation(
            "payment amount must be positive".to_string(),
        ));
    }
    validate_payment_refs(
        req.mode,
        req.utr_number.as_deref(),
        req.cheque_number.as_deref(),
        req.transaction_id.as_deref(),
    )?;

    let mut conn = state.conn.get()?;
    let status: AgreementStatus = agreements::table
        .filter(agreements::id.eq(id))
        .select(agreements::status)
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;
    if status != AgreementStatus::Signed {
        return Err(ApiError::InvalidState(
            "agreement is not signed".to_string(),
        ));
    }

    let payment = AgreementPayment {
        id: Uuid::new_v4(),
        agreement_id: id,
        installment_number: req.installment_number,
        amount: req.amount,
        paid_at: req.paid_at.unwrap_or_else(Utc::now),
        mode: req.mode,
        utr_number: req.utr_number,
        cheque_number: req.cheque_number,
        transaction_id: req.transaction_id,
        recorded_by: user.user_id,
        created_at: Utc::now(),
    };
    diesel::insert_into(agreement_payments::table)
        .values(&payment)
        .execute(&mut conn)?;

    Ok(Json(payment))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agreements", post(create_agreement))
        .route("/agreements/:id", get(get_agreement))
        .route("/agreements/:id/submit", post(submit_agreement))
        .route("/agreements/:id/sign", post(sign_agreement))
        .route("/agreements/:id/payments", post(record_payment))
}
