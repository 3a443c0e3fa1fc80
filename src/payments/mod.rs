//! Installment verification and the payment eligibility gate.
//!
//! Verification is idempotent per `(agreement, installment)`: the unique
//! index makes the second attempt fail, and a verified first installment is
//! the signal the kickoff workflow polls before allowing creation.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::shared::enums::{AgreementStatus, PaymentMode};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{agreements, payment_verifications};
use crate::core::shared::state::AppState;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = payment_verifications)]
pub struct PaymentVerification {
    pub id: Uuid,
    pub agreement_id: Uuid,
    pub installment_number: i32,
    pub expected_amount: BigDecimal,
    pub received_amount: BigDecimal,
    pub payment_mode: PaymentMode,
    pub utr_number: Option<String>,
    pub cheque_number: Option<String>,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub verified_by: Uuid,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyInstallmentRequest {
    pub agreement_id: Uuid,
    pub installment_number: i32,
    pub expected_amount: BigDecimal,
    pub received_amount: BigDecimal,
    pub payment_mode: PaymentMode,
    pub utr_number: Option<String>,
    pub cheque_number: Option<String>,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyInstallmentResponse {
    pub payment_id: Uuid,
    pub agreement_id: Uuid,
    pub installment_number: i32,
    pub sow_handover_triggered: bool,
}

#[derive(Debug, Serialize)]
pub struct EligibilityResponse {
    pub agreement_id: Uuid,
    pub is_eligible: bool,
    pub first_installment_verified: bool,
    pub sow_handover_complete: bool,
}

/// Mode-specific reference requirements: a cheque needs its number, bank
/// transfers a UTR, UPI a transaction reference. Cash carries nothing.
pub fn validate_payment_refs(
    mode: PaymentMode,
    utr_number: Option<&str>,
    cheque_number: Option<&str>,
    transaction_id: Option<&str>,
) -> Result<(), ApiError> {
    let missing = |field: &str| {
        Err(ApiError::Validation(format!(
            "{field} is required for this payment mode"
        )))
    };
    let present = |v: Option<&str>| v.map(|s| !s.trim().is_empty()).unwrap_or(false);

    match mode {
        PaymentMode::Cheque if !present(cheque_number) => missing("cheque_number"),
        PaymentMode::BankTransfer if !present(utr_number) => missing("utr_number"),
        PaymentMode::Upi if !present(transaction_id) => missing("transaction_id"),
        _ => Ok(()),
    }
}

/// The eligibility decision: a signed agreement with a verified first
/// installment.
pub fn eligibility(
    status: AgreementStatus,
    first_installment_verified: bool,
    sow_handover_triggered: bool,
) -> EligibilityDecision {
    EligibilityDecision {
        is_eligible: status == AgreementStatus::Signed && first_installment_verified,
        first_installment_verified,
        sow_handover_complete: sow_handover_triggered,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EligibilityDecision {
    pub is_eligible: bool,
    pub first_installment_verified: bool,
    pub sow_handover_complete: bool,
}

pub fn check_agreement_eligibility(
    conn: &mut PgConnection,
    agreement_id: Uuid,
) -> Result<EligibilityDecision, ApiError> {
    let (status, handover): (AgreementStatus, bool) = agreements::table
        .filter(agreements::id.eq(agreement_id))
        .select((agreements::status, agreements::sow_handover_triggered))
        .first(conn)
        .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;

    let first_verified: bool = diesel::select(diesel::dsl::exists(
        payment_verifications::table
            .filter(payment_verifications::agreement_id.eq(agreement_id))
            .filter(payment_verifications::installment_number.eq(1)),
    ))
    .get_result(conn)?;

    Ok(eligibility(status, first_verified, handover))
}

pub async fn check_eligibility(
    State(state): State<Arc<AppState>>,
    Path(agreement_id): Path<Uuid>,
) -> Result<Json<EligibilityResponse>, ApiError> {
    let mut conn = state.conn.get()?;
    let decision = check_agreement_eligibility(&mut conn, agreement_id)?;
    Ok(Json(EligibilityResponse {
        agreement_id,
        is_eligible: decision.is_eligible,
        first_installment_verified: decision.first_installment_verified,
        sow_handover_complete: decision.sow_handover_complete,
    }))
}

pub async fn verify_installment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<VerifyInstallmentRequest>,
) -> Result<Json<VerifyInstallmentResponse>, ApiError> {
    if req.installment_number < 1 {
        return Err(ApiError::Validation(
            "installment_number must be positive".to_string(),
        ));
    }
    if req.received_amount <= BigDecimal::zero() {
        return Err(ApiError::Validation(
            "received_amount must be positive".to_string(),
        ));
    }
    validate_payment_refs(
        req.payment_mode,
        req.utr_number.as_deref(),
        req.cheque_number.as_deref(),
        req.transaction_id.as_deref(),
    )?;

    let mut conn = state.conn.get()?;

    let response = conn.transaction::<VerifyInstallmentResponse, ApiError, _>(|conn| {
        let status: AgreementStatus = agreements::table
            .filter(agreements::id.eq(req.agreement_id))
            .select(agreements::status)
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;
        if status != AgreementStatus::Signed {
            return Err(ApiError::InvalidState(
                "agreement is not signed, payment cannot be verified".to_string(),
            ));
        }

        if req.received_amount != req.expected_amount {
            warn!(
                "installment {} for agreement {}: received {} differs from expected {}",
                req.installment_number, req.agreement_id, req.received_amount, req.expected_amount
            );
        }

        let verification = PaymentVerification {
            id: Uuid::new_v4(),
            agreement_id: req.agreement_id,
            installment_number: req.installment_number,
            expected_amount: req.expected_amount,
            received_amount: req.received_amount,
            payment_mode: req.payment_mode,
            utr_number: req.utr_number,
            cheque_number: req.cheque_number,
            transaction_id: req.transaction_id,
            notes: req.notes,
            verified_by: user.user_id,
            verified_at: Utc::now(),
        };
        diesel::insert_into(payment_verifications::table)
            .values(&verification)
            .execute(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => ApiError::Conflict(format!(
                    "installment {} already verified for this agreement",
                    req.installment_number
                )),
                other => other.into(),
            })?;

        // A verified first installment opens the handover to delivery.
        let mut handover_triggered = false;
        if req.installment_number == 1 {
            diesel::update(agreements::table.filter(agreements::id.eq(req.agreement_id)))
                .set((
                    agreements::sow_handover_triggered.eq(true),
                    agreements::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            handover_triggered = true;
            info!(
                "first installment verified for agreement {}, handover triggered",
                req.agreement_id
            );
        }

        Ok(VerifyInstallmentResponse {
            payment_id: verification.id,
            agreement_id: req.agreement_id,
            installment_number: req.installment_number,
            sow_handover_triggered: handover_triggered,
        })
    })?;

    Ok(Json(response))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/payments/check-eligibility/:agreement_id",
            get(check_eligibility),
        )
        .route("/payments/verify-installment", post(verify_installment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cheque_payments_require_a_cheque_number() {
        let err =
            validate_payment_refs(PaymentMode::Cheque, None, None, None).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(err.detail().contains("cheque_number"));

        assert!(validate_payment_refs(PaymentMode::Cheque, None, Some("000123"), None).is_ok());
    }

    #[test]
    fn bank_transfer_requires_utr() {
        let err =
            validate_payment_refs(PaymentMode::BankTransfer, None, None, Some("tx")).unwrap_err();
        assert!(err.detail().contains("utr_number"));
        assert!(
            validate_payment_refs(PaymentMode::BankTransfer, Some("UTR9001"), None, None).is_ok()
        );
    }

    #[test]
    fn upi_requires_transaction_id() {
        let err = validate_payment_refs(PaymentMode::Upi, None, None, None).unwrap_err();
        assert!(err.detail().contains("transaction_id"));
        assert!(validate_payment_refs(PaymentMode::Upi, None, None, Some("UPI-1")).is_ok());
    }

    #[test]
    fn cash_needs_no_references() {
        assert!(validate_payment_refs(PaymentMode::Cash, None, None, None).is_ok());
    }

    #[test]
    fn eligibility_needs_signature_and_first_installment() {
        assert!(!eligibility(AgreementStatus::Draft, false, false).is_eligible);
        assert!(!eligibility(AgreementStatus::Approved, true, false).is_eligible);
        assert!(!eligibility(AgreementStatus::Signed, false, false).is_eligible);
        let decision = eligibility(AgreementStatus::Signed, true, true);
        assert!(decision.is_eligible);
        assert!(decision.first_installment_verified);
        assert!(decision.sow_handover_complete);
    }
}
