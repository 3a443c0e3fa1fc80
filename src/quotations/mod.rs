//! Quotations: the priced offer derived from an approved pricing plan.
//!
//! Totals obey `grand_total = subtotal - discount_amount + gst_amount` at
//! all times; finalizing is one-way and locks the numbers.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::shared::enums::{PipelineStage, PlanStatus};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{pricing_plans, quotations, sows};
use crate::core::shared::state::AppState;
use crate::leads::stage;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = quotations)]
pub struct Quotation {
    pub id: Uuid,
    pub quotation_number: String,
    pub pricing_plan_id: Uuid,
    pub lead_id: Uuid,
    pub subtotal: BigDecimal,
    pub discount_amount: BigDecimal,
    pub gst_amount: BigDecimal,
    pub grand_total: BigDecimal,
    pub is_final: bool,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateQuotationRequest {
    pub pricing_plan_id: Uuid,
    pub subtotal: BigDecimal,
    #[serde(default)]
    pub discount_amount: Option<BigDecimal>,
    #[serde(default)]
    pub gst_amount: Option<BigDecimal>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuotationRequest {
    pub subtotal: Option<BigDecimal>,
    pub discount_amount: Option<BigDecimal>,
    pub gst_amount: Option<BigDecimal>,
}

/// The stored-total formula. Inputs must be non-negative and the discount
/// may not exceed the subtotal.
pub fn compute_grand_total(
    subtotal: &BigDecimal,
    discount_amount: &BigDecimal,
    gst_amount: &BigDecimal,
) -> Result<BigDecimal, ApiError> {
    if subtotal < &BigDecimal::zero()
        || discount_amount < &BigDecimal::zero()
        || gst_amount < &BigDecimal::zero()
    {
        return Err(ApiError::Validation(
            "quotation amounts must be non-negative".to_string(),
        ));
    }
    if discount_amount > subtotal {
        return Err(ApiError::Validation(
            "discount exceeds subtotal".to_string(),
        ));
    }
    Ok(subtotal - discount_amount + gst_amount)
}

fn generate_quotation_number(conn: &mut PgConnection) -> String {
    let count: i64 = quotations::table.count().get_result(conn).unwrap_or(0);
    format!("QUO-{:06}", count + 1)
}

pub async fn create_quotation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateQuotationRequest>,
) -> Result<Json<Quotation>, ApiError> {
    let mut conn = state.conn.get()?;

    let quotation = conn.transaction::<Quotation, ApiError, _>(|conn| {
        let (lead_id, status): (Uuid, PlanStatus) = pricing_plans::table
            .filter(pricing_plans::id.eq(req.pricing_plan_id))
            .select((pricing_plans::lead_id, pricing_plans::status))
            .first(conn)
            .map_err(|_| ApiError::NotFound("pricing plan not found".to_string()))?;
        if status != PlanStatus::Approved {
            return Err(ApiError::InvalidState(
                "pricing plan is not approved".to_string(),
            ));
        }

        let has_sow: bool = diesel::select(diesel::dsl::exists(
            sows::table.filter(sows::pricing_plan_id.eq(req.pricing_plan_id)),
        ))
        .get_result(conn)?;
        if !has_sow {
            return Err(ApiError::InvalidState(
                "no statement of work exists for this pricing plan".to_string(),
            ));
        }

        let discount = req.discount_amount.unwrap_or_else(BigDecimal::zero);
        let gst = req.gst_amount.unwrap_or_else(BigDecimal::zero);
        let grand_total = compute_grand_total(&req.subtotal, &discount, &gst)?;

        let now = Utc::now();
        let quotation = Quotation {
            id: Uuid::new_v4(),
            quotation_number: generate_quotation_number(conn),
            pricing_plan_id: req.pricing_plan_id,
            lead_id,
            subtotal: req.subtotal,
            discount_amount: discount,
            gst_amount: gst,
            grand_total,
            is_final: false,
            finalized_at: None,
            created_by: user.user_id,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(quotations::table)
            .values(&quotation)
            .execute(conn)?;

        stage::advance(conn, lead_id, PipelineStage::Quotation)?;
        Ok(quotation)
    })?;

    Ok(Json(quotation))
}

pub async fn get_quotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Quotation>, ApiError> {
    let mut conn = state.conn.get()?;
    let quotation: Quotation = quotations::table
        .filter(quotations::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("quotation not found".to_string()))?;
    Ok(Json(quotation))
}

pub async fn update_quotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateQuotationRequest>,
) -> Result<Json<Quotation>, ApiError> {
    let mut conn = state.conn.get()?;

    let quotation = conn.transaction::<Quotation, ApiError, _>(|conn| {
        let quotation: Quotation = quotations::table
            .filter(quotations::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("quotation not found".to_string()))?;

        if quotation.is_final {
            return Err(ApiError::InvalidState(
                "quotation is final, numbers are locked".to_string(),
            ));
        }

        let subtotal = req.subtotal.unwrap_or(quotation.subtotal);
        let discount = req.discount_amount.unwrap_or(quotation.discount_amount);
        let gst = req.gst_amount.unwrap_or(quotation.gst_amount);
        let grand_total = compute_grand_total(&subtotal, &discount, &gst)?;

        let updated: Quotation = diesel::update(quotations::table.filter(quotations::id.eq(id)))
            .set((
                quotations::subtotal.eq(subtotal),
                quotations::discount_amount.eq(discount),
                quotations::gst_amount.eq(gst),
                quotations::grand_total.eq(grand_total),
                quotations::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;
        Ok(updated)
    })?;

    Ok(Json(quotation))
}

pub async fn finalize_quotation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Quotation>, ApiError> {
    let mut conn = state.conn.get()?;

    let quotation = conn.transaction::<Quotation, ApiError, _>(|conn| {
        let quotation: Quotation = quotations::table
            .filter(quotations::id.eq(id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("quotation not found".to_string()))?;

        if quotation.is_final {
            return Err(ApiError::InvalidState(
                "quotation already finalized".to_string(),
            ));
        }

        let updated: Quotation = diesel::update(quotations::table.filter(quotations::id.eq(id)))
            .set((
                quotations::is_final.eq(true),
                quotations::finalized_at.eq(Some(Utc::now())),
                quotations::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;
        Ok(updated)
    })?;

    Ok(Json(quotation))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/quotations", post(create_quotation))
        .route("/quotations/:id", get(get_quotation).put(update_quotation))
        .route("/quotations/:id/finalize", post(finalize_quotation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn grand_total_follows_the_stored_formula() {
        let total = compute_grand_total(&dec("118000"), &dec("0"), &dec("18000")).unwrap();
        assert_eq!(total, dec("136000"));

        let total = compute_grand_total(&dec("100000"), &dec("10000"), &dec("16200")).unwrap();
        assert_eq!(total, dec("106200"));
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(compute_grand_total(&dec("-1"), &dec("0"), &dec("0")).is_err());
        assert!(compute_grand_total(&dec("100"), &dec("-5"), &dec("0")).is_err());
        assert!(compute_grand_total(&dec("100"), &dec("0"), &dec("-5")).is_err());
    }

    #[test]
    fn discount_may_not_exceed_subtotal() {
        let err = compute_grand_total(&dec("100"), &dec("101"), &dec("0")).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn zero_discount_and_gst_leave_subtotal_untouched() {
        let total = compute_grand_total(&dec("118000"), &dec("0"), &dec("0")).unwrap();
        assert_eq!(total, dec("118000"));
    }
}
