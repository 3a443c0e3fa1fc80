//! Statement of Work: ordered deliverable items with an append-only version
//! history.
//!
//! Exactly one SOW exists per pricing plan. Every successful item mutation
//! bumps `current_version` by one and stores a full snapshot in the same
//! transaction. Once a kickoff meeting is scheduled (or a kickoff request
//! accepted) the document freezes; from then on only an admin may touch it.

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::shared::enums::{Capabilities, PipelineStage, PlanStatus, SowChangeType};
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{agreements, pricing_plans, quotations, sow_versions, sows};
use crate::core::shared::state::AppState;
use crate::leads::stage;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = sows)]
pub struct Sow {
    pub id: Uuid,
    pub pricing_plan_id: Uuid,
    pub lead_id: Uuid,
    pub items: serde_json::Value,
    pub current_version: i32,
    pub is_frozen: bool,
    pub frozen_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = sow_versions)]
pub struct SowVersion {
    pub id: Uuid,
    pub sow_id: Uuid,
    pub version: i32,
    pub changed_by: Uuid,
    pub changed_at: DateTime<Utc>,
    pub change_type: SowChangeType,
    pub items_snapshot: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SowItem {
    pub category: String,
    pub title: String,
    pub deliverables: Vec<String>,
    pub price: BigDecimal,
}

#[derive(Debug, Deserialize)]
pub struct CreateSowRequest {
    pub pricing_plan_id: Uuid,
    #[serde(default)]
    pub items: Vec<SowItem>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub item: SowItem,
}

#[derive(Debug, Serialize)]
pub struct SowWithHistory {
    pub sow: Sow,
    pub version_history: Vec<SowVersion>,
}

/// Frozen documents reject writes unless the caller's role carries the
/// override.
pub fn ensure_writable(is_frozen: bool, caps: &Capabilities) -> Result<(), ApiError> {
    if is_frozen && !caps.can_edit_frozen_sow {
        return Err(ApiError::Forbidden(
            "statement of work is frozen".to_string(),
        ));
    }
    Ok(())
}

pub fn parse_items(value: &serde_json::Value) -> Result<Vec<SowItem>, ApiError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ApiError::Internal(format!("malformed sow items: {e}")))
}

fn items_to_value(items: &[SowItem]) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(items).map_err(|e| ApiError::Internal(format!("sow items: {e}")))
}

fn snapshot(
    conn: &mut PgConnection,
    sow_id: Uuid,
    version: i32,
    changed_by: Uuid,
    change_type: SowChangeType,
    items: &serde_json::Value,
) -> Result<(), ApiError> {
    let row = SowVersion {
        id: Uuid::new_v4(),
        sow_id,
        version,
        changed_by,
        changed_at: Utc::now(),
        change_type,
        items_snapshot: items.clone(),
    };
    diesel::insert_into(sow_versions::table)
        .values(&row)
        .execute(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => ApiError::Conflict("concurrent sow update, retry".to_string()),
            other => other.into(),
        })?;
    Ok(())
}

pub async fn create_sow(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateSowRequest>,
) -> Result<Json<Sow>, ApiError> {
    let mut conn = state.conn.get()?;

    let sow = conn.transaction::<Sow, ApiError, _>(|conn| {
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

        let now = Utc::now();
        let sow = Sow {
            id: Uuid::new_v4(),
            pricing_plan_id: req.pricing_plan_id,
            lead_id,
            items: items_to_value(&req.items)?,
            current_version: 1,
            is_frozen: false,
            frozen_at: None,
            created_by: user.user_id,
            created_at: now,
            updated_at: now,
        };
        diesel::insert_into(sows::table)
            .values(&sow)
            .execute(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => ApiError::Conflict(
                    "a statement of work already exists for this pricing plan".to_string(),
                ),
                other => other.into(),
            })?;

        snapshot(
            conn,
            sow.id,
            1,
            user.user_id,
            SowChangeType::Created,
            &sow.items,
        )?;
        stage::advance(conn, lead_id, PipelineStage::Sow)?;
        Ok(sow)
    })?;

    Ok(Json(sow))
}

pub async fn get_sow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SowWithHistory>, ApiError> {
    let mut conn = state.conn.get()?;
    let sow: Sow = sows::table
        .filter(sows::id.eq(id))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound("sow not found".to_string()))?;
    let version_history: Vec<SowVersion> = sow_versions::table
        .filter(sow_versions::sow_id.eq(id))
        .order(sow_versions::version.asc())
        .load(&mut conn)?;
    Ok(Json(SowWithHistory {
        sow,
        version_history,
    }))
}

fn mutate_items<F>(
    state: &AppState,
    sow_id: Uuid,
    user: &AuthenticatedUser,
    change_type: SowChangeType,
    apply: F,
) -> Result<Sow, ApiError>
where
    F: FnOnce(&mut Vec<SowItem>) -> Result<(), ApiError>,
{
    let mut conn = state.conn.get()?;
    conn.transaction::<Sow, ApiError, _>(|conn| {
        let sow: Sow = sows::table
            .filter(sows::id.eq(sow_id))
            .for_update()
            .first(conn)
            .map_err(|_| ApiError::NotFound("sow not found".to_string()))?;

        ensure_writable(sow.is_frozen, &user.capabilities())?;

        let mut items = parse_items(&sow.items)?;
        apply(&mut items)?;
        let items_value = items_to_value(&items)?;
        let new_version = sow.current_version + 1;

        let updated: Sow = diesel::update(sows::table.filter(sows::id.eq(sow_id)))
            .set((
                sows::items.eq(&items_value),
                sows::current_version.eq(new_version),
                sows::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        snapshot(conn, sow_id, new_version, user.user_id, change_type, &items_value)?;
        Ok(updated)
    })
}

pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(item): Json<SowItem>,
) -> Result<Json<Sow>, ApiError> {
    if item.title.trim().is_empty() {
        return Err(ApiError::Validation("item title is required".to_string()));
    }
    let sow = mutate_items(&state, id, &user, SowChangeType::ItemAdded, |items| {
        items.push(item);
        Ok(())
    })?;
    Ok(Json(sow))
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<Sow>, ApiError> {
    let sow = mutate_items(&state, id, &user, SowChangeType::ItemUpdated, |items| {
        let slot = items.get_mut(index).ok_or_else(|| {
            ApiError::Validation(format!("item index {index} out of range"))
        })?;
        *slot = req.item;
        Ok(())
    })?;
    Ok(Json(sow))
}

pub async fn get_version(
    State(state): State<Arc<AppState>>,
    Path((id, version)): Path<(Uuid, i32)>,
) -> Result<Json<SowVersion>, ApiError> {
    let mut conn = state.conn.get()?;
    let row: SowVersion = sow_versions::table
        .filter(sow_versions::sow_id.eq(id))
        .filter(sow_versions::version.eq(version))
        .first(&mut conn)
        .map_err(|_| ApiError::NotFound(format!("sow version {version} not found")))?;
    Ok(Json(row))
}

/// Manual unfreeze, the admin-only escape hatch.
pub async fn unfreeze(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Sow>, ApiError> {
    if !user.is_admin() {
        return Err(ApiError::Forbidden(
            "only admin may unfreeze a statement of work".to_string(),
        ));
    }
    let mut conn = state.conn.get()?;
    let sow: Sow = diesel::update(sows::table.filter(sows::id.eq(id)))
        .set((
            sows::is_frozen.eq(false),
            sows::frozen_at.eq(None::<DateTime<Utc>>),
            sows::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)
        .map_err(|_| ApiError::NotFound("sow not found".to_string()))?;
    info!("sow {} unfrozen by {}", id, user.user_id);
    Ok(Json(sow))
}

/// Freeze the SOW reachable from an agreement (via its quotation's pricing
/// plan). Idempotent: freezing an already-frozen document is a no-op.
/// Returns the SOW id when one exists.
pub fn freeze_for_agreement(
    conn: &mut PgConnection,
    agreement_id: Uuid,
    by: Uuid,
) -> Result<Option<Uuid>, ApiError> {
    let quotation_id: Uuid = agreements::table
        .filter(agreements::id.eq(agreement_id))
        .select(agreements::quotation_id)
        .first(conn)
        .map_err(|_| ApiError::NotFound("agreement not found".to_string()))?;
    let pricing_plan_id: Uuid = quotations::table
        .filter(quotations::id.eq(quotation_id))
        .select(quotations::pricing_plan_id)
        .first(conn)?;

    let sow: Option<(Uuid, bool)> = sows::table
        .filter(sows::pricing_plan_id.eq(pricing_plan_id))
        .select((sows::id, sows::is_frozen))
        .first(conn)
        .optional()?;

    match sow {
        None => Ok(None),
        Some((sow_id, true)) => Ok(Some(sow_id)),
        Some((sow_id, false)) => {
            diesel::update(sows::table.filter(sows::id.eq(sow_id)))
                .set((
                    sows::is_frozen.eq(true),
                    sows::frozen_at.eq(Some(Utc::now())),
                    sows::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            info!("sow {} frozen by {}", sow_id, by);
            Ok(Some(sow_id))
        }
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sow", post(create_sow))
        .route("/sow/:id", get(get_sow))
        .route("/sow/:id/items", post(add_item))
        .route("/sow/:id/items/:index", put(update_item))
        .route("/sow/:id/versions/:version", get(get_version))
        .route("/sow/:id/unfreeze", post(unfreeze))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::enums::UserRole;
    use std::str::FromStr;

    fn item(title: &str) -> SowItem {
        SowItem {
            category: "recruitment".to_string(),
            title: title.to_string(),
            deliverables: vec!["shortlist".to_string()],
            price: BigDecimal::from_str("50000").unwrap(),
        }
    }

    #[test]
    fn frozen_sow_rejects_non_admin_writes() {
        for role in [
            UserRole::SalesManager,
            UserRole::SalesExecutive,
            UserRole::ProjectManager,
            UserRole::HrManager,
            UserRole::Finance,
        ] {
            let err = ensure_writable(true, &role.capabilities()).unwrap_err();
            assert!(matches!(err, ApiError::Forbidden(_)));
            assert!(err.detail().contains("frozen"));
        }
    }

    #[test]
    fn frozen_sow_accepts_admin_writes() {
        assert!(ensure_writable(true, &UserRole::Admin.capabilities()).is_ok());
    }

    #[test]
    fn unfrozen_sow_accepts_any_role() {
        for v in 0..6 {
            let role = UserRole::from_i16(v).unwrap();
            assert!(ensure_writable(false, &role.capabilities()).is_ok());
        }
    }

    #[test]
    fn items_roundtrip_through_jsonb_value() {
        let items = vec![item("screening"), item("onboarding")];
        let value = items_to_value(&items).unwrap();
        let parsed = parse_items(&value).unwrap();
        assert_eq!(parsed, items);
    }
}
