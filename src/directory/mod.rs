//! User directory. Minimal by design: the pipeline needs actors with roles
//! for auth, approval allow-lists and HR fan-out, nothing more.

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::config::AuthConfig;
use crate::core::shared::enums::UserRole;
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::users;
use crate::core::shared::state::AppState;
use crate::security::auth::hash_password;
use crate::security::AuthenticatedUser;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<UserRole>,
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    if !caller.capabilities().can_manage_users {
        return Err(ApiError::Forbidden(
            "role may not manage users".to_string(),
        ));
    }
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation(
            "email and password are required".to_string(),
        ));
    }

    let mut conn = state.conn.get()?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        full_name: req.full_name,
        email: req.email.trim().to_lowercase(),
        password_hash: hash_password(&req.password)?,
        role: req.role,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => ApiError::Conflict("email already registered".to_string()),
            other => other.into(),
        })?;

    Ok(Json(user))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    if !caller.capabilities().can_manage_users {
        return Err(ApiError::Forbidden("role may not list users".to_string()));
    }

    let mut conn = state.conn.get()?;
    let mut q = users::table.into_boxed();
    if let Some(role) = query.role {
        q = q.filter(users::role.eq(role));
    }
    let rows: Vec<User> = q.order(users::created_at.asc()).load(&mut conn)?;
    Ok(Json(rows))
}

/// Ids of all active users holding the given role. Used for notification
/// fan-out (HR on kickoff acceptance, approvers on submission).
pub fn user_ids_with_role(
    conn: &mut PgConnection,
    role: UserRole,
) -> Result<Vec<Uuid>, ApiError> {
    let ids = users::table
        .filter(users::role.eq(role))
        .filter(users::is_active.eq(true))
        .select(users::id)
        .load(conn)?;
    Ok(ids)
}

/// First boot on an empty directory seeds one admin account so the API is
/// reachable at all.
pub fn seed_admin(conn: &mut PgConnection, auth: &AuthConfig) -> Result<(), ApiError> {
    let count: i64 = users::table.count().get_result(conn)?;
    if count > 0 {
        return Ok(());
    }

    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4(),
        full_name: "Administrator".to_string(),
        email: auth.bootstrap_admin_email.clone(),
        password_hash: hash_password(&auth.bootstrap_admin_password)?,
        role: UserRole::Admin,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(users::table)
        .values(&admin)
        .execute(conn)?;
    info!("Seeded bootstrap admin {}", admin.email);
    Ok(())
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/users", post(create_user).get(list_users))
}
