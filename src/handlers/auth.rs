// src/handlers/auth.rs

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::user::{Credentials, LoginResponse, Role},
    repository::{Repository, UserRepository},
    state::AppState,
    utils::{
        credentials::{hash_password, verify_password},
        jwt::sign_jwt,
    },
};

/// Registers a new learner account.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created with the public user fields.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let hashed_password = hash_password(&payload.password)?;
    let user = state
        .repo
        .create_user(payload.username.trim(), &hashed_password, Role::Learner)
        .await?;

    tracing::info!("Registered user {}", user.username);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": user.id,
            "name": user.username,
            "isAdmin": false,
        })),
    ))
}

/// Authenticates a user and returns a JWT token.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let invalid = || AppError::AuthError("Invalid username or password".to_string());

    let user = state
        .repo
        .find_user_by_username(payload.username.trim())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(invalid());
    }

    let role = user.role();
    let token = sign_jwt(
        user.id,
        &user.username,
        role,
        &state.config.jwt_secret,
        state.config.jwt_expiration,
    )?;

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer",
        id: user.id,
        name: user.username,
        is_admin: role == Role::Admin,
    }))
}

/// Creates the configured admin account on startup if it does not exist yet.
pub async fn seed_admin_user(repo: &dyn Repository, config: &Config) -> Result<(), AppError> {
    let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) else {
        return Ok(());
    };

    if repo.find_user_by_username(username).await?.is_some() {
        return Ok(());
    }

    tracing::info!("Seeding admin user: {}", username);
    let hashed_password = hash_password(password)?;
    repo.create_user(username, &hashed_password, Role::Admin)
        .await?;
    tracing::info!("Admin user created successfully.");

    Ok(())
}
