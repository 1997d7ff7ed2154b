use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, PublicUser, RefreshRequest},
        jwt::{AuthUser, JwtKeys, TokenKind},
        repo::activity_is_stale,
        repo_types::{NewUser, User},
        services::{hash_password, verify_password},
    },
    error::ApiError,
    onboarding::{machine::OnboardingContext, runner},
    state::AppState,
    validation::{SignInForm, SignUpForm},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, form))]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(form): Json<SignUpForm>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let input = form.validate()?;
    let email = input.email.to_lowercase();

    if User::find_by_email(&state.db, &email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    let password_hash = hash_password(&input.password)?;
    let user = User::create(
        &state.db,
        &NewUser {
            full_name: &input.full_name,
            email: &email,
            university_id: input.university_id,
            university_card: &input.university_card,
            password_hash: &password_hash,
        },
    )
    .await?
    .ok_or_else(|| ApiError::Conflict("Email already registered".into()))?;

    // the account exists at this point; a failed trigger should not undo it
    let ctx = OnboardingContext {
        email: user.email.clone(),
        full_name: user.full_name.clone(),
    };
    if let Err(e) = runner::trigger(state.workflows.as_ref(), &ctx, OffsetDateTime::now_utc()).await {
        error!(user_id = %user.id, error = %format!("{e:#}"), "could not start onboarding");
    }

    let tokens = JwtKeys::from_ref(&state).issue_pair(user.id)?;
    info!(user_id = %user.id, email = %user.email, "user signed up");
    Ok((StatusCode::CREATED, Json(AuthResponse::new(tokens, user))))
}

#[instrument(skip(state, form))]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(form): Json<SignInForm>,
) -> Result<Json<AuthResponse>, ApiError> {
    let input = form.validate()?;
    let email = input.email.to_lowercase();

    let Some(mut user) = User::find_by_email(&state.db, &email).await? else {
        warn!(%email, "sign-in for unknown email");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    if !verify_password(&input.password, &user.password_hash)? {
        warn!(user_id = %user.id, "sign-in with wrong password");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    let now = OffsetDateTime::now_utc();
    if User::touch_activity(&state.db, user.id, now).await? {
        user.last_activity_date = Some(now);
    }

    let tokens = JwtKeys::from_ref(&state).issue_pair(user.id)?;
    info!(user_id = %user.id, "user signed in");
    Ok(Json(AuthResponse::new(tokens, user)))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify(&payload.refresh_token, TokenKind::Refresh)
        .map_err(|e| {
            warn!(error = %e, "refresh rejected");
            ApiError::Unauthorized("Invalid refresh token".into())
        })?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    let tokens = keys.issue_pair(user.id)?;
    Ok(Json(AuthResponse::new(tokens, user)))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let mut user = User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    let now = OffsetDateTime::now_utc();
    if activity_is_stale(user.last_activity_date, now)
        && User::touch_activity(&state.db, user.id, now).await?
    {
        user.last_activity_date = Some(now);
    }

    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        response::Response,
    };
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .merge(auth_routes())
            .merge(me_routes())
            .with_state(AppState::fake())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn sign_up_reports_field_errors() {
        let res = app()
            .oneshot(post_json(
                "/auth/sign-up",
                serde_json::json!({
                    "fullName": "Al",
                    "email": "alice@example.com",
                    "universityId": "abc",
                    "universityCard": "card.png",
                    "password": "short"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = json_body(res).await;
        let fields: Vec<_> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(fields, vec!["fullName", "universityId", "password"]);
    }

    #[tokio::test]
    async fn sign_in_rejects_malformed_email() {
        let res = app()
            .oneshot(post_json(
                "/auth/sign-in",
                serde_json::json!({ "email": "alice", "password": "wonderland" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(res).await;
        assert_eq!(body["errors"][0]["field"], "email");
    }

    #[tokio::test]
    async fn me_requires_a_token() {
        let res = app()
            .oneshot(Request::get("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_rejects_refresh_tokens() {
        let state = AppState::fake();
        let pair = JwtKeys::from_ref(&state).issue_pair(uuid::Uuid::new_v4()).unwrap();
        let res = app()
            .oneshot(
                Request::get("/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", pair.refresh_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_rejects_garbage() {
        let res = app()
            .oneshot(post_json(
                "/auth/refresh",
                serde_json::json!({ "refreshToken": "not-a-jwt" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["message"], "Invalid refresh token");
    }
}
