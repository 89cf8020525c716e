use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use kidpoints_shared::auth::Role;
use kidpoints_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};
use crate::engine::Storage;
use crate::engine::model::User;

/// How many days before mandatory re-login.
const USER_TOKEN_TTL_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub user_id: i32,
    pub username: String,
    pub role: Role,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    // The account must still exist with the role the token was issued for.
    let uid = claims.uid;
    let user = state
        .store
        .read("auth_lookup", move |uow| uow.find_user(uid))
        .await
        .map_err(|e| {
            error!(user_id = uid, error=%e, "auth: user lookup failed");
            AppError::internal(e)
        })?;
    let Some(user) = user.filter(|u| u.username == claims.sub && u.role == claims.role) else {
        warn!(user_id = uid, username = %claims.sub, "auth: token no longer matches an account");
        return unauthorized();
    };

    req.extensions_mut().insert(AuthCtx {
        user_id: user.id,
        username: user.username,
        role: user.role,
    });
    Ok(next.run(req).await)
}

pub fn issue_jwt_for_user(state: &AppState, user: &User) -> Result<String, AppError> {
    let exp = (Utc::now() + Duration::days(USER_TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: user.username.clone(),
        uid: user.id,
        jti: uuid::Uuid::new_v4().to_string(),
        exp,
        role: user.role,
    };
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(username = %user.username, error=%e, "login: jwt encode failed");
        AppError::internal(e)
    })
}
