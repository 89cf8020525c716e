use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use kidpoints_shared::auth::Role;

/// Coarse role gating by path shape. Relationship checks happen in the engine.
pub async fn enforce_acl(req: Request<axum::body::Body>, next: Next) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };

    let segs = segmented(&path);
    let prefix = ["api", "v1"];
    if !segs.as_slice().starts_with(&prefix) {
        tracing::warn!(?segs, "ACL: path outside api scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[prefix.len()..];

    let decision = match auth.role {
        Role::Parent => allow_parent(&method, rest),
        Role::Child => allow_child(&method, rest, auth.user_id),
        Role::Admin => allow_admin(&method, rest),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            user_id = auth.user_id,
            role = %auth.role,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_parent(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    let m = method;
    match rest {
        ["tasks"] if *m == Method::POST => Ok(()),
        ["tasks", id] if is_id(id) && (*m == Method::PUT || *m == Method::DELETE) => Ok(()),
        ["tasks", id, "assign"] if is_id(id) && *m == Method::POST => Ok(()),
        ["user-tasks", id, "verify"] if is_id(id) && *m == Method::POST => Ok(()),
        ["rewards"] if *m == Method::POST => Ok(()),
        ["rewards", id] if is_id(id) && (*m == Method::PUT || *m == Method::DELETE) => Ok(()),
        ["claims", id, "review"] if is_id(id) && *m == Method::POST => Ok(()),
        ["children", id, "balance" | "transactions" | "tasks" | "claims"]
            if is_id(id) && *m == Method::GET =>
        {
            Ok(())
        }
        ["children", id, "points" | "invitations"] if is_id(id) && *m == Method::POST => Ok(()),
        ["invitations", "redeem"] if *m == Method::POST => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_child(method: &Method, rest: &[&str], user_id: i32) -> Result<(), AppError> {
    let m = method;
    match rest {
        ["user-tasks", id, "submit"] if is_id(id) && *m == Method::POST => Ok(()),
        ["rewards", id, "claim"] if is_id(id) && *m == Method::POST => Ok(()),
        ["children", child, "balance" | "transactions" | "tasks" | "claims"]
            if *m == Method::GET =>
        {
            ensure_self(child, user_id)
        }
        // Children may hit redeem; the engine answers with `not_parent_role`.
        ["invitations", "redeem"] if *m == Method::POST => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_admin(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    match rest {
        ["children", id, "balance" | "transactions" | "tasks" | "claims"]
            if is_id(id) && *method == Method::GET =>
        {
            Ok(())
        }
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_id(seg: &str) -> bool {
    seg.parse::<i32>().is_ok_and(|id| id > 0)
}

fn ensure_self(seg: &str, user_id: i32) -> Result<(), AppError> {
    match seg.parse::<i32>() {
        Ok(id) if id == user_id => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}
