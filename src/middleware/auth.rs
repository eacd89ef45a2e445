//! Admin API key check.
//!
//! Applied as a route layer on the admin router. With no key
//! configured every admin call is refused; the operator surface never
//! falls open.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::domain::Sealed;
use crate::error::AppError;

pub async fn admin_auth(
    State(admin_key): State<Option<Sealed>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = admin_key.as_ref() else {
        return Err(AppError::Unauthorized(
            "admin API key is not configured".to_string(),
        ));
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match presented {
        Some(value) if value.strip_prefix("Bearer ").unwrap_or(value) == expected.expose() => {
            Ok(next.run(req).await)
        }
        _ => Err(AppError::Unauthorized(
            "invalid admin credentials".to_string(),
        )),
    }
}
