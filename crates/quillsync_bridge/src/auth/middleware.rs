use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use crate::config::Config;

/// Extracted once per request by [`RequireBearer`]; carries nothing
/// beyond the fact that the request's `Authorization` header matched
/// the configured token - there's no user/session model to attach.
#[derive(Debug, Clone, Copy)]
pub struct BearerAuth;

/// Extractor for bearer-gated routes. Rejects with 401 unless the
/// request's `Authorization: Bearer <token>` header matches
/// [`Config::bearer_token`] exactly.
#[derive(Debug, Clone, Copy)]
pub struct RequireBearer(pub BearerAuth);

fn token_from_header(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

impl<S> FromRequestParts<S> for RequireBearer
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let config = parts
            .extensions
            .get::<Arc<Config>>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "bridge config not attached to request"))?;

        match token_from_header(parts) {
            Some(token) if token == config.bearer_token => Ok(RequireBearer(BearerAuth)),
            _ => Err((StatusCode::UNAUTHORIZED, "missing or invalid bearer token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_from_header_strips_bearer_prefix() {
        let request = axum::http::Request::builder()
            .header("authorization", "Bearer sekrit")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(token_from_header(&parts), Some("sekrit"));
    }

    #[test]
    fn token_from_header_is_none_without_bearer_prefix() {
        let request = axum::http::Request::builder()
            .header("authorization", "sekrit")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(token_from_header(&parts), None);
    }
}
