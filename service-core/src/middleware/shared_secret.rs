use crate::error::AppError;
use crate::utils::shared_secret::{parse_bearer, verify_shared_secret};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use secrecy::{ExposeSecret, Secret};

/// Secret that callers must present as a bearer token.
#[derive(Clone, Debug)]
pub struct SharedSecretConfig {
    pub secret: Secret<String>,
}

/// Reject requests whose bearer token does not match the configured secret.
///
/// The handler behind this layer never runs for an unauthorized request.
pub async fn shared_secret_middleware<S>(
    State(state): State<S>,
    req: Request,
    next: Next,
) -> Result<Response, AppError>
where
    S: AsRef<SharedSecretConfig> + Clone + Send + Sync + 'static,
{
    let config = state.as_ref();

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer);

    match presented {
        Some(token) if verify_shared_secret(config.secret.expose_secret(), token) => {
            Ok(next.run(req).await)
        }
        Some(_) => {
            tracing::warn!(path = %req.uri().path(), "Rejected request with invalid shared secret");
            Err(AppError::Unauthorized(anyhow::anyhow!("Unauthorized")))
        }
        None => {
            tracing::warn!(path = %req.uri().path(), "Rejected request without bearer token");
            Err(AppError::Unauthorized(anyhow::anyhow!("Unauthorized")))
        }
    }
}
