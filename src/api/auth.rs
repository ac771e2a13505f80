use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use serde_json::{json, Value};

/// Env var holding the shared API token. When unset or empty the surface is
/// open (local development).
pub const API_TOKEN_VAR: &str = "EASYINJECTION_API_TOKEN";

pub fn expected_token() -> Option<String> {
    std::env::var(API_TOKEN_VAR).ok().filter(|t| !t.is_empty())
}

fn no_autorizado(mensaje: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": mensaje })))
}

/// Bearer-token gate for the REST routes. The socket authenticates on its
/// own handshake with the same token (see `socket::upgrade`).
pub async fn api_auth_middleware(
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<Value>)> {
    let Some(expected) = expected_token() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => Err(no_autorizado("token de API inválido")),
        None => Err(no_autorizado("falta el token de autorización")),
    }
}
