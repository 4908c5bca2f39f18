use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::{services::jwt::JwkSet, AppState};

/// Get JSON Web Key Set (JWKS)
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    responses(
        (status = 200, description = "Public signing keys", body = JwkSet)
    ),
    tag = "Well-Known"
)]
pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(state.jwt.jwks()),
    )
}
