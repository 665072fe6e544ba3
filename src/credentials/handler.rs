//! HTTP handlers for the credentials endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/credentials/idp-providers` | Registered identity providers |
//! | `POST` | `/credentials/mint` | Mint credentials for selected keys |
//! | `GET` | `/credentials/keys?token=` | Keys the token's subject may mint |
//!
//! ## Mint request
//!
//! ```json
//! {
//!   "oidcToken": "<JWT>",
//!   "idpName": "keycloak-client",
//!   "keys": ["MINIO_CREDENTIALS", "AWS_CREDENTIALS"],
//!   "duration": 1800,
//!   "all": false
//! }
//! ```
//!
//! Every failure is answered with the same generic `500` body; the cause is
//! only logged.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::{CredentialsService, MintResultSet};
use crate::Error;
use crate::broker::IdpProviderDescriptor;

// ── Request types ─────────────────────────────────────────────────────────

/// `POST /credentials/mint` body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MintKeysRequest {
    /// Caller's identity token
    pub oidc_token: Option<String>,
    /// Identity provider to validate with (default provider when absent)
    pub idp_name: Option<String>,
    /// Keys to mint, in order
    pub keys: Option<Vec<String>>,
    /// Requested credential lifetime in seconds
    pub duration: Option<u64>,
    /// Mint every key the subject may mint
    pub all: Option<bool>,
}

/// `GET /credentials/keys` query.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct KeysQuery {
    /// Caller's identity token
    pub token: Option<String>,
}

// ── Errors ────────────────────────────────────────────────────────────────

/// Error wrapper rendering every failure as a generic `500`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_request_error() {
            warn!(error = %self.0, "Rejected credentials request");
        } else {
            error!(error = %self.0, "Credentials request failed");
        }

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "statusCode": 500,
                "message": "Internal server error",
            })),
        )
            .into_response()
    }
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the credentials routes, mounted at `/credentials`.
pub fn router(service: Arc<CredentialsService>) -> Router {
    Router::new()
        .route("/credentials/idp-providers", get(list_idp_providers))
        .route("/credentials/mint", post(mint_keys))
        .route("/credentials/keys", get(get_available_keys))
        .with_state(service)
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn list_idp_providers(
    State(service): State<Arc<CredentialsService>>,
) -> Json<Vec<IdpProviderDescriptor>> {
    Json(service.list_idp_providers())
}

async fn mint_keys(
    State(service): State<Arc<CredentialsService>>,
    Json(body): Json<MintKeysRequest>,
) -> Result<Json<MintResultSet>, ApiError> {
    let Some(token) = body.oidc_token.filter(|t| !t.is_empty()) else {
        return Err(Error::MissingToken.into());
    };

    let results = service
        .mint_keys(
            &token,
            body.idp_name.as_deref(),
            body.keys.as_deref(),
            body.duration,
            body.all.unwrap_or(false),
        )
        .await?;

    Ok(Json(results))
}

async fn get_available_keys(
    State(service): State<Arc<CredentialsService>>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Err(Error::MissingTokenParameter.into());
    };

    let subject = service.extract_subject(&token, None).await?;
    Ok(Json(service.get_available_keys(&subject)))
}
