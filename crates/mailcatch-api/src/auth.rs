//! Shared-secret authentication

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use mailcatch_storage::FileStorage;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::reader::MailReader;

/// Application state shared across handlers
pub struct AppState<S: FileStorage> {
    pub reader: MailReader<S>,
    secret_hash: String,
}

impl<S: FileStorage> AppState<S> {
    pub fn new(reader: MailReader<S>, secret: &str) -> Self {
        Self {
            reader,
            secret_hash: hash_api_key(secret),
        }
    }

    /// Check a presented credential against the configured secret
    pub fn verify(&self, api_key: &str) -> bool {
        hash_api_key(api_key) == self.secret_hash
    }
}

/// Extract API key from request
pub fn extract_api_key(req: &Request) -> Option<&str> {
    // Check Authorization header
    if let Some(auth) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token);
            }
        }
    }

    // Check X-API-Key header
    if let Some(key) = req.headers().get("x-api-key") {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str);
        }
    }

    None
}

/// Hash an API key for comparison
fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Reject every request that does not carry the shared secret
pub async fn auth_middleware<S: FileStorage + 'static>(
    State(state): State<Arc<AppState<S>>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let verified = extract_api_key(&req).map(|key| state.verify(key));

    match verified {
        Some(true) => Ok(next.run(req).await),
        Some(false) => {
            warn!("Rejected request to {} with invalid credential", req.uri().path());
            Err(StatusCode::FORBIDDEN)
        }
        None => {
            warn!("Rejected request to {} without credential", req.uri().path());
            Err(StatusCode::FORBIDDEN)
        }
    }
}
