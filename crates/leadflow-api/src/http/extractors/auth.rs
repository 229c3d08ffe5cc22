//! Management API key checks.
//!
//! A key is presented as `Authorization: Bearer <key>` or `X-API-Key: <key>`
//! (Bearer wins when both are sent). Only the SHA-256 of a key is stored.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::http::error::AppError;
use crate::state::AppState;

/// Prefix of generated keys.
pub const KEY_PREFIX: &str = "lf_";

const KEY_HINT: &str = "send 'Authorization: Bearer <key>' or 'X-API-Key: <key>'";

/// A request carrying a known management key. `key_id` is the stored row id.
pub struct Authenticated {
    pub key_id: String,
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = presented_key(&parts.headers)?;

        // Lookup and last-use stamp in one statement.
        let key_id: Option<String> = sqlx::query_scalar(
            "UPDATE api_keys SET last_used_at = ? WHERE key_hash = ? RETURNING id",
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(hash_api_key(&presented))
        .fetch_optional(&state.db_pool.writer)
        .await
        .map_err(|e| AppError::Internal(format!("api key lookup failed: {e}")))?;

        match key_id {
            Some(key_id) => Ok(Authenticated { key_id }),
            None => {
                tracing::warn!(path = %parts.uri.path(), "unknown api key");
                Err(AppError::Unauthorized(format!("invalid API key; {KEY_HINT}")))
            }
        }
    }
}

fn presented_key(headers: &HeaderMap) -> Result<String, AppError> {
    let header = |name: &str| -> Result<Option<String>, AppError> {
        headers
            .get(name)
            .map(|value| {
                value
                    .to_str()
                    .map(|s| s.trim().to_string())
                    .map_err(|_| AppError::Unauthorized(format!("{name} header is not ASCII")))
            })
            .transpose()
    };

    if let Some(bearer) = header("authorization")?
        .as_deref()
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Ok(bearer.trim().to_string());
    }
    header("x-api-key")?
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthorized(format!("missing API key; {KEY_HINT}")))
}

/// SHA-256 of an API key, lowercase hex.
pub fn hash_api_key(key: &str) -> String {
    Sha256::digest(key.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Create the first API key if none exists.
///
/// Returns the plaintext key when one was created. It is not recoverable
/// afterwards; only its hash is stored.
pub async fn ensure_api_key(state: &AppState) -> anyhow::Result<Option<String>> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_keys")
        .fetch_one(&state.db_pool.reader)
        .await?;
    if count > 0 {
        return Ok(None);
    }
    create_api_key(state, "default").await.map(Some)
}

/// Generate a key, store its hash and return the plaintext.
pub async fn create_api_key(state: &AppState, name: &str) -> anyhow::Result<String> {
    // Two v4 UUIDs give 244 random bits.
    let key = format!(
        "{KEY_PREFIX}{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    let key_id = uuid::Uuid::now_v7();

    sqlx::query("INSERT INTO api_keys (id, name, key_hash, created_at) VALUES (?, ?, ?, ?)")
        .bind(key_id.to_string())
        .bind(name)
        .bind(hash_api_key(&key))
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&state.db_pool.writer)
        .await?;

    tracing::info!(%key_id, name, "api key created");
    Ok(key)
}
