//! API token authentication.
//!
//! Tokens are minted by `dealdesk user add` and only their SHA-256 digest is
//! stored. Requests present the plaintext as `Authorization: Bearer <token>`.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use sha2::{Digest, Sha256};

use super::api::{ApiError, SharedState};
use super::db::{CrmDb, DbHandle};
use crate::errors::CrmError;

const TOKEN_PREFIX: &str = "dd_";

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn generate_token() -> String {
    format!("{}{}", TOKEN_PREFIX, uuid::Uuid::new_v4().simple())
}

/// Mint a token for `user_id` and store its digest. Returns the plaintext,
/// which is shown once.
pub fn issue_token(db: &CrmDb, user_id: i64, label: &str) -> anyhow::Result<String> {
    db.get_profile(user_id)?;
    let token = generate_token();
    db.store_token(user_id, &hash_token(&token), label)?;
    Ok(token)
}

/// Extract a bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Resolve a plaintext token to its owner.
pub async fn authenticate(db: &DbHandle, token: &str) -> Result<i64, CrmError> {
    let digest = hash_token(token);
    db.call(move |db| db.user_for_token(&digest))
        .await?
        .ok_or(CrmError::Unauthorized)
}

/// The authenticated caller. Every CRM handler takes this extractor.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub user_id: i64,
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let user_id = authenticate(&state.db, &token).await?;
        Ok(CurrentUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn hash_is_stable_hex() {
        let a = hash_token("dd_secret");
        assert_eq!(a, hash_token("dd_secret"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_token("dd_other"));
    }

    #[test]
    fn generated_tokens_are_unique_and_prefixed() {
        let a = generate_token();
        let b = generate_token();
        assert!(a.starts_with(TOKEN_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn issued_token_authenticates_its_owner() -> anyhow::Result<()> {
        let db = CrmDb::new_in_memory()?;
        let user = db.create_profile("Owner", "owner@example.com")?;
        let token = issue_token(&db, user.id, "test")?;
        let handle = DbHandle::new(db);

        assert_eq!(authenticate(&handle, &token).await?, user.id);
        assert!(matches!(
            authenticate(&handle, "dd_forged").await,
            Err(CrmError::Unauthorized)
        ));
        Ok(())
    }

    #[test]
    fn cannot_issue_for_missing_profile() -> anyhow::Result<()> {
        let db = CrmDb::new_in_memory()?;
        assert!(issue_token(&db, 42, "x").is_err());
        Ok(())
    }
}
