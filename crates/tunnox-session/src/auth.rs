//! Authentication seam. JWT issuance and verification are out of scope
//! here (spec Non-goal); this crate only defines the seam the session
//! layer calls through, so a real verifier can be dropped in without
//! touching `SessionManager`.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: i64,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<ClientIdentity, crate::error::SessionError>;
}

/// Accepts any non-empty credential, mapping it to a stable but
/// unverified client id. Only fit for local development and the test
/// suite — a real deployment supplies its own [`Authenticator`].
#[derive(Debug, Default)]
pub struct AllowAllAuthenticator;

#[async_trait]
impl Authenticator for AllowAllAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<ClientIdentity, crate::error::SessionError> {
        if credential.is_empty() {
            return Err(crate::error::SessionError::AuthFailed("empty credential".into()));
        }
        let client_id = credential.bytes().fold(0i64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as i64));
        Ok(ClientIdentity { client_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_credential_is_rejected() {
        let err = AllowAllAuthenticator.authenticate("").await.unwrap_err();
        assert!(matches!(err, crate::error::SessionError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn same_credential_maps_to_the_same_client_id() {
        let a = AllowAllAuthenticator.authenticate("token-1").await.unwrap();
        let b = AllowAllAuthenticator.authenticate("token-1").await.unwrap();
        assert_eq!(a.client_id, b.client_id);
    }
}
