use crate::revocation::{RevocationStore, revocation_key};
use crate::{RevocationStoreError, TokenError, TokenResult};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use warden_common::{Clock, Identity};

pub const MIN_SECRET_LEN: usize = 32;

/// Default bound on a single revocation store call.
pub const DEFAULT_REVOCATION_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
}

impl Claims {
    pub fn identity(&self) -> TokenResult<Identity> {
        Identity::new(&self.sub, &self.name, &self.role)
            .map_err(|err| TokenError::Invalid(err.to_string()))
    }
}

/// A freshly minted token and its expiry in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

/// What `validate` does when the revocation store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationFailurePolicy {
    /// Reject the token.
    #[default]
    Closed,
    /// Accept the token and log a warning.
    Open,
}

impl FromStr for RevocationFailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            other => Err(format!("unknown revocation failure policy: {other}")),
        }
    }
}

#[derive(Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub revocation_failure: RevocationFailurePolicy,
    // A store call without a reply inside this bound counts as unavailable.
    pub revocation_timeout: Duration,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("issuer", &self.issuer)
            .field("secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("revocation_failure", &self.revocation_failure)
            .field("revocation_timeout", &self.revocation_timeout)
            .finish()
    }
}

/// Issues, validates, refreshes and revokes HS256 session tokens.
///
/// Expiry is judged against the injected clock rather than the wall clock, and
/// the revocation store is consulted only after signature and expiry pass.
pub struct TokenService {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
    revocations: Arc<dyn RevocationStore>,
}

impl TokenService {
    pub fn new(
        config: TokenConfig,
        clock: Arc<dyn Clock>,
        revocations: Arc<dyn RevocationStore>,
    ) -> TokenResult<Self> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::Config(format!(
                "token secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if config.access_ttl.is_zero() || config.refresh_ttl.is_zero() {
            return Err(TokenError::Config("token lifetimes must be non-zero".into()));
        }
        if config.revocation_timeout.is_zero() {
            return Err(TokenError::Config("revocation timeout must be non-zero".into()));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.validate_exp = false;
        validation.validate_aud = false;
        Ok(Self {
            encoding_key: EncodingKey::from_secret(&config.secret),
            decoding_key: DecodingKey::from_secret(&config.secret),
            validation,
            config,
            clock,
            revocations,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn revocation_backend(&self) -> &'static str {
        self.revocations.backend_name()
    }

    pub fn issue(&self, identity: &Identity) -> TokenResult<TokenPair> {
        let access = self.mint(identity, TokenKind::Access)?;
        let refresh = self.mint(identity, TokenKind::Refresh)?;
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        })
    }

    fn mint(&self, identity: &Identity, kind: TokenKind) -> TokenResult<SignedToken> {
        let ttl = match kind {
            TokenKind::Access => self.config.access_ttl,
            TokenKind::Refresh => self.config.refresh_ttl,
        };
        let now = self.clock.now_secs();
        let exp = now.saturating_add(ttl.as_secs() as i64);
        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: identity.subject_id.clone(),
            name: identity.display_name.clone(),
            role: identity.role.clone(),
            iat: now,
            exp,
            jti: Uuid::new_v4().to_string(),
            typ: kind,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;
        Ok(SignedToken {
            token,
            expires_at: exp,
        })
    }

    /// Validate a token of either kind.
    pub async fn validate(&self, token: &str) -> TokenResult<Claims> {
        let claims = self.verify_signed(token)?;
        self.check_revocation(token).await?;
        Ok(claims)
    }

    /// Validate a token and require it to be of `kind`.
    pub async fn validate_kind(&self, token: &str, kind: TokenKind) -> TokenResult<Claims> {
        let claims = self.verify_signed(token)?;
        if claims.typ != kind {
            return Err(TokenError::Invalid(format!(
                "expected {} token, got {}",
                kind.as_str(),
                claims.typ.as_str()
            )));
        }
        self.check_revocation(token).await?;
        Ok(claims)
    }

    /// Resolve the identity carried by an access token.
    pub async fn authenticate(&self, token: &str) -> TokenResult<Identity> {
        self.validate_kind(token, TokenKind::Access)
            .await?
            .identity()
    }

    /// Subject of a well-signed, unexpired access token. Skips the revocation
    /// lookup, so the answer is only good for bucketing, never for access.
    pub fn peek_subject(&self, token: &str) -> Option<String> {
        self.verify_signed(token)
            .ok()
            .filter(|claims| claims.typ == TokenKind::Access)
            .map(|claims| claims.sub)
    }

    /// Mint a new access token from a refresh token. The refresh token keeps
    /// its original expiry.
    pub async fn refresh(&self, refresh_token: &str) -> TokenResult<SignedToken> {
        let claims = self
            .validate_kind(refresh_token, TokenKind::Refresh)
            .await?;
        self.mint(&claims.identity()?, TokenKind::Access)
    }

    /// Revoke a token for the rest of its lifetime. Expired and already
    /// revoked tokens are left alone.
    pub async fn revoke(&self, token: &str) -> TokenResult<()> {
        let claims = match self.validate(token).await {
            Ok(claims) => claims,
            Err(TokenError::Expired | TokenError::Revoked) => return Ok(()),
            Err(err) => return Err(err),
        };
        let remaining_ms = claims
            .exp
            .saturating_mul(1000)
            .saturating_sub(self.clock.now_millis());
        if remaining_ms <= 0 {
            return Ok(());
        }
        self.bounded(self.revocations.revoke(
            &revocation_key(token),
            Duration::from_millis(remaining_ms as u64),
        ))
        .await
        .map_err(|err| TokenError::StoreUnavailable(err.0))?;
        tracing::debug!(sub = %claims.sub, typ = claims.typ.as_str(), "token revoked");
        Ok(())
    }

    fn verify_signed(&self, token: &str) -> TokenResult<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(err.to_string()))?;
        if self.clock.now_secs() >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RevocationStoreError>>,
    ) -> Result<T, RevocationStoreError> {
        let limit = self.config.revocation_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| {
                Err(RevocationStoreError(format!(
                    "no reply within {}ms",
                    limit.as_millis()
                )))
            })
    }

    async fn check_revocation(&self, token: &str) -> TokenResult<()> {
        match self
            .bounded(self.revocations.is_revoked(&revocation_key(token)))
            .await
        {
            Ok(true) => Err(TokenError::Revoked),
            Ok(false) => Ok(()),
            Err(err) => match self.config.revocation_failure {
                RevocationFailurePolicy::Closed => Err(TokenError::StoreUnavailable(err.0)),
                RevocationFailurePolicy::Open => {
                    tracing::warn!(
                        backend = self.revocations.backend_name(),
                        error = %err,
                        "revocation lookup failed; accepting token"
                    );
                    Ok(())
                }
            },
        }
    }
}
