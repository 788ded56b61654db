use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AuthConfig, AuthError, AuthResult, TokenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claim set carried by every token this service mints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub uid: i32,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: SignedToken,
    pub refresh: SignedToken,
}

#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
}

/// Stateless HS256 codec. Verification never touches storage.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl TokenCodec {
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret_bytes = config.jwt_secret.as_bytes();
        let encoding_key = EncodingKey::from_secret(secret_bytes);
        let decoding_key = DecodingKey::from_secret(secret_bytes);

        // Expiry is checked against the caller-supplied clock in `verify_at`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.clone()]);
        validation.set_issuer(&[config.issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_ttl: config.access_token_ttl(),
            refresh_token_ttl: config.refresh_token_ttl(),
        }
    }

    pub fn issue(&self, kind: TokenKind, account_id: i32, ttl: Duration) -> AuthResult<SignedToken> {
        self.issue_at(kind, account_id, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        kind: TokenKind,
        account_id: i32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AuthResult<SignedToken> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::Config(format!("token ttl of {ttl} is out of range")))?;
        let claims = TokenClaims {
            uid: account_id,
            kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        Ok(SignedToken { token, expires_at })
    }

    /// Mint an access token and a refresh token with the configured ttls.
    pub fn issue_pair(&self, account_id: i32, now: DateTime<Utc>) -> AuthResult<TokenPair> {
        Ok(TokenPair {
            access: self.issue_at(TokenKind::Access, account_id, self.access_token_ttl, now)?,
            refresh: self.issue_at(TokenKind::Refresh, account_id, self.refresh_token_ttl, now)?,
        })
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let claims = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| classify(err.kind()))?
            .claims;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Verify and additionally require a particular token kind.
    pub fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != expected {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    pub fn metadata(&self) -> TokenMetadata {
        TokenMetadata {
            algorithm: "HS256".to_string(),
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            access_token_ttl_secs: self.access_token_ttl.num_seconds(),
            refresh_token_ttl_secs: self.refresh_token_ttl.num_seconds(),
        }
    }
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience => TokenError::BadSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed,
    }
}
