//! This module provides validation of the JSON Web Tokens presented by clients when
//! they open a realtime connection.
//!
//! Token issuance is handled by the REST login flow and is out of scope here; the
//! realtime layer only needs `ValidateToken(token) -> (userId, error)`, expressed as
//! the [`TokenValidator`] trait so tests and alternative identity providers can be
//! injected.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain::jwt::{JwtValidator, TokenValidator};
//!
//! async fn example(token: &str) {
//!     let validator = JwtValidator::new("signing-secret").unwrap();
//!     match validator.validate_token(token).await {
//!         Ok(user_id) => println!("Authenticated as {user_id}"),
//!         Err(e) => eprintln!("Rejected: {e}"),
//!     }
//! }
//! ```

use crate::error::{auth_error, config_error, AuthErrorKind, Error};
use crate::UserId;
use async_trait::async_trait;
use claims::SessionClaims;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::*;

pub mod claims;

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate_token(&self, token: &str) -> Result<UserId, Error>;
}

/// Validates HS256-signed tokens whose `sub` claim is the user id.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Result<Self, Error> {
        if secret.is_empty() {
            warn!("Refusing to build a token validator with an empty signing secret");
            return Err(config_error("JWT signing secret must not be empty"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate_token(&self, token: &str) -> Result<UserId, Error> {
        let token = token.trim();
        if token.is_empty() {
            return Err(auth_error(AuthErrorKind::MissingToken, "no token presented"));
        }

        let data = decode::<SessionClaims>(token, &self.key, &self.validation)?;
        if data.claims.sub.is_empty() {
            return Err(auth_error(AuthErrorKind::InvalidToken, "token has no subject"));
        }

        Ok(data.claims.sub)
    }
}
