//! JWT verification for both the HTTP routes and the `/ws/room/{id}`
//! handshake. Tokens are opaque bearer credentials minted by the
//! out-of-scope account service (spec §1) — this crate only verifies
//! them and reads the `sub` claim as the participant's user id.

use bson::oid::ObjectId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token subject is not a valid user id")]
    InvalidSubject,
}

pub fn verify_token(secret: &str, algorithm: &str, token: &str) -> Result<ObjectId, AuthError> {
    let alg = match algorithm {
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        _ => Algorithm::HS256,
    };
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(alg),
    )
    .map_err(|_| AuthError::InvalidToken)?;
    ObjectId::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidSubject)
}
