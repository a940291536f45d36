use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::wallet::{OwnerType, WalletOwner};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,        // owner id
    pub role: OwnerType,  // which wallet the caller owns
    pub exp: i64,         // expiration timestamp
    pub iat: i64,         // issued at timestamp
}

impl Claims {
    pub fn owner(&self) -> WalletOwner {
        WalletOwner::new(self.sub, self.role)
    }
}

/// Verifies bearer tokens issued by the identity service.
pub struct TokenVerifier {
    jwt_secret: String,
}

impl TokenVerifier {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    pub fn verify_token(&self, token: &str) -> AppResult<Claims> {
        let mut validation = jsonwebtoken::Validation::default();

        validation.leeway = 10;
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            tracing::warn!("Error decoding token: {:?}", err);
            AppError::Unauthorized
        })?;

        Ok(token_data.claims)
    }
}
