use anyhow::{ensure, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

const UNSUBSCRIBE_EXPIRY_DAYS: i64 = 365 * 5;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
    account_audience: String,
    account_expiry: Duration,
    unsubscribe_audience: String,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
            account_audience: config.account_token_audience.clone(),
            account_expiry: Duration::hours(config.account_token_expiry_hours),
            unsubscribe_audience: config.unsubscribe_token_audience.clone(),
        })
    }

    pub fn generate_token(&self, user_id: Uuid, email: &str, is_superuser: bool) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            email: email.to_owned(),
            is_superuser,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Issues a single-purpose account token (activation, password reset)
    /// bound to the fingerprint of the account state it was issued for.
    pub fn generate_account_token(
        &self,
        user_id: Uuid,
        purpose: &str,
        fingerprint: &str,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.account_expiry;
        let claims = AccountClaims {
            sub: user_id,
            purpose: purpose.to_owned(),
            fp: fingerprint.to_owned(),
            iss: self.issuer.clone(),
            aud: self.account_audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_account_token(&self, token: &str, purpose: &str) -> Result<AccountClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.account_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<AccountClaims>(token, &self.decoding, &validation)?;
        ensure!(data.claims.purpose == purpose, "token purpose mismatch");
        Ok(data.claims)
    }

    pub fn generate_unsubscribe_token(&self, user_id: Uuid, category: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::days(UNSUBSCRIBE_EXPIRY_DAYS);
        let claims = UnsubscribeClaims {
            sub: user_id,
            category: category.to_owned(),
            iss: self.issuer.clone(),
            aud: self.unsubscribe_audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_unsubscribe_token(&self, token: &str) -> Result<UnsubscribeClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.unsubscribe_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<UnsubscribeClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub is_superuser: bool,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountClaims {
    pub sub: Uuid,
    pub purpose: String,
    pub fp: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeClaims {
    pub sub: Uuid,
    pub category: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        let secret = "unit-test-secret";
        JwtService {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: "issuer".into(),
            audience: "clients".into(),
            expiry: Duration::minutes(5),
            account_audience: "account".into(),
            account_expiry: Duration::hours(1),
            unsubscribe_audience: "unsubscribe".into(),
        }
    }

    #[test]
    fn account_tokens_are_bound_to_their_purpose() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let token = jwt
            .generate_account_token(user_id, "activate", "abc")
            .unwrap();

        let claims = jwt.verify_account_token(&token, "activate").unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.fp, "abc");
        assert!(jwt.verify_account_token(&token, "password-reset").is_err());
    }

    #[test]
    fn audiences_do_not_overlap() {
        let jwt = service();
        let user_id = Uuid::new_v4();
        let access = jwt.generate_token(user_id, "a@example.org", false).unwrap();
        let unsubscribe = jwt.generate_unsubscribe_token(user_id, "info").unwrap();

        assert!(jwt.verify_account_token(&access, "activate").is_err());
        assert!(jwt.verify_token(&unsubscribe).is_err());
        assert_eq!(
            jwt.verify_unsubscribe_token(&unsubscribe).unwrap().category,
            "info"
        );
    }
}
