use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, TokenData, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::{common::UserId, mongodb::serde_hex_id};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a specific user.
///
/// Tokens are issued by whichever service handles sign-in, signed with the
/// shared `jwt_secret`; this server only verifies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(with = "serde_hex_id")]
    pub id: UserId,
}

impl AuthToken {
    pub fn new(id: UserId) -> Self {
        Self { id }
    }

    /// Verify and decode a signed token.
    pub fn decode(token: &str, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.token)?;
        Ok(token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AuthToken,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    /// Get an [`AuthToken`] from the cookie and verify its signature and expiry.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.rocket().state::<Config>() {
            Some(config) => config,
            None => {
                let err = Error::Status(
                    Status::InternalServerError,
                    "Application config is not loaded".to_string(),
                );
                return Outcome::Error((Status::InternalServerError, err));
            }
        };

        // Forward to any routes that do not require an authentication token.
        let cookie = match req.cookies().get(AUTH_TOKEN_COOKIE) {
            Some(cookie) => cookie,
            None => return Outcome::Forward(Status::Unauthorized),
        };

        match Self::decode(cookie.value(), config) {
            Ok(token) => {
                // Lets the request log name the voter.
                req.local_cache(|| Some(token));
                Outcome::Success(token)
            }
            Err(err) => {
                warn!("Rejected auth token: {err}");
                Outcome::Error((Status::Unauthorized, err))
            }
        }
    }
}

/// Token issuing, which only tests need: the sign-in service mints real
/// tokens.
#[cfg(test)]
mod examples {
    use jsonwebtoken::{EncodingKey, Header};
    use rocket::http::{Cookie, SameSite};

    use super::*;

    impl AuthToken {
        /// A token for a fresh user.
        pub fn example() -> Self {
            Self::new(UserId::new())
        }

        /// Sign this token, valid for an hour from now.
        pub fn encode(self, config: &Config) -> Result<String, Error> {
            let claims = Claims {
                token: self,
                expire_at: Utc::now() + chrono::Duration::hours(1),
            };
            let token = jsonwebtoken::encode(
                &Header::default(),
                &claims,
                &EncodingKey::from_secret(config.jwt_secret()),
            )?;
            Ok(token)
        }

        /// Sign this token and wrap it in a cookie.
        pub fn into_cookie(self, config: &Config) -> Result<Cookie<'static>, Error> {
            let token = self.encode(config)?;
            let cookie = Cookie::build((AUTH_TOKEN_COOKIE, token))
                .http_only(true)
                .same_site(SameSite::Strict)
                .build();
            Ok(cookie)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let config = Config::example();
        let token = AuthToken::example();
        let encoded = token.encode(&config).unwrap();
        assert_eq!(AuthToken::decode(&encoded, &config).unwrap(), token);
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let token = AuthToken::example().encode(&Config::example()).unwrap();
        let other = Config::example_with_secret("some other secret");
        assert!(AuthToken::decode(&token, &other).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = Config::example();
        let claims = Claims {
            token: AuthToken::example(),
            expire_at: Utc::now() - chrono::Duration::hours(1),
        };
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(config.jwt_secret()),
        )
        .unwrap();
        assert!(AuthToken::decode(&token, &config).is_err());
    }

    #[test]
    fn claims_carry_hex_id() {
        let token = AuthToken::example();
        let claims = Claims {
            token,
            expire_at: Utc::now(),
        };
        let json = rocket::serde::json::serde_json::to_value(&claims).unwrap();
        assert_eq!(json["id"], token.id.to_string());
        assert!(json["exp"].is_i64());
    }
}
