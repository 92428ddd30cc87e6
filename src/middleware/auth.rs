use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{error::Result, AppState};

pub const SESSION_COOKIE: &str = "session";
const SESSION_SUBJECT: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Signs and checks the `logged_in` session flag carried in a cookie.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self) -> Result<String> {
        let claims = Claims {
            sub: SESSION_SUBJECT.to_string(),
            exp: (Utc::now() + self.ttl).timestamp().max(0) as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> bool {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims.sub == SESSION_SUBJECT,
            Err(_) => false,
        }
    }
}

pub fn password_matches(provided: &str, expected: &str) -> bool {
    ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into()
}

pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let logged_in = jar
        .get(SESSION_COOKIE)
        .map(|cookie| state.sessions.verify(cookie.value()))
        .unwrap_or(false);

    if !logged_in {
        return Redirect::to("/login").into_response();
    }
    next.run(req).await
}
