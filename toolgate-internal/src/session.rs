use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorDetails};
use crate::redis_client::RedisClient;

pub const SESSION_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
pub const SESSION_COOKIE_NAME: &str = "toolgate_session";

const SESSION_KEY_PREFIX: &str = "session:";

/// One anonymous visitor.
///
/// Sessions are immutable after creation except for `captcha_passed_at`,
/// which is set at most once and never cleared. They expire by TTL only;
/// nothing actively deletes them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// One-way hash of the client IP; the raw IP is never stored
    pub ip_hashed: String,
    pub captcha_passed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One-way hash of a client IP, safe to persist.
pub fn hash_ip(ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"toolgate-ip:");
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}

/// `Set-Cookie` value for the session cookie: HttpOnly, SameSite=Strict,
/// Secure in production, max-age = session TTL.
pub fn build_session_cookie(session_id: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={session_id}; Path=/; Max-Age={SESSION_TTL_SECONDS}; HttpOnly; SameSite=Strict"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Pull the session id out of a `Cookie` request header value.
pub fn parse_session_cookie(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == SESSION_COOKIE_NAME && !value.is_empty() {
            Some(value)
        } else {
            None
        }
    })
}

/// Creates and validates anonymous visitor sessions in Redis.
pub struct SessionStore {
    redis: Arc<RedisClient>,
}

impl SessionStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    /// Mint a new session with a fresh random id and persist it.
    ///
    /// The id carries 256 bits of entropy from the OS-seeded CSPRNG.
    pub async fn create_session(&self, ip_hashed: &str) -> Result<Session, Error> {
        let mut token = [0u8; 32];
        rand::rng().fill_bytes(&mut token);

        let now = Utc::now();
        let session = Session {
            id: hex::encode(token),
            created_at: now,
            expires_at: now + Duration::seconds(SESSION_TTL_SECONDS as i64),
            ip_hashed: ip_hashed.to_string(),
            captcha_passed_at: None,
        };
        self.write_session(&session, false).await?;
        tracing::debug!(session_id = %session.id, "Created session");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, Error> {
        let mut conn = self.redis.get_connection();
        let raw: Option<String> = conn
            .get(format!("{SESSION_KEY_PREFIX}{session_id}"))
            .await
            .map_err(storage_error)?;
        match raw {
            Some(json) => {
                let session = serde_json::from_str(&json).map_err(|e| {
                    Error::new(ErrorDetails::Storage {
                        message: format!("Failed to parse session record: {e}"),
                    })
                })?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// True iff the session exists and has not expired. No side effects.
    pub async fn is_valid(&self, session_id: &str) -> Result<bool, Error> {
        Ok(self
            .get_session(session_id)
            .await?
            .is_some_and(|s| !s.is_expired(Utc::now())))
    }

    /// Record that the session passed the captcha. Idempotent: a second call
    /// leaves the original timestamp in place.
    pub async fn mark_captcha_passed(&self, session_id: &str) -> Result<(), Error> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Err(Error::new(ErrorDetails::SessionExpired));
        };
        if session.captcha_passed_at.is_some() {
            return Ok(());
        }
        session.captcha_passed_at = Some(Utc::now());
        self.write_session(&session, true).await
    }

    async fn write_session(&self, session: &Session, keep_ttl: bool) -> Result<(), Error> {
        let json = serde_json::to_string(session).map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Failed to serialize session record: {e}"),
            })
        })?;
        let key = format!("{SESSION_KEY_PREFIX}{}", session.id);
        let mut conn = self.redis.get_connection();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(&json);
        if keep_ttl {
            cmd.arg("KEEPTTL");
        } else {
            cmd.arg("EX").arg(SESSION_TTL_SECONDS);
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(storage_error)?;
        Ok(())
    }
}

fn storage_error(e: redis::RedisError) -> Error {
    Error::new(ErrorDetails::Storage {
        message: format!("Redis error: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_ip_is_stable_and_opaque() {
        let a = hash_ip("203.0.113.7");
        let b = hash_ip("203.0.113.7");
        let c = hash_ip("203.0.113.8");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("203"));
    }

    #[test]
    fn test_build_session_cookie() {
        let cookie = build_session_cookie("abc123", true);
        assert_eq!(
            cookie,
            "toolgate_session=abc123; Path=/; Max-Age=604800; HttpOnly; SameSite=Strict; Secure"
        );

        let dev_cookie = build_session_cookie("abc123", false);
        assert!(!dev_cookie.contains("Secure"));
        assert!(dev_cookie.contains("HttpOnly"));
    }

    #[test]
    fn test_parse_session_cookie() {
        assert_eq!(
            parse_session_cookie("theme=dark; toolgate_session=deadbeef; lang=en"),
            Some("deadbeef")
        );
        assert_eq!(parse_session_cookie("theme=dark"), None);
        assert_eq!(parse_session_cookie("toolgate_session="), None);
        assert_eq!(parse_session_cookie(""), None);
    }

    #[test]
    fn test_session_expiry_check() {
        let now = Utc::now();
        let session = Session {
            id: "x".to_string(),
            created_at: now - Duration::days(8),
            expires_at: now - Duration::days(1),
            ip_hashed: hash_ip("198.51.100.1"),
            captcha_passed_at: None,
        };
        assert!(session.is_expired(now));
        assert!(!session.is_expired(now - Duration::days(2)));
    }
}
