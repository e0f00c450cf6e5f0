use std::net::SocketAddr;

use secrecy::SecretString;
use url::Url;

use crate::error::{Error, ErrorDetails};

pub const DEFAULT_CAPTCHA_VERIFY_URL: &str =
    "https://challenges.cloudflare.com/turnstile/v0/siteverify";
pub const DEFAULT_MONTHLY_BUDGET_USD: f64 = 20.0;
pub const DEFAULT_CONTACT_EMAIL: &str = "hello@example.dev";

/// Gateway configuration, read from the environment once at startup.
///
/// Missing or invalid values are a fatal startup error, never a per-request
/// error, so every request handler can assume a fully-validated config.
#[derive(Clone, Debug)]
pub struct Config {
    /// Redis connection string (sessions, rate-limit windows, spend records,
    /// submission index)
    pub redis_url: String,
    /// Object store URL for submission artifacts, e.g. `s3://bucket` or
    /// `memory:///` for local development
    pub artifact_store_url: Url,
    /// Captcha provider secret, sent to the siteverify endpoint
    pub captcha_secret: SecretString,
    /// Captcha provider verification endpoint
    pub captcha_verify_url: Url,
    /// Monthly ceiling on estimated LLM spend, in USD
    pub monthly_budget_usd: f64,
    /// Address surfaced to visitors when the spend cap is hit
    pub contact_email: String,
    pub bind_address: SocketAddr,
    /// Whether session cookies carry the `Secure` attribute (on in
    /// production, off for plain-HTTP local development)
    pub secure_cookies: bool,
    /// Base URL of the LLM tool backend; `POST {base}/{tool}` runs a tool
    pub tool_backend_url: Url,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        let redis_url = require_var("TOOLGATE_REDIS_URL")?;

        let artifact_store_url = parse_url_var(&require_var("TOOLGATE_ARTIFACT_STORE_URL")?)?;
        // Fail at startup on an unsupported scheme rather than on the first sweep
        object_store::parse_url(&artifact_store_url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!(
                    "TOOLGATE_ARTIFACT_STORE_URL is not a supported object store URL: {e}"
                ),
            })
        })?;

        let captcha_secret = SecretString::from(require_var("TOOLGATE_CAPTCHA_SECRET")?);

        let captcha_verify_url = match std::env::var("TOOLGATE_CAPTCHA_VERIFY_URL") {
            Ok(raw) => parse_url_var(&raw)?,
            Err(_) => parse_url_var(DEFAULT_CAPTCHA_VERIFY_URL)?,
        };

        let monthly_budget_usd = match std::env::var("TOOLGATE_MONTHLY_BUDGET_USD") {
            Ok(raw) => {
                let budget: f64 = raw.parse().map_err(|_| {
                    Error::new(ErrorDetails::Config {
                        message: format!("TOOLGATE_MONTHLY_BUDGET_USD is not a number: `{raw}`"),
                    })
                })?;
                if budget <= 0.0 || !budget.is_finite() {
                    return Err(Error::new(ErrorDetails::Config {
                        message: format!("TOOLGATE_MONTHLY_BUDGET_USD must be positive, got {budget}"),
                    }));
                }
                budget
            }
            Err(_) => DEFAULT_MONTHLY_BUDGET_USD,
        };

        let contact_email = std::env::var("TOOLGATE_CONTACT_EMAIL")
            .unwrap_or_else(|_| DEFAULT_CONTACT_EMAIL.to_string());

        let bind_address = match std::env::var("TOOLGATE_BIND_ADDRESS") {
            Ok(raw) => raw.parse().map_err(|_| {
                Error::new(ErrorDetails::Config {
                    message: format!("TOOLGATE_BIND_ADDRESS is not a socket address: `{raw}`"),
                })
            })?,
            Err(_) => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        let secure_cookies = match std::env::var("TOOLGATE_SECURE_COOKIES") {
            Ok(raw) => parse_bool_var("TOOLGATE_SECURE_COOKIES", &raw)?,
            Err(_) => true,
        };

        let tool_backend_url = parse_url_var(&require_var("TOOLGATE_TOOL_BACKEND_URL")?)?;

        Ok(Self {
            redis_url,
            artifact_store_url,
            captcha_secret,
            captcha_verify_url,
            monthly_budget_usd,
            contact_email,
            bind_address,
            secure_cookies,
            tool_backend_url,
        })
    }
}

fn require_var(name: &str) -> Result<String, Error> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::new(ErrorDetails::Config {
            message: format!("Missing required environment variable {name}"),
        })),
    }
}

fn parse_url_var(raw: &str) -> Result<Url, Error> {
    Url::parse(raw).map_err(|e| {
        Error::new(ErrorDetails::Config {
            message: format!("Invalid URL `{raw}`: {e}"),
        })
    })
}

fn parse_bool_var(name: &str, raw: &str) -> Result<bool, Error> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::new(ErrorDetails::Config {
            message: format!("{name} must be true/false, got `{raw}`"),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_var() {
        assert!(parse_bool_var("X", "true").unwrap());
        assert!(parse_bool_var("X", "1").unwrap());
        assert!(!parse_bool_var("X", "false").unwrap());
        assert!(parse_bool_var("X", "yes").is_err());
    }

    #[test]
    fn test_parse_url_var_rejects_garbage() {
        assert!(parse_url_var("not a url").is_err());
        assert!(parse_url_var("memory:///").is_ok());
    }
}
