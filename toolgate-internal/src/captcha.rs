use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, ErrorDetails};

/// Server-side captcha verification (Turnstile-shaped siteverify API).
///
/// The secret is validated at startup; a missing key never turns into a
/// per-request failure.
pub struct CaptchaVerifier {
    http_client: reqwest::Client,
    verify_url: Url,
    secret: SecretString,
}

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

impl CaptchaVerifier {
    pub fn new(http_client: reqwest::Client, verify_url: Url, secret: SecretString) -> Self {
        Self {
            http_client,
            verify_url,
            secret,
        }
    }

    /// Check a visitor-supplied captcha token with the provider.
    ///
    /// Returns Ok(false) for a token the provider rejects; transport errors
    /// surface as `CaptchaVerification` so callers can tell "visitor failed
    /// the captcha" from "we could not check".
    pub async fn verify(&self, token: &str, remote_ip: Option<&str>) -> Result<bool, Error> {
        let mut form = vec![
            ("secret", self.secret.expose_secret().to_string()),
            ("response", token.to_string()),
        ];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip.to_string()));
        }

        let response = self
            .http_client
            .post(self.verify_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::CaptchaVerification {
                    message: format!("siteverify request failed: {e}"),
                })
            })?;

        let body: SiteverifyResponse = response.json().await.map_err(|e| {
            Error::new(ErrorDetails::CaptchaVerification {
                message: format!("siteverify response was not valid JSON: {e}"),
            })
        })?;

        if !body.success {
            tracing::debug!(error_codes = ?body.error_codes, "Captcha token rejected");
        }
        Ok(body.success)
    }
}
