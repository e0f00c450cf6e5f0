use axum::http::header::{HeaderValue, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::authz::client_ip;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{AppState, StructuredJson};
use crate::session::{build_session_cookie, hash_ip, parse_session_cookie};

/// POST /session
///
/// Returns the visitor's session, creating one if the request carries no
/// valid session cookie. Always re-sends the cookie so the client's copy
/// stays fresh.
pub async fn create_session_handler(
    axum::extract::State(state): AppState,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let ip_hashed = hash_ip(&client_ip(&headers));

    let existing = session_id_from_headers(&headers);
    let session_id = match existing {
        Some(id) if state.session_store.is_valid(&id).await? => id,
        _ => state.session_store.create_session(&ip_hashed).await?.id,
    };

    let body = json!({ "success": true, "sessionId": session_id });
    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.headers_mut().insert(
        SET_COOKIE,
        cookie_header_value(&session_id, state.config.secure_cookies)?,
    );
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct CaptchaParams {
    pub token: String,
}

/// POST /session/captcha
///
/// Verifies the captcha token with the provider and flags the session.
pub async fn verify_captcha_handler(
    axum::extract::State(state): AppState,
    headers: HeaderMap,
    StructuredJson(params): StructuredJson<CaptchaParams>,
) -> Result<Json<serde_json::Value>, Error> {
    let session_id =
        session_id_from_headers(&headers).ok_or_else(|| Error::new(ErrorDetails::NoSession))?;
    let session = state
        .session_store
        .get_session(&session_id)
        .await?
        .ok_or_else(|| Error::new(ErrorDetails::SessionExpired))?;
    if session.is_expired(Utc::now()) {
        return Err(Error::new(ErrorDetails::SessionExpired));
    }

    let ip = client_ip(&headers);
    let passed = state
        .captcha_verifier
        .verify(&params.token, Some(&ip))
        .await?;
    if !passed {
        return Err(Error::new(ErrorDetails::CaptchaRequired));
    }

    state.session_store.mark_captcha_passed(&session_id).await?;
    Ok(Json(json!({ "success": true })))
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_session_cookie)
        .map(str::to_owned)
}

fn cookie_header_value(session_id: &str, secure: bool) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(&build_session_cookie(session_id, secure)).map_err(|e| {
        Error::new(ErrorDetails::InternalError {
            message: format!("Failed to build Set-Cookie header: {e}"),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            "theme=dark; toolgate_session=cafe01".parse().unwrap(),
        );
        assert_eq!(session_id_from_headers(&headers), Some("cafe01".to_string()));
        assert_eq!(session_id_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn test_cookie_header_value_is_valid() {
        let value = cookie_header_value("cafe01", true).unwrap();
        assert!(value.to_str().unwrap().starts_with("toolgate_session=cafe01"));
    }
}
