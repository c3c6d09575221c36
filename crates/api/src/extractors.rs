//! Origin allow-listing for WS upgrades: checked once at
//! upgrade time against `Settings.allowed_origins`, not cached. An empty
//! allow-list means "accept everything" — the operator opted out of the
//! check by leaving `ALLOWED_ORIGINS` unset.

use axum::http::{HeaderMap, StatusCode};

/// Rejects with `403` when the allow-list is non-empty and either no
/// `Origin` header was sent or it doesn't match any entry.
pub fn verify_origin(headers: &HeaderMap, allowed_origins: &[String]) -> Result<(), StatusCode> {
    if allowed_origins.is_empty() {
        return Ok(());
    }

    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok());

    match origin {
        Some(origin) if allowed_origins.iter().any(|o| o == origin) => Ok(()),
        _ => Err(StatusCode::FORBIDDEN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_accepts_everything() {
        let headers = HeaderMap::new();
        assert!(verify_origin(&headers, &[]).is_ok());
    }

    #[test]
    fn rejects_missing_origin_when_list_configured() {
        let headers = HeaderMap::new();
        assert_eq!(verify_origin(&headers, &["https://example.com".to_string()]), Err(StatusCode::FORBIDDEN));
    }

    #[test]
    fn accepts_matching_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ORIGIN, "https://example.com".parse().unwrap());
        assert!(verify_origin(&headers, &["https://example.com".to_string()]).is_ok());
    }

    #[test]
    fn rejects_non_matching_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::ORIGIN, "https://evil.example".parse().unwrap());
        assert_eq!(verify_origin(&headers, &["https://example.com".to_string()]), Err(StatusCode::FORBIDDEN));
    }
}
