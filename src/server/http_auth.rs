use axum::http::{header, header::HeaderMap};

pub(super) const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Access token from `Authorization: Bearer <token>`; the scheme is matched case-insensitively.
pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = header_str(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub(super) fn stripe_signature(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, STRIPE_SIGNATURE_HEADER)
}
