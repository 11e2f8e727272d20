use subtle::ConstantTimeEq;

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Compare a presented token against the configured secret in constant time.
///
/// An empty configured secret never matches, so an unset secret locks the
/// endpoint instead of opening it.
pub fn verify_shared_secret(expected: &str, presented: &str) -> bool {
    if expected.is_empty() {
        return false;
    }

    let expected_bytes = expected.as_bytes();
    let presented_bytes = presented.as_bytes();

    if expected_bytes.len() != presented_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(presented_bytes).into()
}
