//! Access token inspection.
//!
//! Tokens are three dot-separated segments; the middle one is base64url JSON
//! with an `exp` claim in seconds. Nothing here verifies signatures, it only
//! decides whether a stored token is still worth sending.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Decode the claims segment. `None` for anything malformed.
pub fn decode_claims(token: &str) -> Option<Value> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }
    // Accept standard-alphabet and padded encodings as well.
    let normalized: String = segments[1]
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let bytes = URL_SAFE_NO_PAD.decode(normalized.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// The `exp` claim in epoch seconds, when present and numeric.
pub fn token_expiry(token: &str) -> Option<f64> {
    decode_claims(token)?.get("exp")?.as_f64()
}

/// Valid iff decodable and `exp` is strictly after `now_secs`.
pub fn is_valid_token(token: &str, now_secs: i64) -> bool {
    match token_expiry(token) {
        Some(exp) => exp > now_secs as f64,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    const NOW: i64 = 1_700_000_000;

    fn token_with(claims: &str) -> String {
        format!(
            "eyJhbGciOiJFUzI1NksifQ.{}.c2lnbmF0dXJl",
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_future_exp_is_valid() {
        let token = token_with(&format!(r#"{{"sub":"0xabc","exp":{}}}"#, NOW + 60));
        assert!(is_valid_token(&token, NOW));
    }

    #[test]
    fn test_exp_equal_to_now_is_invalid() {
        let token = token_with(&format!(r#"{{"exp":{}}}"#, NOW));
        assert!(!is_valid_token(&token, NOW));
    }

    #[test]
    fn test_padded_standard_alphabet_is_accepted() {
        // ">>>" encodes to "Pj4+" in the standard alphabet.
        let claims = format!(r#"{{"exp":{},"n":">>>"}}"#, NOW + 1);
        let token = format!("h.{}.s", STANDARD.encode(claims));
        assert!(is_valid_token(&token, NOW));
    }

    #[test]
    fn test_malformed_tokens_are_invalid() {
        let cases = [
            String::new(),
            "no-dots".to_string(),
            "one.dot".to_string(),
            "a.b.c.d".to_string(),
            "a.!!!not-base64!!!.c".to_string(),
            format!("a.{}.c", URL_SAFE_NO_PAD.encode("not json")),
            token_with(r#"{"sub":"0xabc"}"#),
            token_with(r#"{"exp":"tomorrow"}"#),
            token_with(r#"[1,2,3]"#),
        ];
        for token in cases {
            assert!(!is_valid_token(&token, NOW), "accepted {:?}", token);
        }
    }

    #[test]
    fn test_token_expiry_reads_claim() {
        let token = token_with(r#"{"exp":1234}"#);
        assert_eq!(token_expiry(&token), Some(1234.0));
    }
}
