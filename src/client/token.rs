//! Expiry extraction from access tokens.
//!
//! The client only needs the `exp` claim to schedule its renewal; signature
//! verification stays on the server. The payload segment is decoded as plain
//! base64url JSON, no key material involved.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value as JsonValue;

/// Read the `exp` claim (unix seconds) out of a JWT-shaped access token.
pub(crate) fn access_token_expiry(token: &str) -> Result<i64> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow!("access token is not in header.payload.signature form"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .context("access token payload is not valid base64url")?;
    let claims: JsonValue =
        serde_json::from_slice(&bytes).context("access token payload is not valid JSON")?;
    claims
        .get("exp")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| anyhow!("access token has no numeric exp claim"))
}

#[cfg(test)]
pub(crate) fn unsigned_token_with_expiry(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "exp": exp, "sub": "test" })
            .to_string()
            .as_bytes(),
    );
    format!("{header}.{payload}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_exp_from_well_formed_token() {
        let token = unsigned_token_with_expiry(1_900_000_000);
        assert_eq!(access_token_expiry(&token).expect("exp"), 1_900_000_000);
    }

    #[test]
    fn rejects_tokens_without_three_segments() {
        assert!(access_token_expiry("only-one-segment").is_err());
    }

    #[test]
    fn rejects_non_json_payloads() {
        let payload = URL_SAFE_NO_PAD.encode(b"not json");
        assert!(access_token_expiry(&format!("h.{payload}.s")).is_err());
    }

    #[test]
    fn rejects_missing_exp_claim() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"test"}"#);
        assert!(access_token_expiry(&format!("h.{payload}.s")).is_err());
    }
}
