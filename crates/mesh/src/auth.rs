//! HMAC token signing and verification for inter-node auth.
//!
//! Every mesh HTTP call carries a `mesh_token`: an HMAC-SHA256 signature
//! over a millisecond timestamp. Nodes sharing the same secret verify each
//! other without any central auth service.
//!
//! Format: `"<unix_ms>.<lowercase-hex signature>"`, valid ±60 s.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Tokens are valid for 60 seconds to account for clock skew.
pub const TOKEN_TTL_MS: i64 = 60_000;

fn signature(secret: &str, timestamp_ms: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp_ms.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Create a mesh token for the current moment.
pub fn sign_mesh_token(secret: &str) -> String {
    sign_mesh_token_at(secret, chrono::Utc::now().timestamp_millis())
}

/// Create a mesh token for an explicit timestamp (tests, clock control).
pub fn sign_mesh_token_at(secret: &str, timestamp_ms: i64) -> String {
    format!("{timestamp_ms}.{}", signature(secret, timestamp_ms))
}

/// Verify signature validity and timestamp freshness, in constant time.
pub fn verify_mesh_token(token: &str, secret: &str) -> bool {
    verify_mesh_token_at(token, secret, chrono::Utc::now().timestamp_millis())
}

pub fn verify_mesh_token_at(token: &str, secret: &str, now_ms: i64) -> bool {
    let Some((ts_str, sig)) = token.split_once('.') else {
        return false;
    };
    let Ok(ts) = ts_str.parse::<i64>() else {
        return false;
    };

    if (now_ms - ts).abs() > TOKEN_TTL_MS {
        tracing::debug!(age_ms = (now_ms - ts).abs(), "mesh token outside freshness window");
        return false;
    }

    let expected = signature(secret, ts);
    bool::from(sig.as_bytes().ct_eq(expected.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shared-mesh-secret";

    #[test]
    fn token_verifies_within_the_window() {
        let t = 1_700_000_000_000;
        let token = sign_mesh_token_at(SECRET, t);
        assert!(verify_mesh_token_at(&token, SECRET, t));
        assert!(verify_mesh_token_at(&token, SECRET, t + TOKEN_TTL_MS));
        assert!(verify_mesh_token_at(&token, SECRET, t - TOKEN_TTL_MS));
    }

    #[test]
    fn token_expires_outside_the_window() {
        let t = 1_700_000_000_000;
        let token = sign_mesh_token_at(SECRET, t);
        assert!(!verify_mesh_token_at(&token, SECRET, t + TOKEN_TTL_MS + 1));
        assert!(!verify_mesh_token_at(&token, SECRET, t - TOKEN_TTL_MS - 1));
    }

    #[test]
    fn wrong_secret_never_verifies() {
        let t = 1_700_000_000_000;
        let token = sign_mesh_token_at(SECRET, t);
        assert!(!verify_mesh_token_at(&token, "other-secret", t));
    }

    #[test]
    fn malformed_tokens_never_verify() {
        let now = 1_700_000_000_000;
        assert!(!verify_mesh_token_at("", SECRET, now));
        assert!(!verify_mesh_token_at("no-dot-here", SECRET, now));
        assert!(!verify_mesh_token_at("notanumber.abcd", SECRET, now));
        assert!(!verify_mesh_token_at("1700000000000.", SECRET, now));
    }
}
