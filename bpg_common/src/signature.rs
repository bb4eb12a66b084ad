//! Canonical request signing for merchant API calls and outbound notifications.
//!
//! The scheme is shared by every party that holds the merchant secret: drop the signature field
//! and empty values, sort the remaining keys, join them as `key=value&` pairs, append
//! `key={secret}`, and hash. The digest is uppercase hex. Verification is fail-closed and uses a
//! constant-time comparison.

use std::collections::{BTreeMap, HashMap};

use md5::Md5;
use sha2::{Digest, Sha256};

/// The parameter carrying the signature itself.
pub const SIGN_FIELD: &str = "sign";

/// Parameters that never take part in the canonical string.
pub const EXCLUDED_FIELDS: [&str; 3] = [SIGN_FIELD, "client_ip", "debug"];

/// Digest algorithm for the canonical string. Merchants are provisioned with one of these; MD5 is
/// the long-standing default for this API surface.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SignAlgo {
    #[default]
    Md5,
    Sha256,
}

impl SignAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignAlgo::Md5 => "md5",
            SignAlgo::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for SignAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignAlgo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(SignAlgo::Md5),
            "sha256" | "sha-256" => Ok(SignAlgo::Sha256),
            other => Err(format!("Unknown signature algorithm: {other}")),
        }
    }
}

/// Builds the string that gets hashed: sorted `key=value&` pairs with empty values and excluded
/// fields removed, terminated by `key={secret}`.
pub fn canonical_string(params: &HashMap<String, String>, secret: &str) -> String {
    let sorted: BTreeMap<&str, &str> = params
        .iter()
        .filter(|(k, v)| !EXCLUDED_FIELDS.contains(&k.as_str()) && !v.is_empty())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let mut result = String::new();
    for (k, v) in sorted {
        result.push_str(k);
        result.push('=');
        result.push_str(v);
        result.push('&');
    }
    result.push_str("key=");
    result.push_str(secret);
    result
}

/// Signs the given parameters, returning the uppercase hex digest.
pub fn sign(params: &HashMap<String, String>, secret: &str, algo: SignAlgo) -> String {
    let payload = canonical_string(params, secret);
    match algo {
        SignAlgo::Md5 => hex::encode_upper(Md5::digest(payload.as_bytes())),
        SignAlgo::Sha256 => hex::encode_upper(Sha256::digest(payload.as_bytes())),
    }
}

/// Checks the `sign` field against the recomputed digest. A missing or empty signature fails.
pub fn verify(params: &HashMap<String, String>, secret: &str, algo: SignAlgo) -> bool {
    let given = match params.get(SIGN_FIELD) {
        Some(s) if !s.is_empty() => s.to_ascii_uppercase(),
        _ => return false,
    };
    let expected = sign(params, secret, algo);
    constant_time_eq(expected.as_bytes(), given.as_bytes())
}

/// Equality without an early exit, for comparing credentials. Differing lengths still return
/// immediately; the length of a digest or token is not a secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
