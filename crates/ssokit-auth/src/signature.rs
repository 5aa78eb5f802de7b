//! Keyed message authentication for canonical strings.
//!
//! Every message kind is reduced to a canonical byte string which is signed
//! with HMAC-MD5 under the shared api secret:
//!
//! ```text
//! signature = lowercase_hex(HMAC-MD5(api_secret, canonical_bytes))
//! ```
//!
//! The digest algorithm is kept for wire compatibility with existing
//! endpoints. Comparison of a provided signature against the recomputed one
//! runs in constant time.

use hmac::{Hmac, KeyInit, Mac};
use md5::Md5;
use subtle::ConstantTimeEq;

type HmacMd5 = Hmac<Md5>;

/// Length of a hex-encoded signature in characters.
pub const SIGNATURE_HEX_LEN: usize = 32;

/// Sign `canonical` with `secret` and return the lowercase hex digest.
///
/// # Examples
///
/// ```
/// use ssokit_auth::signature::sign;
///
/// let sig = sign(b"/user/fetch{}", b"secret");
/// assert_eq!(sig.len(), 32);
/// assert_eq!(sig, sign(b"/user/fetch{}", b"secret"));
/// ```
#[must_use]
pub fn sign(canonical: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacMd5::new_from_slice(secret).expect("HMAC can accept keys of any length");
    mac.update(canonical);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `provided` against the signature of `canonical` under `secret`.
///
/// The hex strings are compared in constant time. A provided value of the
/// wrong length or case never matches.
#[must_use]
pub fn verify(canonical: &[u8], secret: &[u8], provided: &str) -> bool {
    let expected = sign(canonical, secret);
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_match_rfc2202_hmac_md5_vector() {
        assert_eq!(
            sign(b"what do ya want for nothing?", b"Jefe"),
            "750c783e6ab0b503eaa86e310a5db738"
        );
    }

    #[test]
    fn test_should_be_deterministic() {
        let a = sign(b"/user/fetch{\"payload\":{}}", b"s1");
        let b = sign(b"/user/fetch{\"payload\":{}}", b"s1");
        assert_eq!(a, b);
        assert_eq!(a.len(), SIGNATURE_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_should_differ_for_different_secrets() {
        assert_ne!(sign(b"payload", b"s1"), sign(b"payload", b"s2"));
    }

    #[test]
    fn test_should_verify_matching_signature() {
        let sig = sign(b"canonical", b"secret");
        assert!(verify(b"canonical", b"secret", &sig));
    }

    #[test]
    fn test_should_reject_tampered_canonical_string() {
        let sig = sign(b"canonical", b"secret");
        assert!(!verify(b"canonicaL", b"secret", &sig));
    }

    #[test]
    fn test_should_reject_truncated_or_uppercased_signature() {
        let sig = sign(b"canonical", b"secret");
        assert!(!verify(b"canonical", b"secret", &sig[..31]));
        assert!(!verify(b"canonical", b"secret", &sig.to_uppercase()));
        assert!(!verify(b"canonical", b"secret", ""));
    }
}
