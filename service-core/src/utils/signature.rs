use hmac::{Hmac, Mac};
use sha2::Sha384;
use subtle::ConstantTimeEq;

type HmacSha384 = Hmac<Sha384>;

/// Generate a lowercase hex HMAC-SHA384 signature of `payload` under `secret`.
pub fn sign(secret: &[u8], payload: &str) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha384::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(payload.as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Compare two signatures without leaking the position of a mismatch.
///
/// Lengths are compared first; a length difference returns immediately since
/// the length of a hex digest is public. Equal-length inputs are compared
/// over their full length.
pub fn secure_compare(expected: &str, actual: &str) -> bool {
    let expected_bytes = expected.as_bytes();
    let actual_bytes = actual.as_bytes();

    if expected_bytes.len() != actual_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(actual_bytes).into()
}

/// Recompute the signature of `payload` and compare it to `signature`.
pub fn verify(secret: &[u8], payload: &str, signature: &str) -> Result<bool, anyhow::Error> {
    let expected = sign(secret, payload)?;
    Ok(secure_compare(&expected, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"campaign-psk-0001";

    #[test]
    fn test_signature_generation_and_verification() {
        let payload = "1700000000:spring-fair";

        let signature = sign(SECRET, payload).unwrap();
        // SHA-384 digest, hex encoded
        assert_eq!(signature.len(), 96);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert!(verify(SECRET, payload, &signature).unwrap());
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signature = sign(b"Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            signature,
            "af45d2e376484031617f78d2b58a6b1b9c7ef464f5a01b47e42ec3736322445e\
             8e2240ca5e69e2c78b3239ecfab21649"
        );
    }

    #[test]
    fn test_single_bit_mutation_fails() {
        let payload = "1700000000:spring-fair";
        let signature = sign(SECRET, payload).unwrap();

        for index in 0..signature.len() {
            let mut bytes = signature.clone().into_bytes();
            bytes[index] ^= 0x01;
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(!verify(SECRET, payload, &mutated).unwrap(), "index {}", index);
        }
    }

    #[test]
    fn test_tampered_payload() {
        let signature = sign(SECRET, "1700000000:spring-fair").unwrap();
        assert!(!verify(SECRET, "1700000001:spring-fair", &signature).unwrap());
        assert!(!verify(b"another-psk", "1700000000:spring-fair", &signature).unwrap());
    }

    #[test]
    fn test_secure_compare() {
        assert!(secure_compare("", ""));
        assert!(secure_compare("abc123", "abc123"));
        assert!(!secure_compare("abc123", "abc124"));
        assert!(!secure_compare("abc123", "abc12"));
        assert!(!secure_compare("abc", "abcabc"));
    }
}
