//! Transaction-PIN hashing.
//!
//! The PIN is a second factor for wallet-to-wallet transfers, distinct from
//! session authentication. Stored as
//! `pbkdf2-sha256$<iterations>$<salt-hex>$<hash-hex>` and compared in
//! constant time.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

const ALGORITHM: &str = "pbkdf2-sha256";
const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

pub fn hash_pin(pin: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), &salt, ITERATIONS, &mut out);
    format!(
        "{}${}${}${}",
        ALGORITHM,
        ITERATIONS,
        hex::encode(salt),
        hex::encode(out)
    )
}

pub fn verify_pin(pin: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(algorithm), Some(iterations), Some(salt), Some(hash)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if algorithm != ALGORITHM {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(hash)) else {
        return false;
    };

    let mut out = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), &salt, iterations, &mut out);
    secure_eq(&out, &expected)
}

/// Constant-time byte comparison.
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_round_trips() {
        let encoded = hash_pin("4821");
        assert!(verify_pin("4821", &encoded));
        assert!(!verify_pin("4822", &encoded));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_pin("4821"), hash_pin("4821"));
    }

    #[test]
    fn malformed_encodings_never_verify() {
        assert!(!verify_pin("4821", ""));
        assert!(!verify_pin("4821", "plain$garbage"));
        assert!(!verify_pin("4821", "md5$1000$zz$zz"));
    }

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }
}
