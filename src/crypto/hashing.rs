// This file is used to hash document bodies into the stored content hash.

use sha2::{Digest, Sha224};

/// Length in hex characters of every digest produced by [`hash_document`].
pub const DOCUMENT_HASH_LEN: usize = 56;

/// Hashes the raw bytes of a document body.
///
/// The digest only covers the body: metadata never contributes, so two writes
/// with the same body but different headers produce the same hash.
pub fn hash_document(body: &[u8]) -> String {
    let mut hasher = Sha224::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_document(br#"{"foo":"bar"}"#),
            "f1deb010c1d0d63e23208f2fad986f86055b20d1fc801204cad033fb"
        );
    }

    #[test]
    fn deterministic_and_sensitive_to_every_byte() {
        let body = b"{\"a\":1}".to_vec();
        assert_eq!(hash_document(&body), hash_document(&body));

        let mut changed = body.clone();
        changed[5] = b'2';
        assert_ne!(hash_document(&body), hash_document(&changed));
    }

    #[test]
    fn fixed_length_lowercase_hex() {
        for body in [&b""[..], b"x", &[0u8; 4096][..]] {
            let h = hash_document(body);
            assert_eq!(h.len(), DOCUMENT_HASH_LEN);
            assert!(h.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }
}
