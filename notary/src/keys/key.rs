use std::fmt;

use ed25519_dalek::{
    PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, SIGNATURE_LENGTH, Signature, Signer, SigningKey,
    Verifier, VerifyingKey,
};
use rand::rngs::OsRng;

/// DER prefix of an Ed25519 `SubjectPublicKeyInfo`, followed by the 32 raw key bytes.
const SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Length in bytes of an encoded public key.
pub const PUBLIC_KEY_BYTES: usize = SPKI_PREFIX.len() + PUBLIC_KEY_LENGTH;

/// Length in bytes of a signature.
pub const SIGNATURE_BYTES: usize = SIGNATURE_LENGTH;

/// Length of a public key in hex characters.
pub const PUBLIC_KEY_HEX_LEN: usize = 2 * PUBLIC_KEY_BYTES;

/// Length of a signature in hex characters.
pub const SIGNATURE_HEX_LEN: usize = 2 * SIGNATURE_BYTES;

/// Ed25519 signing identity.
///
/// The public key is kept pre-encoded since it is attached to every signed record. Keys are moved
/// between the pool and its borrowers and are never cloned.
pub struct Key {
    public_key: String,
    signing_key: SigningKey,
}

impl Key {
    /// Generates a new key from the operating system RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Builds a key from raw secret bytes.
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = encode_public_key(&signing_key.verifying_key());
        Self {
            public_key,
            signing_key,
        }
    }

    /// Returns the upper-case hex encoded DER public key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Signs `message` and returns the signature as upper-case hex.
    ///
    /// Ed25519 signatures are deterministic, the same message always yields the same signature.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode_upper(self.signing_key.sign(message).to_bytes())
    }

    /// Checks `signature` against `message` with this key.
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        verify_with(&self.signing_key.verifying_key(), message, signature)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Checks a hex `signature` of `message` against a hex encoded DER `public_key`.
///
/// Malformed input of any kind yields `false`.
pub fn verify(message: &[u8], signature: &str, public_key: &str) -> bool {
    match decode_public_key(public_key) {
        Some(verifying_key) => verify_with(&verifying_key, message, signature),
        None => false,
    }
}

fn verify_with(verifying_key: &VerifyingKey, message: &[u8], signature: &str) -> bool {
    let Some(signature) = decode_signature(signature) else {
        return false;
    };

    verifying_key.verify(message, &signature).is_ok()
}

fn encode_public_key(verifying_key: &VerifyingKey) -> String {
    let mut der = Vec::with_capacity(PUBLIC_KEY_BYTES);
    der.extend_from_slice(&SPKI_PREFIX);
    der.extend_from_slice(verifying_key.as_bytes());

    hex::encode_upper(der)
}

fn decode_public_key(public_key: &str) -> Option<VerifyingKey> {
    let der = hex::decode(public_key).ok()?;
    let raw: [u8; PUBLIC_KEY_LENGTH] = der.strip_prefix(SPKI_PREFIX.as_slice())?.try_into().ok()?;

    VerifyingKey::from_bytes(&raw).ok()
}

fn decode_signature(signature: &str) -> Option<Signature> {
    let bytes = hex::decode(signature).ok()?;
    let bytes: [u8; SIGNATURE_BYTES] = bytes.as_slice().try_into().ok()?;

    Some(Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_have_fixed_lengths() {
        let key = Key::generate();
        let signature = key.sign(b"hello");

        assert_eq!(key.public_key().len(), PUBLIC_KEY_HEX_LEN);
        assert_eq!(PUBLIC_KEY_HEX_LEN, 88);
        assert_eq!(signature.len(), SIGNATURE_HEX_LEN);
        assert_eq!(SIGNATURE_HEX_LEN, 128);
        assert!(key.public_key().starts_with("302A300506032B6570032100"));
        assert!(
            signature
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn signing_is_deterministic() {
        let key = Key::from_secret_bytes(&[7; SECRET_KEY_LENGTH]);
        assert_eq!(key.sign(b"message"), key.sign(b"message"));
        assert_ne!(key.sign(b"message"), key.sign(b"other message"));
    }

    #[test]
    fn signatures_verify_against_the_public_key_text() {
        let key = Key::generate();
        let signature = key.sign(b"payload");

        assert!(verify(b"payload", &signature, key.public_key()));
        assert!(key.verify(b"payload", &signature));
        assert!(!verify(b"tampered", &signature, key.public_key()));
        assert!(!verify(b"payload", &signature, Key::generate().public_key()));
    }

    #[test]
    fn malformed_input_does_not_verify() {
        let key = Key::generate();
        let signature = key.sign(b"payload");

        assert!(!verify(b"payload", "not hex", key.public_key()));
        assert!(!verify(b"payload", &signature[..64], key.public_key()));
        assert!(!verify(b"payload", &signature, "ABCD"));
        assert!(!verify(b"payload", &signature, &key.public_key()[24..]));
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let key = Key::from_secret_bytes(&[1; SECRET_KEY_LENGTH]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains(key.public_key()));
        assert!(!rendered.contains("signing_key"));
    }
}
