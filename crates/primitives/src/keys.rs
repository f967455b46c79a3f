//! secp256k1 keys and compact signatures.
//!
//! Signatures are ECDSA over `SHA256(msg)` encoded as 64 bytes `r || s`.

use std::fmt;

use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature as EcdsaSignature, SigningKey, VerifyingKey,
};

use crate::{PrimitiveError, Result};

/// Length of a compressed public key
pub const PUBLIC_KEY_LEN: usize = 33;

/// Length of a compact signature
pub const SIGNATURE_LEN: usize = 64;

/// Compressed secp256k1 public key (33 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Wrap raw bytes, checking that they encode a curve point
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; PUBLIC_KEY_LEN] =
            bytes.try_into().map_err(|_| PrimitiveError::InvalidPublicKey)?;
        VerifyingKey::from_sec1_bytes(&raw).map_err(|_| PrimitiveError::InvalidPublicKey)?;
        Ok(Self(raw))
    }

    /// Wrap raw bytes without validating the point.
    ///
    /// An invalid point surfaces later as a verification failure.
    pub const fn from_array_unchecked(raw: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(raw)
    }

    /// Raw compressed encoding
    pub const fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Verify `signature` over `SHA256(msg)`.
    ///
    /// High-S signatures are accepted by normalizing them first.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<()> {
        let key =
            VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| PrimitiveError::InvalidPublicKey)?;
        let sig = EcdsaSignature::from_slice(&signature.0)
            .map_err(|_| PrimitiveError::InvalidSignatureEncoding)?;
        let sig = sig.normalize_s().unwrap_or(sig);
        key.verify(msg, &sig).map_err(|_| PrimitiveError::BadSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// Compact 64-byte ECDSA signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// Wrap raw `r || s` bytes
    pub const fn from_array(raw: [u8; SIGNATURE_LEN]) -> Self {
        Self(raw)
    }

    /// Wrap a slice that must be exactly 64 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; SIGNATURE_LEN] =
            bytes.try_into().map_err(|_| PrimitiveError::InvalidSignatureEncoding)?;
        Ok(Self(raw))
    }

    /// Raw `r || s` bytes
    pub const fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// secp256k1 signing key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        loop {
            let secret: [u8; 32] = rand::random();
            if let Ok(key) = SigningKey::from_slice(&secret) {
                return Self(key);
            }
        }
    }

    /// Load a key from its 32-byte secret scalar
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        SigningKey::from_slice(secret)
            .map(Self)
            .map_err(|_| PrimitiveError::InvalidPrivateKey)
    }

    /// 32-byte secret scalar
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    /// Compressed public key
    pub fn public_key(&self) -> PublicKey {
        let point = self.0.verifying_key().to_encoded_point(true);
        let mut raw = [0u8; PUBLIC_KEY_LEN];
        raw.copy_from_slice(point.as_bytes());
        PublicKey(raw)
    }

    /// Sign `SHA256(msg)`
    pub fn sign(&self, msg: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.0.sign(msg);
        let mut raw = [0u8; SIGNATURE_LEN];
        raw.copy_from_slice(&sig.to_bytes());
        Signature(raw)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&self.public_key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = PrivateKey::generate();
        let public = key.public_key();
        let sig = key.sign(b"statement");
        assert!(public.verify(b"statement", &sig).is_ok());
        assert_eq!(
            public.verify(b"other statement", &sig),
            Err(PrimitiveError::BadSignature)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = PrivateKey::generate();
        let other = PrivateKey::generate();
        let sig = signer.sign(b"msg");
        assert!(other.public_key().verify(b"msg", &sig).is_err());
    }

    #[test]
    fn test_public_key_is_compressed() {
        let key = PrivateKey::generate();
        let public = key.public_key();
        assert!(matches!(public.as_bytes()[0], 0x02 | 0x03));
        assert_eq!(PublicKey::from_bytes(public.as_bytes()).unwrap(), public);
    }

    #[test]
    fn test_invalid_public_key_rejected() {
        assert_eq!(
            PublicKey::from_bytes(&[0u8; 33]),
            Err(PrimitiveError::InvalidPublicKey)
        );
        assert_eq!(
            PublicKey::from_bytes(&[2u8; 10]),
            Err(PrimitiveError::InvalidPublicKey)
        );
        let sig = PrivateKey::generate().sign(b"msg");
        let bogus = PublicKey::from_array_unchecked([0u8; 33]);
        assert_eq!(bogus.verify(b"msg", &sig), Err(PrimitiveError::InvalidPublicKey));
    }

    #[test]
    fn test_private_key_roundtrip() {
        let key = PrivateKey::generate();
        let restored = PrivateKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(restored.public_key(), key.public_key());
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_signature_from_slice() {
        assert!(Signature::from_slice(&[0u8; 63]).is_err());
        assert!(Signature::from_slice(&[0u8; 64]).is_ok());
    }

    #[test]
    fn test_zero_signature_does_not_verify() {
        let key = PrivateKey::generate();
        let sig = Signature::from_array([0u8; 64]);
        assert!(key.public_key().verify(b"msg", &sig).is_err());
    }
}
