//! Operator credentials and secp256k1 signer recovery
//!
//! Both chain families sign with recoverable secp256k1 ECDSA over a 32-byte
//! prehash. Signatures travel as hex `r || s || v` (v = 27 + recovery id).
//! - Hive family: the signer is the recovered compressed public key
//! - Ethereum family: the digest is EIP-191 prefixed and the signer is the
//!   recovered address

use crate::error::ChainError;
use crate::types::ChainFamily;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use sha3::Keccak256;
use std::fmt;

/// 32-byte action or message digest
pub type Digest = [u8; 32];

pub fn sha256(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn keccak256(data: &[u8]) -> Digest {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// `personal_sign` hash of a 32-byte digest
pub fn eip191_hash(digest: &Digest) -> Digest {
    let mut data = Vec::with_capacity(28 + 32);
    data.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
    data.extend_from_slice(digest);
    keccak256(&data)
}

/// Validate and lowercase a 0x-prefixed 20-byte address
pub fn normalize_address(address: &str) -> Result<String, ChainError> {
    let body = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| ChainError::InvalidAddress(address.to_string()))?;
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::InvalidAddress(address.to_string()));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// Decode a normalized address into its 20 bytes
pub fn address_bytes(address: &str) -> Result<[u8; 20], ChainError> {
    let normalized = normalize_address(address)?;
    let raw = hex::decode(&normalized[2..])
        .map_err(|_| ChainError::InvalidAddress(address.to_string()))?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&raw);
    Ok(out)
}

fn address_from_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 tag
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Compressed secp256k1 public key, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(String);

impl PublicKey {
    /// Parse a SEC1 key (compressed or not) into its canonical compressed form
    pub fn from_hex(value: &str) -> Result<Self, ChainError> {
        let raw = hex::decode(value.trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidKey(e.to_string()))?;
        let key = VerifyingKey::from_sec1_bytes(&raw)
            .map_err(|_| ChainError::InvalidKey(value.to_string()))?;
        Ok(Self::from_verifying_key(&key))
    }

    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(hex::encode(key.to_encoded_point(true).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Destination chain address controlled by this key
    pub fn address(&self) -> Result<String, ChainError> {
        let raw = hex::decode(&self.0).map_err(|e| ChainError::InvalidKey(e.to_string()))?;
        let key = VerifyingKey::from_sec1_bytes(&raw)
            .map_err(|_| ChainError::InvalidKey(self.0.clone()))?;
        Ok(address_from_key(&key))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity a signature recovers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Signer {
    PublicKey(PublicKey),
    Address(String),
}

/// The local operator's account name and signing key
#[derive(Clone)]
pub struct OperatorCredential {
    username: String,
    key: SigningKey,
}

impl fmt::Debug for OperatorCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorCredential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl OperatorCredential {
    /// Load from a hex encoded 32-byte secret
    pub fn from_hex(username: impl Into<String>, secret: &str) -> Result<Self, ChainError> {
        let raw = hex::decode(secret.trim_start_matches("0x"))
            .map_err(|e| ChainError::InvalidKey(e.to_string()))?;
        let key = SigningKey::from_slice(&raw)
            .map_err(|_| ChainError::InvalidKey("secret is not a valid scalar".to_string()))?;
        Ok(Self {
            username: username.into(),
            key,
        })
    }

    pub fn generate(username: impl Into<String>, rng: &mut impl CryptoRngCore) -> Self {
        Self {
            username: username.into(),
            key: SigningKey::random(rng),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.key.verifying_key())
    }

    pub fn address(&self) -> String {
        address_from_key(self.key.verifying_key())
    }

    /// Sign a raw 32-byte prehash, returning hex `r || s || v`
    pub fn sign_prehash(&self, prehash: &Digest) -> Result<String, ChainError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(prehash)
            .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(recovery_id.to_byte() + 27);
        Ok(hex::encode(out))
    }
}

/// Recover the public key behind a hex `r || s || v` signature
pub fn recover_public_key(prehash: &Digest, signature: &str) -> Result<VerifyingKey, ChainError> {
    let raw = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;
    if raw.len() != 65 {
        return Err(ChainError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            raw.len()
        )));
    }

    let v = match raw[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        v => return Err(ChainError::InvalidSignature(format!("bad recovery byte {}", v))),
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| ChainError::InvalidSignature(format!("bad recovery byte {}", v)))?;
    let sig = Signature::from_slice(&raw[..64])
        .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;

    VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|e| ChainError::InvalidSignature(e.to_string()))
}

impl ChainFamily {
    /// Hash actually signed for an action digest
    pub fn signing_hash(&self, digest: &Digest) -> Digest {
        match self {
            ChainFamily::Hive => *digest,
            ChainFamily::Ethereum => eip191_hash(digest),
        }
    }

    pub fn sign(&self, credential: &OperatorCredential, digest: &Digest) -> Result<String, ChainError> {
        credential.sign_prehash(&self.signing_hash(digest))
    }

    pub fn recover(&self, digest: &Digest, signature: &str) -> Result<Signer, ChainError> {
        let key = recover_public_key(&self.signing_hash(digest), signature)?;
        Ok(match self {
            ChainFamily::Hive => Signer::PublicKey(PublicKey::from_verifying_key(&key)),
            ChainFamily::Ethereum => Signer::Address(address_from_key(&key)),
        })
    }

    /// Identity a registered key must recover to on this family
    pub fn expected_signer(&self, key: &PublicKey) -> Result<Signer, ChainError> {
        Ok(match self {
            ChainFamily::Hive => Signer::PublicKey(key.clone()),
            ChainFamily::Ethereum => Signer::Address(key.address()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(name: &str) -> OperatorCredential {
        OperatorCredential::generate(name, &mut rand::thread_rng())
    }

    #[test]
    fn test_sign_and_recover_both_families() {
        let alice = credential("alice");
        let digest = sha256(b"mint 1.000 HIVE");

        for family in [ChainFamily::Hive, ChainFamily::Ethereum] {
            let signature = family.sign(&alice, &digest).unwrap();
            let recovered = family.recover(&digest, &signature).unwrap();
            let expected = family.expected_signer(&alice.public_key()).unwrap();
            assert_eq!(recovered, expected);
        }
    }

    #[test]
    fn test_other_digest_recovers_someone_else() {
        let alice = credential("alice");
        let signature = ChainFamily::Hive.sign(&alice, &sha256(b"one")).unwrap();
        let recovered = ChainFamily::Hive.recover(&sha256(b"two"), &signature);
        let expected = Signer::PublicKey(alice.public_key());
        assert!(recovered.map(|s| s != expected).unwrap_or(true));
    }

    #[test]
    fn test_recovery_byte_accepts_zero_based() {
        let alice = credential("alice");
        let digest = keccak256(b"payload");
        let signature = alice.sign_prehash(&digest).unwrap();
        let mut raw = hex::decode(&signature).unwrap();
        raw[64] -= 27;
        let key = recover_public_key(&digest, &hex::encode(raw)).unwrap();
        assert_eq!(PublicKey::from_verifying_key(&key), alice.public_key());
    }

    #[test]
    fn test_malformed_signatures_rejected() {
        let digest = sha256(b"x");
        assert!(recover_public_key(&digest, "zz").is_err());
        assert!(recover_public_key(&digest, &"00".repeat(64)).is_err());
        assert!(recover_public_key(&digest, &format!("{}05", "11".repeat(64))).is_err());
    }

    #[test]
    fn test_credential_roundtrip_from_hex() {
        let secret = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let cred = OperatorCredential::from_hex("op", secret).unwrap();
        let again = OperatorCredential::from_hex("op", &format!("0x{}", secret)).unwrap();
        assert_eq!(cred.public_key(), again.public_key());
        assert_eq!(cred.public_key().address().unwrap(), cred.address());
        assert_eq!(
            PublicKey::from_hex(cred.public_key().as_str()).unwrap(),
            cred.public_key()
        );
        assert!(OperatorCredential::from_hex("op", "00").is_err());
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("0xABCDEF0123456789abcdef0123456789ABCDEF01").unwrap(),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
        assert!(normalize_address("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address("0xgggggg0123456789abcdef0123456789abcdef01").is_err());
    }
}
