//! Key management and proof-of-work validation.
//!
//! Ed25519 signing keys double as account identities: the 32-byte verifying
//! key is the account address. Signatures are 64 bytes, detached, over the
//! 32-byte block or vote hash.

use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::Epoch;
use crate::{hash_concat, Account, Hash};

/// A detached Ed25519 signature (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes_64")] pub [u8; 64]);

impl Signature {
    /// The all-zero signature, used on unsigned test blocks. Always fails
    /// verification.
    pub fn empty() -> Self {
        Signature([0u8; 64])
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature::empty()
    }
}

/// Fixed-size serde helper; bincode has no native [u8; 64] support through
/// serde's tuple path at this width.
mod serde_bytes_64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        bytes.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let v: Vec<u8> = Vec::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64-byte signature"))
    }
}

/// Secret half of a signing keypair, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct SecretBytes([u8; 32]);

/// An Ed25519 keypair whose public key is the account address.
#[derive(Clone)]
pub struct Keypair {
    public: Account,
    secret: SecretBytes,
}

impl Keypair {
    /// Generate a keypair from OS randomness.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut seed[..]);
        Self::from_seed(seed)
    }

    /// Derive a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = ed25519_dalek::SigningKey::from_bytes(&seed);
        Keypair {
            public: signing.verifying_key().to_bytes(),
            secret: SecretBytes(seed),
        }
    }

    /// The account address.
    pub fn public(&self) -> Account {
        self.public
    }

    /// Sign a 32-byte digest.
    pub fn sign(&self, digest: &Hash) -> Signature {
        let signing = ed25519_dalek::SigningKey::from_bytes(&self.secret.0);
        Signature(signing.sign(digest).to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({})", hex::encode(&self.public[..8]))
    }
}

/// Verify a detached signature over a 32-byte digest.
pub fn verify(account: &Account, digest: &Hash, signature: &Signature) -> bool {
    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(account) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    key.verify(digest, &sig).is_ok()
}

/// 64-bit proof-of-work nonce attached to every block.
pub type WorkNonce = u64;

/// Difficulty of a nonce against a root: the little-endian u64 prefix of a
/// domain-separated hash over (nonce, root). Higher is harder.
pub fn work_value(root: &Hash, work: WorkNonce) -> u64 {
    let digest = hash_concat(&[b"weave.work", &work.to_le_bytes(), root]);
    u64::from_le_bytes(digest[..8].try_into().expect("digest shorter than 8 bytes"))
}

/// Per-epoch work difficulty thresholds. Receive-side blocks get a lower
/// bar in epoch 2, matching their lower spam value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WorkThresholds {
    pub epoch_1: u64,
    pub epoch_2: u64,
    pub epoch_2_receive: u64,
}

impl WorkThresholds {
    /// Production thresholds.
    pub fn full() -> Self {
        WorkThresholds {
            epoch_1: 0xffff_ffc0_0000_0000,
            epoch_2: 0xffff_fff8_0000_0000,
            epoch_2_receive: 0xffff_fe00_0000_0000,
        }
    }

    /// Development thresholds: roughly half of random nonces pass, so work
    /// generation and deliberate failure are both cheap in tests.
    pub fn dev() -> Self {
        WorkThresholds {
            epoch_1: 0x8000_0000_0000_0000,
            epoch_2: 0x8000_0000_0000_0000,
            epoch_2_receive: 0x8000_0000_0000_0000,
        }
    }

    /// Threshold for a block of the given epoch and direction.
    pub fn threshold(&self, epoch: Epoch, is_receive: bool) -> u64 {
        match epoch {
            Epoch::Epoch0 | Epoch::Epoch1 => self.epoch_1,
            Epoch::Epoch2 => {
                if is_receive {
                    self.epoch_2_receive
                } else {
                    self.epoch_2
                }
            }
        }
    }

    /// The hardest bar any epoch imposes; blocks entering elections before
    /// their epoch is known are validated against the base threshold.
    pub fn base(&self) -> u64 {
        self.epoch_1
    }

    /// Whether `work` meets the bar for `root` at the given epoch/direction.
    pub fn validate(&self, root: &Hash, work: WorkNonce, epoch: Epoch, is_receive: bool) -> bool {
        work_value(root, work) >= self.threshold(epoch, is_receive)
    }
}

/// Search nonces until one meets `threshold` for `root`.
///
/// Only suitable for dev thresholds; production work generation is an
/// external concern.
pub fn generate_work(root: &Hash, threshold: u64) -> WorkNonce {
    let mut nonce: WorkNonce = rand::Rng::gen(&mut rand::thread_rng());
    while work_value(root, nonce) < threshold {
        nonce = nonce.wrapping_add(1);
    }
    nonce
}

/// Search nonces until one fails `threshold` for `root`. Test helper for
/// exercising the insufficient-work rejection.
pub fn generate_insufficient_work(root: &Hash, threshold: u64) -> WorkNonce {
    let mut nonce: WorkNonce = rand::Rng::gen(&mut rand::thread_rng());
    while work_value(root, nonce) >= threshold {
        nonce = nonce.wrapping_add(1);
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let keypair = Keypair::generate();
        let digest = crate::hash_domain(b"weave.test", b"message");
        let sig = keypair.sign(&digest);
        assert!(verify(&keypair.public(), &digest, &sig));
        let other = crate::hash_domain(b"weave.test", b"other");
        assert!(!verify(&keypair.public(), &other, &sig));
    }

    #[test]
    fn empty_signature_fails() {
        let keypair = Keypair::generate();
        let digest = crate::hash_domain(b"weave.test", b"message");
        assert!(!verify(&keypair.public(), &digest, &Signature::empty()));
    }

    #[test]
    fn from_seed_is_deterministic() {
        let a = Keypair::from_seed([7u8; 32]);
        let b = Keypair::from_seed([7u8; 32]);
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn dev_work_generation() {
        let thresholds = WorkThresholds::dev();
        let root = crate::hash_domain(b"weave.test", b"root");
        let work = generate_work(&root, thresholds.base());
        assert!(thresholds.validate(&root, work, Epoch::Epoch0, false));
        let bad = generate_insufficient_work(&root, thresholds.base());
        assert!(!thresholds.validate(&root, bad, Epoch::Epoch0, false));
    }

    #[test]
    fn work_value_depends_on_root() {
        let a = crate::hash_domain(b"weave.test", b"a");
        let b = crate::hash_domain(b"weave.test", b"b");
        assert_ne!(work_value(&a, 42), work_value(&b, 42));
    }

    #[test]
    fn signature_serde_roundtrip() {
        let keypair = Keypair::generate();
        let digest = crate::hash_domain(b"weave.test", b"serde");
        let sig = keypair.sign(&digest);
        let bytes = bincode::serde::encode_to_vec(sig, bincode::config::legacy())
            .expect("signature encodes");
        let (decoded, _): (Signature, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())
                .expect("signature decodes");
        assert_eq!(sig, decoded);
    }
}
