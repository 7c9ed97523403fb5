// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FARM POWER MANAGER (FPM) - CRYPTOGRAPHY MODULE
//
// Node identity built on Ed25519 (RFC 8032).
// - Identity loading from a hex seed file (or raw 32-byte seed)
// - Message signing and verification
// - Signed HTTP request/response payloads (see `signed`)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::path::Path;
use zeroize::Zeroizing;

pub mod signed;

/// Ed25519 seed length in bytes.
pub const SEED_LEN: usize = 32;

#[derive(Debug)]
pub enum CryptoError {
    InvalidKey,
    KeyFile(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CryptoError::InvalidKey => write!(f, "Invalid key format"),
            CryptoError::KeyFile(msg) => write!(f, "Key file error: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}

/// A node's signing key pair.
/// Loaded once at startup, read-only for the process lifetime.
pub struct Identity {
    signing: SigningKey,
}

impl Identity {
    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Identity {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build an identity from a 32-byte seed
    pub fn from_seed(seed: &[u8]) -> Result<Self, CryptoError> {
        let seed: [u8; SEED_LEN] = seed.try_into().map_err(|_| CryptoError::InvalidKey)?;
        let seed = Zeroizing::new(seed);
        Ok(Identity {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let bytes =
            Zeroizing::new(hex::decode(seed_hex.trim()).map_err(|_| CryptoError::InvalidKey)?);
        Self::from_seed(&bytes)
    }

    /// Load identity from disk.
    ///
    /// Accepts either the hex-encoded seed (optionally newline terminated)
    /// or the raw 32 seed bytes.
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        let raw = Zeroizing::new(
            std::fs::read(path)
                .map_err(|e| CryptoError::KeyFile(format!("{}: {}", path.display(), e)))?,
        );

        if raw.len() == SEED_LEN {
            return Self::from_seed(&raw);
        }

        let text = std::str::from_utf8(&raw).map_err(|_| CryptoError::InvalidKey)?;
        Self::from_seed_hex(text)
    }

    /// Persist the seed as hex. The file is owner-readable only before any
    /// key material is written.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        use std::io::Write;

        let key_file_err =
            |e: std::io::Error| CryptoError::KeyFile(format!("{}: {}", path.display(), e));
        let encoded = Zeroizing::new(hex::encode(self.signing.to_bytes()));

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(key_file_err)?;

        // `mode` only applies on creation; tighten a pre-existing file too
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(key_file_err)?;
        }

        file.write_all(encoded.as_bytes()).map_err(key_file_err)?;
        Ok(())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Verify an Ed25519 signature. Malformed keys or signatures verify as false.
pub fn verify_signature(message: &[u8], signature_bytes: &[u8], public_key_bytes: &[u8]) -> bool {
    let pk_array: [u8; 32] = match public_key_bytes.try_into() {
        Ok(a) => a,
        Err(_) => return false,
    };
    let vk = match VerifyingKey::from_bytes(&pk_array) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let sig = match Signature::from_slice(signature_bytes) {
        Ok(s) => s,
        Err(_) => return false,
    };

    vk.verify(message, &sig).is_ok()
}

/// Hex flavour of [`verify_signature`], as carried in headers and ledger records.
pub fn verify_signature_hex(message: &[u8], signature_hex: &str, public_key_hex: &str) -> bool {
    match (hex::decode(signature_hex), hex::decode(public_key_hex)) {
        (Ok(sig), Ok(pk)) => verify_signature(message, &sig, &pk),
        _ => false,
    }
}
