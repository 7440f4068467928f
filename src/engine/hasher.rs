use argon2::Config;
use rand::Rng;

use crate::error::Result;

/// One-way hashing of secrets (access codes, admin passwords).
///
/// Both operations are slow by construction and must not run on an async
/// worker thread.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String>;

    /// Constant-time comparison of a plaintext against an encoded hash.
    fn verify(&self, plain: &str, hash: &str) -> Result<bool>;

    /// A valid hash of an unguessable secret with the same cost as real
    /// hashes. Verifying against it costs as much as a real check.
    fn dummy_hash(&self) -> &str;
}

/// Argon2 with a fresh 16-byte salt per hash.
pub struct Argon2Hasher {
    config: Config<'static>,
    dummy_hash: String,
}

impl Argon2Hasher {
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config<'static>) -> Result<Self> {
        let mut hasher = Self {
            config,
            dummy_hash: String::new(),
        };
        let secret: [u8; 32] = rand::thread_rng().gen();
        hasher.dummy_hash = argon2::hash_encoded(&secret, &salt(), &hasher.config)?;
        Ok(hasher)
    }
}

// 16 bytes is recommended for password hashing:
//  https://en.wikipedia.org/wiki/Argon2
fn salt() -> [u8; 16] {
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill(&mut salt);
    salt
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Result<String> {
        Ok(argon2::hash_encoded(plain.as_bytes(), &salt(), &self.config)?)
    }

    fn verify(&self, plain: &str, hash: &str) -> Result<bool> {
        Ok(argon2::verify_encoded(hash, plain.as_bytes())?)
    }

    fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }
}
