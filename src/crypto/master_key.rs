use std::fmt;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{EventSourcingError, Result};

// ============================================================================
// Master Key - Envelope Encryption for Per-User Keys
// ============================================================================
//
// One random AES-256 key per user. At rest each user key is sealed with
// AES-256-GCM under a key-encryption key derived (Argon2id) from the master
// passphrase. The user id is bound as associated data.
//
// ============================================================================

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
const MIN_SALT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// A decrypted per-user key. Bytes are zeroed on drop.
#[derive(Clone)]
pub struct UserKey(Zeroizing<[u8; KEY_LEN]>);

impl UserKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub(crate) fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0[..]))
    }
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserKey(..)")
    }
}

/// Encryption key record as persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct SealedKey {
    pub user_id: Uuid,
    pub encrypted_key: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

pub struct MasterKey {
    cipher: Aes256Gcm,
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    pub fn derive(passphrase: &str, salt: &[u8], kdf: &KdfConfig) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(EventSourcingError::Config("master passphrase cannot be empty".to_string()));
        }
        if salt.len() < MIN_SALT_LEN {
            return Err(EventSourcingError::Config(format!(
                "key salt must be at least {} bytes",
                MIN_SALT_LEN
            )));
        }

        let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_LEN))
            .map_err(|e| EventSourcingError::Config(format!("invalid KDF parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut kek = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut kek[..])
            .map_err(|e| EventSourcingError::EncryptionFailure(format!("key derivation failed: {}", e)))?;

        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&kek[..])),
        })
    }

    /// Generate a fresh user key together with its sealed form.
    pub fn mint(&self, user_id: Uuid) -> Result<(UserKey, SealedKey)> {
        let key = UserKey::generate();
        let sealed = self.seal(user_id, &key)?;
        Ok((key, sealed))
    }

    pub fn seal(&self, user_id: Uuid, key: &UserKey) -> Result<SealedKey> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let encrypted_key = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &key.0[..],
                    aad: user_id.as_bytes(),
                },
            )
            .map_err(|e| EventSourcingError::EncryptionFailure(format!("cannot seal key: {}", e)))?;

        Ok(SealedKey {
            user_id,
            encrypted_key,
            nonce: nonce.to_vec(),
            created_at: Utc::now(),
        })
    }

    pub fn open(&self, sealed: &SealedKey) -> Result<UserKey> {
        if sealed.nonce.len() != NONCE_LEN {
            return Err(EventSourcingError::EncryptionFailure(format!(
                "sealed key for user {} has a malformed nonce",
                sealed.user_id
            )));
        }

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    Nonce::from_slice(&sealed.nonce),
                    Payload {
                        msg: &sealed.encrypted_key,
                        aad: sealed.user_id.as_bytes(),
                    },
                )
                .map_err(|_| {
                    EventSourcingError::EncryptionFailure(format!(
                        "cannot open key for user {}",
                        sealed.user_id
                    ))
                })?,
        );

        if plaintext.len() != KEY_LEN {
            return Err(EventSourcingError::EncryptionFailure(format!(
                "key for user {} has wrong length",
                sealed.user_id
            )));
        }

        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&plaintext);
        Ok(UserKey(bytes))
    }
}

#[cfg(test)]
pub(crate) fn test_master_key() -> MasterKey {
    let kdf = KdfConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };
    MasterKey::derive("correct horse battery staple", b"event-vault-tests", &kdf).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let master = test_master_key();
        let user_id = Uuid::new_v4();
        let (key, sealed) = master.mint(user_id).unwrap();

        assert_eq!(sealed.user_id, user_id);
        assert_eq!(sealed.nonce.len(), NONCE_LEN);
        assert_ne!(&sealed.encrypted_key[..], &key.0[..]);

        let opened = master.open(&sealed).unwrap();
        assert_eq!(&opened.0[..], &key.0[..]);
    }

    #[test]
    fn test_sealed_key_bound_to_user() {
        let master = test_master_key();
        let (_, mut sealed) = master.mint(Uuid::new_v4()).unwrap();
        sealed.user_id = Uuid::new_v4();

        assert!(matches!(master.open(&sealed), Err(EventSourcingError::EncryptionFailure(_))));
    }

    #[test]
    fn test_wrong_passphrase_cannot_open() {
        let master = test_master_key();
        let (_, sealed) = master.mint(Uuid::new_v4()).unwrap();

        let kdf = KdfConfig { memory_kib: 64, iterations: 1, parallelism: 1 };
        let other = MasterKey::derive("wrong passphrase", b"event-vault-tests", &kdf).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_rejects_empty_passphrase_and_short_salt() {
        let kdf = KdfConfig::default();
        assert!(matches!(MasterKey::derive("", b"long enough salt", &kdf), Err(EventSourcingError::Config(_))));
        assert!(matches!(MasterKey::derive("secret", b"short", &kdf), Err(EventSourcingError::Config(_))));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = UserKey::generate();
        assert_eq!(format!("{:?}", key), "UserKey(..)");
        assert_eq!(format!("{:?}", test_master_key()), "MasterKey(..)");
    }
}
