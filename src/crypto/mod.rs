// ============================================================================
// Crypto - Per-User Field Encryption and Crypto-Shredding
// ============================================================================

pub mod field_encryptor;
pub mod key_management;
pub mod master_key;

pub use field_encryptor::{is_encrypted_value, key_origin, FieldEncryptor, KeyOrigin, KeyRing};
pub use key_management::{InMemoryKeyRepository, KeyManagementRepository, PostgresKeyRepository};
pub use master_key::{KdfConfig, MasterKey, SealedKey, UserKey};
