use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::Nonce;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{PendingEvent, StoredEvent};
use super::key_management::KeyManagementRepository;
use super::master_key::{MasterKey, SealedKey, UserKey, NONCE_LEN};

// ============================================================================
// Field Encryptor - Personal Data Inside Domain Events
// ============================================================================
//
// Only fields an event type declares as personal data are touched. Each is
// replaced by `ENCv1:<flag>:<base64(nonce | ciphertext | tag)>`; the
// plaintext is the field's JSON representation so decrypt is an exact
// inverse for any value type.
//
// Flags:
// - `s`: the owner's own sign-up event (key minted for this very call)
// - `k`: any other event
//
// Every declared non-null field is encrypted, whatever its text. On read a
// field counts as ciphertext only if it parses as a complete envelope;
// anything else is legacy plaintext and passes through untouched.
//
// ============================================================================

const PREFIX: &str = "ENCv1:";
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    SignUp,
    Existing,
}

impl KeyOrigin {
    fn flag(self) -> char {
        match self {
            KeyOrigin::SignUp => 's',
            KeyOrigin::Existing => 'k',
        }
    }

    fn from_flag(flag: char) -> Option<Self> {
        match flag {
            's' => Some(KeyOrigin::SignUp),
            'k' => Some(KeyOrigin::Existing),
            _ => None,
        }
    }
}

/// A parsed `ENCv1:<flag>:<base64>` field.
struct SealedField {
    origin: KeyOrigin,
    combined: Vec<u8>,
}

impl SealedField {
    fn parse(encoded: &str) -> Option<Self> {
        let (flag, body) = encoded.strip_prefix(PREFIX)?.split_once(':')?;
        let mut flag_chars = flag.chars();
        let origin = flag_chars.next().and_then(KeyOrigin::from_flag)?;
        if flag_chars.next().is_some() {
            return None;
        }

        let combined = STANDARD.decode(body).ok()?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        Some(Self { origin, combined })
    }
}

/// Whether `value` is a well-formed field encoded by this module.
pub fn is_encrypted_value(value: &Value) -> bool {
    value.as_str().and_then(SealedField::parse).is_some()
}

/// Key origin recorded in an encoded field.
pub fn key_origin(value: &Value) -> Option<KeyOrigin> {
    value.as_str().and_then(SealedField::parse).map(|field| field.origin)
}

// ============================================================================
// Key Ring - Request-Scoped Key Cache
// ============================================================================

/// Keys resolved during one command or one load. Never shared between
/// requests; key bytes are zeroed when the ring is dropped.
#[derive(Default)]
pub struct KeyRing {
    keys: HashMap<Uuid, UserKey>,
    minted: Vec<SealedKey>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys minted while encrypting; they must be committed with the events.
    pub fn take_minted(&mut self) -> Vec<SealedKey> {
        std::mem::take(&mut self.minted)
    }

    pub fn minted(&self) -> &[SealedKey] {
        &self.minted
    }

    pub fn is_minted(&self, user_id: Uuid) -> bool {
        self.minted.iter().any(|key| key.user_id == user_id)
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("cached", &self.keys.len())
            .field("minted", &self.minted.len())
            .finish()
    }
}

// ============================================================================
// Field Encryptor
// ============================================================================

pub struct FieldEncryptor {
    keys: Arc<dyn KeyManagementRepository>,
    master: Arc<MasterKey>,
}

impl FieldEncryptor {
    pub fn new(keys: Arc<dyn KeyManagementRepository>, master: Arc<MasterKey>) -> Self {
        Self { keys, master }
    }

    pub fn key_repository(&self) -> &Arc<dyn KeyManagementRepository> {
        &self.keys
    }

    /// Encrypt the declared personal fields of a pending event in place.
    pub async fn encrypt(&self, ring: &mut KeyRing, event: &mut PendingEvent) -> Result<usize> {
        let origin = if event.is_sign_up {
            KeyOrigin::SignUp
        } else {
            KeyOrigin::Existing
        };
        self.encrypt_payload(ring, event.user_id, event.personal_data_fields, origin, &mut event.payload)
            .await
    }

    /// Decrypt the declared personal fields of a stored event in place,
    /// keyed by the event's own recorded user.
    pub async fn decrypt(
        &self,
        ring: &mut KeyRing,
        fields: &[&str],
        event: &mut StoredEvent,
    ) -> Result<usize> {
        self.decrypt_payload(ring, event.user_id, fields, &mut event.payload).await
    }

    pub async fn encrypt_payload(
        &self,
        ring: &mut KeyRing,
        user_id: Uuid,
        fields: &[&str],
        origin: KeyOrigin,
        payload: &mut Value,
    ) -> Result<usize> {
        let targets = targets(fields, payload, |value| !value.is_null())?;
        if targets.is_empty() {
            return Ok(0);
        }

        let key = self.encryption_key(ring, user_id).await?;
        let object = payload.as_object_mut().ok_or_else(not_an_object)?;

        for field in &targets {
            if let Some(value) = object.get_mut(*field) {
                let plaintext = serde_json::to_vec(value)?;
                *value = Value::String(seal_field(key, user_id, field, origin, &plaintext)?);
            }
        }

        Ok(targets.len())
    }

    pub async fn decrypt_payload(
        &self,
        ring: &mut KeyRing,
        user_id: Uuid,
        fields: &[&str],
        payload: &mut Value,
    ) -> Result<usize> {
        let targets = targets(fields, payload, is_encrypted_value)?;
        if targets.is_empty() {
            return Ok(0);
        }

        let key = self.decryption_key(ring, user_id).await?;
        let object = payload.as_object_mut().ok_or_else(not_an_object)?;

        for field in &targets {
            if let Some(value) = object.get_mut(*field) {
                let sealed = value.as_str().and_then(SealedField::parse).ok_or_else(|| {
                    EventSourcingError::EncryptionFailure(format!("field {} has a malformed encoding", field))
                })?;
                let plaintext = open_field(key, user_id, field, &sealed)?;
                *value = serde_json::from_slice(&plaintext).map_err(|e| {
                    EventSourcingError::EncryptionFailure(format!("field {} is not valid JSON: {}", field, e))
                })?;
            }
        }

        Ok(targets.len())
    }

    /// Cached key, else the stored key, else a freshly minted one queued for commit.
    async fn encryption_key<'r>(&self, ring: &'r mut KeyRing, user_id: Uuid) -> Result<&'r UserKey> {
        if !ring.keys.contains_key(&user_id) {
            let key = match self.keys.get_key(user_id).await? {
                Some(key) => key,
                None => {
                    let (key, sealed) = self.master.mint(user_id)?;
                    tracing::debug!(user_id = %user_id, "Minted encryption key for pending commit");
                    ring.minted.push(sealed);
                    key
                }
            };
            ring.keys.insert(user_id, key);
        }

        ring.keys
            .get(&user_id)
            .ok_or(EventSourcingError::KeyNotFound(user_id))
    }

    /// Cached or stored key; never mints.
    async fn decryption_key<'r>(&self, ring: &'r mut KeyRing, user_id: Uuid) -> Result<&'r UserKey> {
        if !ring.keys.contains_key(&user_id) {
            let key = self
                .keys
                .get_key(user_id)
                .await?
                .ok_or(EventSourcingError::KeyNotFound(user_id))?;
            ring.keys.insert(user_id, key);
        }

        ring.keys
            .get(&user_id)
            .ok_or(EventSourcingError::KeyNotFound(user_id))
    }
}

fn targets<'f>(
    fields: &[&'f str],
    payload: &Value,
    wanted: impl Fn(&Value) -> bool,
) -> Result<Vec<&'f str>> {
    if fields.is_empty() || payload.is_null() {
        return Ok(Vec::new());
    }
    let object = payload.as_object().ok_or_else(not_an_object)?;

    Ok(fields
        .iter()
        .copied()
        .filter(|field| object.get(*field).is_some_and(&wanted))
        .collect())
}

fn not_an_object() -> EventSourcingError {
    EventSourcingError::EncryptionFailure("payload with personal data must be an object".to_string())
}

fn associated_data(user_id: Uuid, field: &str) -> Vec<u8> {
    format!("{}:{}", user_id, field).into_bytes()
}

fn seal_field(key: &UserKey, user_id: Uuid, field: &str, origin: KeyOrigin, plaintext: &[u8]) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let aad = associated_data(user_id, field);
    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
        .map_err(|e| EventSourcingError::EncryptionFailure(format!("cannot encrypt {}: {}", field, e)))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{}{}:{}", PREFIX, origin.flag(), STANDARD.encode(combined)))
}

fn open_field(key: &UserKey, user_id: Uuid, field: &str, sealed: &SealedField) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = sealed.combined.split_at(NONCE_LEN);
    let aad = associated_data(user_id, field);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: &aad })
        .map_err(|_| EventSourcingError::EncryptionFailure(format!("cannot decrypt field {}", field)))
}

// ============================================================================
// Unit Tests
// ============================================================================
