//! Collaborator seams for payload encryption and cross-reload session state.
//!
//! The concrete cipher lives in the sync-client crate; domain code only sees
//! the `SecretCipher` contract. Session state is an explicit, injected
//! key-value store rather than ambient global state, so lifetime and
//! invalidation stay visible to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Symmetric ciphertext envelope: base64 payload plus base64 IV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherText {
    pub encrypted: String,
    pub iv: String,
}

/// Symmetric encrypt/decrypt contract. `decrypt` fails on any key, IV, or
/// ciphertext mismatch; callers that cannot tolerate a failure must catch it
/// and degrade (the rule engine falls back to an empty string).
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<CipherText>;
    fn decrypt(&self, encrypted: &str, iv: &str) -> Result<String>;
}

/// Key-value session state surviving a page reload but not an app restart.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// Process-local `SessionStore`.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

const ENCRYPTION_KEY_SESSION_KEY: &str = "encryption_key";

/// Holds the user's base64 key material in an injected session store.
#[derive(Clone)]
pub struct EncryptionKeyHolder {
    store: Arc<dyn SessionStore>,
}

impl EncryptionKeyHolder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn set_key(&self, key_base64: String) {
        self.store.set(ENCRYPTION_KEY_SESSION_KEY, key_base64);
    }

    pub fn key(&self) -> Option<String> {
        self.store.get(ENCRYPTION_KEY_SESSION_KEY)
    }

    pub fn clear(&self) {
        self.store.remove(ENCRYPTION_KEY_SESSION_KEY);
    }
}
