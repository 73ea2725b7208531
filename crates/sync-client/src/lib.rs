//! Remote transport and crypto helper for Ledgerbook sync: the REST client
//! for per-collection endpoints, and the AES-GCM payload cipher with PBKDF2
//! key derivation.

pub mod client;
pub mod crypto;
pub mod error;

pub use client::CollectionApiClient;
pub use crypto::{derive_key, CryptoError, PayloadCipher};
pub use error::{ApiClientError, Result};
