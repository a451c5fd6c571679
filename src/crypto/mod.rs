//! Cryptographic functions for Coffer
//!
//! Provides AES-256-GCM field tokens with Argon2id key derivation, used for
//! individual sensitive attributes and for whole archives alike.

pub mod codec;
pub mod encryption;
pub mod key_derivation;

pub use codec::{CorruptedRecord, RecordCodec, ScanReport, SensitiveSchema};
pub use encryption::{decode, encode, token_timestamp, FieldCipher};
pub use key_derivation::{derive_key, DerivedKey, KdfParams};
