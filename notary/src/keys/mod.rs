//! Ed25519 signing keys and the pool lending them to signers.

pub mod key;
pub mod pool;

pub use key::{Key, verify};
pub use pool::{KeyHandle, KeyPool};
