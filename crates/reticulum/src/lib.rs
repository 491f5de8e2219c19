//! Transport contract consumed by `lxmf`.
//!
//! This crate is deliberately thin: it is not a Reticulum mesh/link/interface
//! stack. It carries the cryptographic primitives the LXMF wire codec and
//! stamper need directly (truncated SHA-256 hashing, Ed25519 identities,
//! X25519 ECDH + a Fernet-style AEAD token for destination encryption), plus
//! the trait contract a real transport (or the in-memory test double here)
//! must implement for `lxmf`'s Delivery Engine and Propagation Client to run
//! against it.

pub mod contract;
pub mod crypt;
pub mod hash;
pub mod identity;
pub mod testing;

pub use contract::{Link, LinkEvent, ResourceHandle, Transport, TransportError};
pub use hash::{AddressHash, Hash};
pub use identity::{Identity, PrivateIdentity};
