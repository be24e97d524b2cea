//! Cryptographic primitives for the viaduct packet pipeline.
//!
//! Provides:
//! - XOR keystreams — [`Keystream`], the fixed pre-login [`SharedKey`]
//!   and the MT19937-64-fed session [`KeyBlock`]
//! - [`Mt19937_64`] — the 64-bit Mersenne Twister behind session keys
//! - [`SecretKey`] — RSA private keys for the token exchange

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod mt19937;
mod rsa_key;
mod xor;

pub use mt19937::Mt19937_64;
pub use rsa_key::{KeyError, SecretKey};
pub use xor::{KeyBlock, Keystream, SharedKey};
