//! Packet schemas and framing for the viaduct proxy.
//!
//! This crate handles:
//! * The outer wire envelope (`0x4567 … 0x89AB` framing)
//! * Message descriptors loaded from compiled descriptor sets
//! * Dynamic messages — parse/serialize against a descriptor, plus a
//!   JSON interchange form keyed by field name
//! * The cross-version command mapping (cmd↔name, descriptor lookup,
//!   pairwise cmd translation, base version)
//!
//! Nothing here is generated per message: the descriptor is a runtime
//! value, which is what lets one binary speak several protocol
//! versions at once.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod descriptor;
pub mod dynamic;
pub mod envelope;
pub mod mapping;

pub use descriptor::{DescriptorPool, FieldKind, MessageDescriptor, PoolError};
pub use dynamic::{DynamicMessage, Value, WireError};
pub use envelope::FrameError;
pub use mapping::{Mapping, MappingError, Protocol};
