//! Helpers used throughout the crate that aren't part of its public API
//! surface.

mod le_bytes;

pub(crate) use le_bytes::LeBytes;
