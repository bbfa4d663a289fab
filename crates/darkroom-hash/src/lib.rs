//! Content fingerprinting for Darkroom.
//!
//! Decodes an image, applies its embedded orientation, converts it to RGBA8
//! and hashes the pixels, so the same picture in a different container or with
//! different metadata maps to the same cache keys.

mod hasher;

pub use hasher::{ContentHasher, Fingerprinted, HashMode, HasherConfig, raw_fingerprint};
