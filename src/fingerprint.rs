//! Content fingerprint of a decoded track.
//!
//! Layout v1: every sample in frame-major order as little-endian `f32`,
//! then the format ordinal as a little-endian `u32`, hashed with SHA-1.
//! Persisted identifiers depend on this layout; any change must bump
//! [`FINGERPRINT_VERSION`].

use sha1::{Digest, Sha1};

use crate::track::PcmBuffer;

pub const FINGERPRINT_VERSION: u32 = 1;

/// Samples hashed per `update` call.
const CHUNK_SAMPLES: usize = 16 * 1024;

/// Compute the 40-character lowercase hex SHA-1 fingerprint of a track.
pub fn fingerprint(buffer: &PcmBuffer) -> String {
    let mut hasher = Sha1::new();
    let mut bytes = Vec::with_capacity(CHUNK_SAMPLES * 4);
    for chunk in buffer.samples().chunks(CHUNK_SAMPLES) {
        bytes.clear();
        for s in chunk {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        hasher.update(&bytes);
    }
    hasher.update((buffer.format_code().code() as u32).to_le_bytes());
    format!("{:x}", hasher.finalize())
}
