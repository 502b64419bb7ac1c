//! SHA-256 digests for file integrity and alert deduplication

use crate::models::Flag;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex-encoded SHA-256 of a file's full content, read in chunks
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Content digest of a flag set, ignoring timestamps and measurements
///
/// Built from each flag's strategy, check type and evidence identity, so
/// repeated sightings of the same process or file map to the same digest
/// while the rendered message and CPU or traffic figures drift.
pub fn flag_set_digest(flags: &[Flag]) -> String {
    let mut hasher = Sha256::new();
    for flag in flags {
        hasher.update(flag.strategy_name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(flag.check_type.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(flag.evidence.identity().as_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}
