//! Log-safe identifiers. Student ids never reach the logs in clear text.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// First 6 bytes of SHA-256, hex encoded (12 chars). Stable across runs so
/// log lines for the same student can still be correlated.
pub fn anon_id(student_id: &str) -> String {
    let digest = Sha256::digest(student_id.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
