use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Content fingerprint of an image as lowercase hex, used to spot the same
/// screenshot saved twice under different names.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data).iter().fold(String::with_capacity(64), |mut hex, b| {
        let _ = write!(hex, "{b:02x}");
        hex
    })
}
