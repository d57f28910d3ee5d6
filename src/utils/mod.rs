pub mod config;

use std::hash::Hasher;

/// Hash a string using xxHash64 for use in cache keys
pub fn hash_string(s: &str) -> u64 {
    let mut hasher = twox_hash::XxHash64::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}
