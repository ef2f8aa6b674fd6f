use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::state::session::JoinCode;

/// Smallest code handed out; keeps every code at six digits or more.
pub const MIN_CODE: i64 = 100_000;
/// Exclusive upper bound; codes stay at most eight digits long.
pub const MAX_CODE: i64 = 100_000_000;

/// Source of candidate join codes. Uniqueness is enforced by the registry, not here.
pub trait JoinCodeGenerator: Send + Sync {
    /// Produce the next candidate.
    fn generate(&self) -> JoinCode;
}

/// Short hash of the current time, salted from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeHashCodes;

impl JoinCodeGenerator for TimeHashCodes {
    fn generate(&self) -> JoinCode {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let salt: u64 = rand::random();

        let digest = Sha256::new()
            .chain_update(nanos.to_le_bytes())
            .chain_update(salt.to_le_bytes())
            .finalize();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let span = (MAX_CODE - MIN_CODE) as u64;
        JoinCode(MIN_CODE + (u64::from_be_bytes(head) % span) as i64)
    }
}

/// Parse a code typed by a player, tolerating surrounding whitespace.
pub fn parse_join_code(text: &str) -> Option<JoinCode> {
    text.trim()
        .parse::<i64>()
        .ok()
        .filter(|value| (MIN_CODE..MAX_CODE).contains(value))
        .map(JoinCode)
}
