//! Purpose: Generate MongoDB-style object ids for items created on the client.
//! Exports: `generate`.
//! Invariants: Ids are 24 lowercase hex chars: 4-byte timestamp, 5 random bytes, 3-byte counter.
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use time::OffsetDateTime;

use crate::core::error::{Error, ErrorKind};

static COUNTER: AtomicU32 = AtomicU32::new(0);
static PROCESS_SALT: OnceLock<[u8; 5]> = OnceLock::new();

fn salt() -> Result<[u8; 5], Error> {
    if let Some(salt) = PROCESS_SALT.get() {
        return Ok(*salt);
    }
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("random source unavailable: {err}"))
    })?;
    COUNTER.store(u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]), Ordering::Relaxed);
    let salt = [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]];
    Ok(*PROCESS_SALT.get_or_init(|| salt))
}

pub fn generate() -> Result<String, Error> {
    let salt = salt()?;
    let seconds = OffsetDateTime::now_utc().unix_timestamp().clamp(0, i64::from(u32::MAX)) as u32;
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

    let mut bytes = [0u8; 12];
    bytes[..4].copy_from_slice(&seconds.to_be_bytes());
    bytes[4..9].copy_from_slice(&salt);
    bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);

    let mut out = String::with_capacity(24);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::generate;
    use crate::core::coerce::is_object_id;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let first = generate().expect("id");
        let second = generate().expect("id");
        assert!(is_object_id(&first));
        assert!(is_object_id(&second));
        assert_ne!(first, second);
        assert_eq!(first, first.to_ascii_lowercase());
    }
}
