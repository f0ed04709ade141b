//! Log entries and their on-disk framing.
//!
//! Every mutation of the database is one frame:
//!
//! ```text
//! +-----------+-----------+----------------------+
//! | len (u32) | crc (u32) | CBOR-encoded entry   |
//! +-----------+-----------+----------------------+
//! ```
//!
//! Both integers are little-endian; `crc` is the IEEE CRC32 of the payload.
//! Replay stops at a frame that runs past the end of the log or whose
//! checksum fails as the very last frame: that is a write interrupted by a
//! crash, and the tail is discarded. A bad checksum anywhere else is
//! corruption.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Size of the `len` + `crc` frame header.
pub const FRAME_HEADER_SIZE: usize = 8;

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Schema version marker. The latest one in the log wins.
    Header {
        /// Database name.
        name: String,
        /// Schema version the following entries were written under.
        version: u32,
    },
    /// Upsert of one document.
    Put {
        /// Collection name.
        collection: String,
        /// The full document.
        document: Value,
    },
    /// Removal of one document.
    Delete {
        /// Collection name.
        collection: String,
        /// Primary key.
        key: String,
    },
    /// Removal of every document in a collection.
    Clear {
        /// Collection name.
        collection: String,
    },
    /// Move of one document to a new primary key.
    Rekey {
        /// Collection name.
        collection: String,
        /// Key the document was stored under.
        old_key: String,
        /// The document, carrying its new key.
        document: Value,
    },
}

/// Result of scanning a log.
#[derive(Debug, Default)]
pub struct Replay {
    /// Decoded entries with the offset of their frame.
    pub entries: Vec<(u64, LogEntry)>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Whether bytes after `valid_len` were discarded.
    pub torn: bool,
}

/// Encodes an entry into a complete frame.
pub fn encode_frame(entry: &LogEntry) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(entry, &mut payload).map_err(|e| StoreError::encode(e.to_string()))?;

    let len = u32::try_from(payload.len()).map_err(|_| {
        StoreError::encode(format!(
            "log entry of {} bytes exceeds frame limit",
            payload.len()
        ))
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&compute_crc32(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes every intact frame in `bytes`.
///
/// # Errors
///
/// Returns [`StoreError::Corruption`] when a frame other than the last fails
/// its checksum, or when a checksummed payload is not a valid entry.
pub fn decode_log(bytes: &[u8]) -> StoreResult<Replay> {
    let mut replay = Replay::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < FRAME_HEADER_SIZE {
            replay.torn = true;
            break;
        }

        let len = read_u32(bytes, offset) as usize;
        let expected_crc = read_u32(bytes, offset + 4);
        if remaining - FRAME_HEADER_SIZE < len {
            replay.torn = true;
            break;
        }

        let start = offset + FRAME_HEADER_SIZE;
        let payload = &bytes[start..start + len];
        let actual_crc = compute_crc32(payload);
        if actual_crc != expected_crc {
            if start + len == bytes.len() {
                replay.torn = true;
                break;
            }
            return Err(StoreError::corruption(
                offset as u64,
                format!("checksum mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"),
            ));
        }

        let entry: LogEntry = ciborium::from_reader(payload)
            .map_err(|e| StoreError::corruption(offset as u64, e.to_string()))?;
        replay.entries.push((offset as u64, entry));
        offset = start + len;
    }

    replay.valid_len = offset as u64;
    Ok(replay)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn put(id: &str) -> LogEntry {
        LogEntry::Put {
            collection: "product".into(),
            document: json!({"id": id, "sku": format!("SKU-{id}"), "price_cents": 250}),
        }
    }

    fn log_of(entries: &[LogEntry]) -> Vec<u8> {
        entries
            .iter()
            .flat_map(|e| encode_frame(e).unwrap())
            .collect()
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn decodes_all_entries_with_offsets() {
        let entries = vec![
            LogEntry::Header {
                name: "till".into(),
                version: 1,
            },
            put("p1"),
            LogEntry::Delete {
                collection: "product".into(),
                key: "p1".into(),
            },
            LogEntry::Clear {
                collection: "sale".into(),
            },
            LogEntry::Rekey {
                collection: "customer".into(),
                old_key: "local-1".into(),
                document: json!({"id": "c-9", "name": "Ada"}),
            },
        ];
        let bytes = log_of(&entries);

        let replay = decode_log(&bytes).unwrap();
        assert!(!replay.torn);
        assert_eq!(replay.valid_len, bytes.len() as u64);
        assert_eq!(replay.entries[0].0, 0);
        let decoded: Vec<LogEntry> = replay.entries.into_iter().map(|(_, e)| e).collect();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn partial_frame_is_torn() {
        let mut bytes = log_of(&[put("p1"), put("p2")]);
        let intact = bytes.len();
        bytes.extend_from_slice(&encode_frame(&put("p3")).unwrap()[..5]);

        let replay = decode_log(&bytes).unwrap();
        assert!(replay.torn);
        assert_eq!(replay.valid_len, intact as u64);
        assert_eq!(replay.entries.len(), 2);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let first = encode_frame(&put("p1")).unwrap();
        let mut bytes = log_of(&[put("p1"), put("p2")]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let replay = decode_log(&bytes).unwrap();
        assert!(replay.torn);
        assert_eq!(replay.valid_len, first.len() as u64);
    }

    #[test]
    fn bad_checksum_mid_log_is_corruption() {
        let mut bytes = log_of(&[put("p1"), put("p2")]);
        bytes[FRAME_HEADER_SIZE + 2] ^= 0xFF;

        assert!(matches!(
            decode_log(&bytes),
            Err(StoreError::Corruption { offset: 0, .. })
        ));
    }

    proptest! {
        #[test]
        fn any_truncation_keeps_a_frame_prefix(ids in prop::collection::vec("[a-z0-9]{1,8}", 1..8), cut in any::<prop::sample::Index>()) {
            let entries: Vec<LogEntry> = ids.iter().map(|id| put(id)).collect();
            let bytes = log_of(&entries);
            let cut = cut.index(bytes.len() + 1);

            let replay = decode_log(&bytes[..cut]).unwrap();
            prop_assert!(replay.valid_len as usize <= cut);
            let decoded: Vec<LogEntry> = replay.entries.into_iter().map(|(_, e)| e).collect();
            prop_assert_eq!(&decoded[..], &entries[..decoded.len()]);
        }
    }
}
