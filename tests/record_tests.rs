// Record codec tests
// Frame encoding/decoding, incomplete-input detection and corruption detection.

use std::collections::BTreeMap;
use std::path::Path;

use kvspool::Record;
use kvspool::spool::record::{self, Decoded, FrameKind, HEADER_SIZE, MAGIC, VERSION};
use proptest::prelude::*;

fn sample() -> Record {
    Record::new()
        .with("host", "web-01")
        .with("level", "warn")
        .with("msg", "disk at 91%")
}

/// Helper: frame an arbitrary payload with a correct header and CRC, so the
/// payload checks run instead of stopping at the checksum.
fn frame_around(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.push(VERSION);
    buf.push(0);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Helper: payload with `count` in the pair-count slot and no pairs yet.
fn payload(count: u32) -> Vec<u8> {
    count.to_le_bytes().to_vec()
}

/// Helper: append one length-prefixed key/value pair to a payload.
fn push_pair(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
}

// =============================================================================
// Test 1: Encode and decode a record
// =============================================================================
#[test]
fn encode_decode_record() {
    let record = sample();
    let encoded = record::encode(&record).unwrap();

    match record::decode(&encoded).unwrap() {
        Decoded::Record(decoded, consumed) => {
            assert_eq!(decoded, record);
            assert_eq!(consumed, encoded.len());
        }
        other => panic!("expected a record, got {other:?}"),
    }
}

// =============================================================================
// Test 2: Empty record and empty values are valid records
// =============================================================================
#[test]
fn empty_record_and_empty_values() {
    let empty = Record::new();
    let encoded = record::encode(&empty).unwrap();
    assert_eq!(
        record::decode(&encoded).unwrap(),
        Decoded::Record(Record::new(), encoded.len())
    );

    let blanks = Record::new().with("", "").with("k", "");
    let encoded = record::encode(&blanks).unwrap();
    assert_eq!(
        record::decode(&encoded).unwrap(),
        Decoded::Record(blanks, encoded.len())
    );
}

// =============================================================================
// Test 3: Separators and multi-byte text survive
// =============================================================================
#[test]
fn embedded_separators_survive() {
    let record = Record::new()
        .with("a=b", "c\0d\ne")
        .with("ключ", "значение ✓");
    let encoded = record::encode(&record).unwrap();

    match record::decode(&encoded).unwrap() {
        Decoded::Record(decoded, _) => assert_eq!(decoded, record),
        other => panic!("expected a record, got {other:?}"),
    }
}

// =============================================================================
// Test 4: encoded_size matches actual size
// =============================================================================
#[test]
fn encoded_size_matches_actual() {
    let record = sample();
    assert_eq!(record::encoded_size(&record), record::encode(&record).unwrap().len());
    assert_eq!(record::encoded_size(&Record::new()), HEADER_SIZE + 4);
}

// =============================================================================
// Test 5: Every strict prefix of a frame needs more data
// =============================================================================
#[test]
fn every_prefix_needs_more_data() {
    let encoded = record::encode(&sample()).unwrap();
    for len in 0..encoded.len() {
        assert_eq!(
            record::decode(&encoded[..len]).unwrap(),
            Decoded::NeedMoreData,
            "prefix of {len} bytes"
        );
    }
}

// =============================================================================
// Test 6: Decode stops at the frame boundary
// =============================================================================
#[test]
fn decode_ignores_following_frames() {
    let first = Record::new().with("n", "1");
    let second = Record::new().with("n", "2");
    let mut bytes = record::encode(&first).unwrap();
    let first_len = bytes.len();
    bytes.extend(record::encode(&second).unwrap());

    assert_eq!(
        record::decode(&bytes).unwrap(),
        Decoded::Record(first, first_len)
    );
    assert_eq!(
        record::decode(&bytes[first_len..]).unwrap(),
        Decoded::Record(second, bytes.len() - first_len)
    );
}

// =============================================================================
// Test 7: Bad magic is corruption, not a short read
// =============================================================================
#[test]
fn bad_magic_is_corruption() {
    let mut encoded = record::encode(&sample()).unwrap();
    encoded[0] = b'X';
    assert!(record::decode(&encoded).is_err());

    // Even a single wrong leading byte is enough to tell
    assert!(record::decode(b"Z").is_err());
    assert!(record::decode(b"KVX").is_err());
}

// =============================================================================
// Test 8: Unknown version or flags are corruption
// =============================================================================
#[test]
fn unknown_version_or_flags_rejected() {
    let encoded = record::encode(&sample()).unwrap();

    let mut bad_version = encoded.clone();
    bad_version[3] = 9;
    assert!(record::decode(&bad_version).is_err());

    let mut bad_flags = encoded;
    bad_flags[4] = 0x80;
    assert!(record::decode(&bad_flags).is_err());
}

// =============================================================================
// Test 9: Flipped payload byte fails the CRC
// =============================================================================
#[test]
fn corrupted_payload_detected() {
    let mut encoded = record::encode(&sample()).unwrap();
    let last = encoded.len() - 1;
    encoded[last] ^= 0xFF;

    let err = record::decode(&encoded).unwrap_err();
    assert!(err.to_string().contains("CRC"), "{err}");
}

// =============================================================================
// Test 10: Seal frame
// =============================================================================
#[test]
fn seal_frame_decodes_as_seal() {
    let seal = record::encode_seal();
    assert_eq!(seal.len(), HEADER_SIZE);
    assert_eq!(record::decode(&seal).unwrap(), Decoded::Seal(HEADER_SIZE));

    let header = record::peek(&seal).unwrap().unwrap();
    assert_eq!(header.kind, FrameKind::Seal);
    assert_eq!(header.frame_len(), HEADER_SIZE);
}

// =============================================================================
// Test 11: peek reports the frame length from the header alone
// =============================================================================
#[test]
fn peek_reads_header_only() {
    let encoded = record::encode(&sample()).unwrap();

    let header = record::peek(&encoded[..HEADER_SIZE]).unwrap().unwrap();
    assert_eq!(header.kind, FrameKind::Record);
    assert_eq!(header.frame_len(), encoded.len());

    assert_eq!(record::peek(&encoded[..HEADER_SIZE - 1]).unwrap(), None);
}

// =============================================================================
// Test 12: Hand-built frame decodes like an encoded one
// =============================================================================
#[test]
fn hand_built_frame_matches_encoder() {
    let mut body = payload(1);
    push_pair(&mut body, b"host", b"web-01");
    assert_eq!(
        frame_around(&body),
        record::encode(&Record::new().with("host", "web-01")).unwrap()
    );
}

// =============================================================================
// Test 13: Malformed payloads behind a valid CRC are rejected
// =============================================================================
#[test]
fn malformed_payload_rejected() {
    let rejects = |body: Vec<u8>, expect: &str| {
        let err = record::decode(&frame_around(&body)).unwrap_err();
        assert!(err.to_string().contains(expect), "{err}");

        // Surfaced to callers as corruption at the frame's offset
        let err = err.at(Path::new("kv.0000000000000001.sp"), 26);
        assert!(err.is_corruption(), "{err}");
    };

    // Duplicate keys
    let mut dup = payload(2);
    push_pair(&mut dup, b"k", b"1");
    push_pair(&mut dup, b"k", b"2");
    rejects(dup, "duplicate key");

    // Non-UTF-8 key, then non-UTF-8 value
    let mut bad_key = payload(1);
    push_pair(&mut bad_key, &[0xff, 0xfe], b"v");
    rejects(bad_key, "key is not valid UTF-8");
    let mut bad_value = payload(1);
    push_pair(&mut bad_value, b"k", &[0xc3, 0x28]);
    rejects(bad_value, "value is not valid UTF-8");

    // Bytes left over after the last pair
    let mut trailing = payload(1);
    push_pair(&mut trailing, b"k", b"v");
    trailing.extend_from_slice(&[0, 0]);
    rejects(trailing, "2 trailing bytes");

    // Declared key length runs past the payload
    let mut overrun = payload(1);
    overrun.extend_from_slice(&100u32.to_le_bytes());
    overrun.extend_from_slice(b"short");
    rejects(overrun, "key length exceeds record");

    // Pair count claims more pairs than are present
    let mut missing = payload(2);
    push_pair(&mut missing, b"k", b"v");
    rejects(missing, "key length exceeds record");

    // Too short to hold the pair count
    rejects(Vec::new(), "payload too short for pair count");
    rejects(vec![1, 0], "payload too short for pair count");
}

proptest! {
    #[test]
    fn any_record_round_trips(fields in prop::collection::btree_map(".*", ".*", 0..8)) {
        let record = Record::from(fields.clone());
        let encoded = record::encode(&record).unwrap();

        match record::decode(&encoded).unwrap() {
            Decoded::Record(decoded, consumed) => {
                prop_assert_eq!(consumed, encoded.len());
                prop_assert_eq!(BTreeMap::from(decoded), fields);
            }
            other => prop_assert!(false, "expected a record, got {:?}", other),
        }
    }
}
