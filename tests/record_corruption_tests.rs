/// Record corruption tests
///
/// Any single-byte change to a sealed record must be reported as "absent",
/// never accepted and never a panic.
/// Run with: cargo test --test record_corruption_tests

use chrono::{DateTime, TimeZone, Utc};
use durable_counter::storage::codec::{self, RECORD_VERSION};
use proptest::prelude::*;

fn timestamp(secs: i64, nanos: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, nanos).unwrap()
}

#[test]
fn test_every_byte_of_a_record_is_covered() {
    let bytes = codec::encode(123_456, timestamp(1_700_000_000, 250_000_000), RECORD_VERSION).unwrap();
    for index in 0..bytes.len() {
        for replacement in [b'0', b'9', b' ', b'"', b'x', 0u8, 0xff] {
            if bytes[index] == replacement {
                continue;
            }
            let mut corrupted = bytes.clone();
            corrupted[index] = replacement;
            assert!(
                codec::decode(&corrupted).is_none(),
                "byte {index} set to {replacement:#04x} was accepted"
            );
        }
    }
}

proptest! {
    #[test]
    fn prop_encode_decode_preserves_visits(
        visits in any::<i64>(),
        secs in 0i64..4_000_000_000,
        nanos in 0u32..1_000_000_000,
        version in "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
    ) {
        let ts = timestamp(secs, nanos);
        let bytes = codec::encode(visits, ts, &version).unwrap();
        let record = codec::validate(&bytes).unwrap();
        prop_assert_eq!(record.visits, visits);
        prop_assert_eq!(record.last_updated, ts);
        prop_assert_eq!(record.version, version);
    }

    #[test]
    fn prop_single_byte_corruption_is_absent(
        visits in any::<i64>(),
        secs in 0i64..4_000_000_000,
        position in any::<prop::sample::Index>(),
        replacement in any::<u8>(),
    ) {
        let bytes = codec::encode(visits, timestamp(secs, 0), RECORD_VERSION).unwrap();
        let index = position.index(bytes.len());
        prop_assume!(bytes[index] != replacement);

        let mut corrupted = bytes.clone();
        corrupted[index] = replacement;
        prop_assert!(codec::decode(&corrupted).is_none());
    }

    #[test]
    fn prop_truncation_is_absent(
        visits in any::<i64>(),
        cut in any::<prop::sample::Index>(),
    ) {
        let bytes = codec::encode(visits, timestamp(1_700_000_000, 0), RECORD_VERSION).unwrap();
        let len = cut.index(bytes.len());
        prop_assert!(codec::decode(&bytes[..len]).is_none());
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = codec::decode(&data);
    }
}
