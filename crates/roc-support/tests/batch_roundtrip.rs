//! Property tests for `BatchWriter`/`BatchReader` round-tripping
//! (spec.md §4.8): arbitrary `(u64, Vec<u8>)` record sequences must
//! survive a plain encode/decode and a compressed encode/decode
//! unchanged, as long as no individual record exceeds the batch cap.

use proptest::prelude::*;
use roc_support::batch::{BatchReader, BatchWriter, Lz4FrameCompressor};

const MAX_SIZE: usize = 4096;

fn records_strategy() -> impl Strategy<Value = Vec<(u64, Vec<u8>)>> {
    prop::collection::vec(
        (any::<u64>(), prop::collection::vec(any::<u8>(), 0..64)),
        0..32,
    )
}

proptest! {
    #[test]
    fn plain_round_trip_preserves_every_record(records in records_strategy()) {
        let mut writer: BatchWriter<u64, Vec<u8>> = BatchWriter::new(MAX_SIZE);
        let mut flushed: Vec<Vec<u8>> = Vec::new();
        for (a, b) in &records {
            writer
                .add(a, b, |full| flushed.push(full.to_vec()))
                .expect("records sized well under the batch cap never overflow a single field");
        }

        let mut decoded: Vec<(u64, Vec<u8>)> = Vec::new();
        for chunk in &flushed {
            decoded.extend(BatchReader::parse::<u64, Vec<u8>>(chunk).unwrap());
        }
        decoded.extend(BatchReader::parse::<u64, Vec<u8>>(writer.as_bytes()).unwrap());

        prop_assert_eq!(decoded, records);
    }

    #[test]
    fn compressed_round_trip_preserves_every_record(records in records_strategy()) {
        let mut writer: BatchWriter<u64, Vec<u8>> = BatchWriter::new(MAX_SIZE);
        for (a, b) in &records {
            writer
                .add(a, b, |_| panic!("MAX_SIZE is large enough that this batch never flushes mid-test"))
                .expect("records sized well under the batch cap never overflow a single field");
        }

        let compressor = Lz4FrameCompressor;
        let mut compressed = Vec::new();
        writer.get_compressed(&compressor, &mut compressed);

        let mut dst = Vec::with_capacity(writer.len());
        let decoded: Vec<(u64, Vec<u8>)> =
            BatchReader::parse_compressed(&compressed, &compressor, &mut dst).unwrap();

        prop_assert_eq!(decoded, records);
    }
}
