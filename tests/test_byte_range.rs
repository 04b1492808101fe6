//! Byte-range digest properties.

use pdf_oxide_sign::signatures::{ByteRange, ByteRangeDigestEngine, DigestAlgorithm, SignaturePlaceholder};
use proptest::prelude::*;
use std::io::Cursor;

proptest! {
    #[test]
    fn digest_skips_exactly_the_placeholder(
        data in proptest::collection::vec(any::<u8>(), 8..4096),
        offset_seed in any::<usize>(),
        capacity in 1usize..64,
        chunk in 1usize..512,
    ) {
        let placeholder_len = capacity * 2 + 2;
        prop_assume!(placeholder_len < data.len());
        let offset = offset_seed % (data.len() - placeholder_len + 1);
        let placeholder = SignaturePlaceholder::with_capacity(offset as u64, capacity);
        let range = ByteRange::around(&placeholder, data.len() as u64).unwrap();

        prop_assert_eq!(range.gap(), placeholder);
        prop_assert_eq!(range.covered_len() + placeholder.len, data.len() as u64);

        let mut covered = data[..offset].to_vec();
        covered.extend_from_slice(&data[offset + placeholder_len..]);
        let expected = DigestAlgorithm::Sha256.digest(&covered);

        let engine = ByteRangeDigestEngine::new(DigestAlgorithm::Sha256).with_chunk_size(chunk);
        let digest = engine.digest(&mut Cursor::new(&data), &range).unwrap();
        prop_assert_eq!(digest.bytes, expected);
    }

    #[test]
    fn placeholder_contents_do_not_matter(
        data in proptest::collection::vec(any::<u8>(), 200..1000),
        fill in any::<u8>(),
    ) {
        let placeholder = SignaturePlaceholder::with_capacity(50, 40);
        let range = ByteRange::around(&placeholder, data.len() as u64).unwrap();
        let mut patched = data.clone();
        for byte in &mut patched[50..50 + placeholder.len as usize] {
            *byte = fill;
        }
        let engine = ByteRangeDigestEngine::new(DigestAlgorithm::Sha1);
        prop_assert_eq!(
            engine.digest_bytes(&data, &range).unwrap(),
            engine.digest_bytes(&patched, &range).unwrap()
        );
    }
}

#[test]
fn test_range_past_end_is_io_error() {
    let range = ByteRange::from_values(&[0, 10, 20, 100]).unwrap();
    let err = ByteRangeDigestEngine::new(DigestAlgorithm::Sha256)
        .digest_bytes(&[0u8; 50], &range)
        .unwrap_err();
    assert_eq!(err.kind(), pdf_oxide_sign::ErrorKind::Io);
}
