#![no_main]

use libfuzzer_sys::fuzz_target;

use imgedge::key::{CanonicalKey, DEFAULT_MAX_DIMENSION, KeyNormalizer, QueryKeyPolicy};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let payload = &data[1..];
    let split = (data[0] as usize) % (payload.len() + 1);
    let (path_bytes, query_bytes) = payload.split_at(split);
    let path = String::from_utf8_lossy(path_bytes);
    let query = String::from_utf8_lossy(query_bytes);
    let query = if query.is_empty() {
        None
    } else {
        Some(query.as_ref())
    };

    let normalizer = KeyNormalizer::new(
        "",
        DEFAULT_MAX_DIMENSION,
        QueryKeyPolicy::All {
            order_significant: data[0] & 1 == 1,
        },
    );
    if let Ok(key) = normalizer.normalize(path.as_ref(), query) {
        let parsed = CanonicalKey::parse(key.as_str()).expect("canonical text parses");
        assert_eq!(parsed, key);
        let again = normalizer
            .normalize(path.as_ref(), query)
            .expect("normalization is deterministic");
        assert_eq!(again, key);
    }
    let _ = CanonicalKey::parse(path.as_ref());
});
