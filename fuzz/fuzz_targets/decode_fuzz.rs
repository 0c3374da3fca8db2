//! Fuzz target for stored-value decoding.
//!
//! Arbitrary bytes read back from a store must decode or fail with a
//! `CodecError`, never panic. Anything that does decode must survive an
//! encode / decode round trip.

#![no_main]

use coalesce_cache::{JsonCodec, ValueCodec};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let codec = JsonCodec;
    if let Ok(value) = codec.decode::<Value>(data) {
        let bytes = codec.encode(&value).expect("decoded JSON re-encodes");
        let again: Value = codec.decode(&bytes).expect("re-encoded JSON decodes");
        assert_eq!(value, again);
    }
});
