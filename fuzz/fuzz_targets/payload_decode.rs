//! Fuzz target for Payload::decode
//!
//! This fuzzer feeds arbitrary text to the payload codec and, for anything
//! that decodes, to the per-version crypto strategy:
//! - Truncated or extra `|`-separated fields
//! - Invalid base64 in any field
//! - Unknown version tags behind the marker
//! - IVs and keys of the wrong length
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilpost_crypto::{LocalKey, strategy_for};
use veilpost_proto::{PAYLOAD_MARKER, Payload};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Bare input and input behind the marker reach different paths
    for candidate in [text.to_string(), format!("{PAYLOAD_MARKER}{text}")] {
        let Ok(payload) = Payload::decode(&candidate) else {
            continue;
        };

        // Anything that decodes must re-encode (or be read-only)
        if !payload.version().is_read_only() {
            let encoded = payload.encode().expect("decoded payload must encode");
            assert_eq!(Payload::decode(&encoded).as_ref(), Ok(&payload));
        }

        // Decrypting with a wrong key should fail cleanly
        let crypto = strategy_for(payload.version());
        let _ = crypto.decrypt_as_author(&payload, &LocalKey::new([0; 32]));
        let _ = payload.post_identifier("example.net");
    }
});
