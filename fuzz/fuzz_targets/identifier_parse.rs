//! Fuzz target for identifier parsing
//!
//! Every identifier that parses must survive printing and parsing again.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilpost_proto::{GroupIdentifier, PersonIdentifier, PostIvIdentifier};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(person) = text.parse::<PersonIdentifier>() {
        assert_eq!(person.to_string().parse::<PersonIdentifier>().ok(), Some(person));
    }
    if let Ok(group) = text.parse::<GroupIdentifier>() {
        assert_eq!(group.to_string().parse::<GroupIdentifier>().ok(), Some(group));
    }
    if let Ok(post) = text.parse::<PostIvIdentifier>() {
        assert_eq!(post.to_string().parse::<PostIvIdentifier>().ok(), Some(post));
    }
});
