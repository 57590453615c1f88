//! Fuzz target for type signature parsing.
//!
//! Anything that parses must print back to the same text and yield an
//! empty value of that type.

#![no_main]

use hwconfd::ipc::{TypeSignature, Variant};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(sig) = TypeSignature::parse(text) {
        assert_eq!(sig.as_str(), text);
        let empty = Variant::empty(&sig);
        assert_eq!(empty.signature(), &sig);
    }
});
