//! Fuzz target for bridge line parsing.
//!
//! Arbitrary bytes must not panic when parsed as Input/Output.

#![no_main]

use agentlink::protocol::{Input, Output};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<Input>(data);
    let _ = serde_json::from_slice::<Output>(data);

    // The bridge reads lines as strings
    if let Ok(s) = std::str::from_utf8(data) {
        for line in s.lines() {
            let _ = serde_json::from_str::<Input>(line);
        }
    }
});
