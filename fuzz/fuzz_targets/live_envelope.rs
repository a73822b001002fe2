#![no_main]
//! Arbitrary stream frames must decode to a message or a `MalformedMessage`,
//! never panic.

use fedwatch_types::{LiveEvent, LiveMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(msg) = LiveMessage::decode(text) {
        let _ = LiveEvent::from_message(&msg);
    }
});
