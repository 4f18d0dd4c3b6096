//! Fuzz target for counter payloads and the `/proc/net/dev` parser.

#![no_main]

use libfuzzer_sys::fuzz_target;
use netmon_helper::executor::{parse_proc_net_dev, ConnectionCounters};

fuzz_target!(|data: &[u8]| {
    let _ = ConnectionCounters::decode(data);
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = parse_proc_net_dev(text);
    }
});
