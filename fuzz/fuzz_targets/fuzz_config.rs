//! Fuzz target: `LoopConfig::from_json` and the postcard config blob
//!
//! Feeds arbitrary bytes to both config decoders and checks:
//! - No panics under any byte sequence
//! - Any config `from_json` accepts passes `validate()` and builds a loop
//! - A postcard blob that decodes re-encodes to a blob decoding to the
//!   same config
//!
//! cargo fuzz run fuzz_config

#![no_main]

use libfuzzer_sys::fuzz_target;
use reactor_core::EventLoop;
use reactor_core::config::LoopConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = core::str::from_utf8(data) {
        if let Ok(config) = LoopConfig::from_json(text) {
            assert!(config.validate().is_ok());
            assert!(EventLoop::new(config).is_ok());
        }
    }

    if let Ok(config) = postcard::from_bytes::<LoopConfig>(data) {
        let blob = postcard::to_allocvec(&config).expect("encode decoded config");
        let again: LoopConfig = postcard::from_bytes(&blob).expect("decode re-encoded config");
        assert_eq!(config, again);
    }
});
