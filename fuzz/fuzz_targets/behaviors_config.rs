#![no_main]

use libfuzzer_sys::fuzz_target;

use imgedge::config::parse_behaviors;
use imgedge::policy::{CompileOptions, compile_behaviors};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = parse_behaviors(text) else {
        return;
    };
    let options = CompileOptions {
        path_prefix: String::new(),
        max_dimension: 4000,
        cors_enabled: true,
    };
    if let Ok(set) = compile_behaviors(&config, &options) {
        let _ = set.select("/400x400/webp/rio/cat.jpg");
    }
});
