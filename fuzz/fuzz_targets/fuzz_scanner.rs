//! Fuzz testing for the injection scanner and input decoding.
//!
//! Feeds arbitrary bytes through the same decoding the injection guard uses
//! (query strings, form bodies, JSON bodies) and scans the result. The
//! scanner must never panic, whatever the input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the scanner fuzz target
//! cargo +nightly fuzz run fuzz_scanner
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_scanner -- -max_total_time=60
//! ```

#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use request_shield::middleware::injection::parse_urlencoded;
use request_shield::scanner::InjectionScanner;
use serde_json::Value;

fn scanner() -> &'static InjectionScanner {
    static SCANNER: OnceLock<InjectionScanner> = OnceLock::new();
    SCANNER.get_or_init(|| InjectionScanner::new().expect("standard rules compile"))
}

fuzz_target!(|data: &[u8]| {
    let scanner = scanner();

    // Query string and form body decoding
    let decoded = parse_urlencoded(data);
    let _ = scanner.scan(&decoded, &Value::Null, &decoded);

    // JSON body, when the bytes happen to parse
    if let Ok(json) = serde_json::from_slice::<Value>(data) {
        let _ = scanner.check_value(&json);
    }

    // Raw text, as route parameters are scanned
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = scanner.check_str(s);
        let params = Value::String(s.to_string());
        let verdict = scanner.scan(&Value::Null, &params, &Value::Null);
        assert_eq!(verdict.is_clean(), scanner.check_str(s).is_none());
    }
});
