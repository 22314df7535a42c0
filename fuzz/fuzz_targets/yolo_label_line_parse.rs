//! Fuzz target for YOLO label files, one line at a time.

#![no_main]

use libfuzzer_sys::fuzz_target;
use iapkit::ir::io_yolo::fuzz_parse_label_line;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for line in text.lines().take(1024) {
        let _ = fuzz_parse_label_line(line);
    }
});
