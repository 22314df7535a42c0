//! Fuzz target for Pascal VOC annotation XML, including the
//! `<segmentation>` point lists written by the voc-seg export.

#![no_main]

use libfuzzer_sys::fuzz_target;
use iapkit::ir::io_voc_xml::from_voc_xml_slice;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }
    let _ = from_voc_xml_slice(data);
});
