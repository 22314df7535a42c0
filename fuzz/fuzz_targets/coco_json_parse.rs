//! Fuzz target for COCO annotation files.
//!
//! A document that parses is merged into an empty store, which drives the
//! segmentation and bbox conversion as well as class registration.

#![no_main]

use libfuzzer_sys::fuzz_target;
use iapkit::ir::io_coco_json::from_coco_slice;
use iapkit::store::AnnotationStore;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(dataset) = from_coco_slice(data) {
        let mut store = AnnotationStore::new();
        let _ = dataset.merge_into(&mut store);
    }
});
