//! Fuzz target for `.iap` project documents.
//!
//! Parses arbitrary bytes as a project file and, when that succeeds, walks
//! every stored annotation through the store conversion.

#![no_main]

use libfuzzer_sys::fuzz_target;
use iapkit::project::from_project_slice;
use iapkit::store::ClassId;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let Ok(document) = from_project_slice(data) else {
        return;
    };
    for image in &document.images {
        for (_, records) in image.keyed_annotations() {
            for record in records {
                let _ = record.to_annotation(ClassId::new(1));
            }
        }
    }
});
