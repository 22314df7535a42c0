use iapkit::ir::io_coco_json::{from_coco_str, to_coco_string};
use iapkit::ir::io_yolo::format_label_line;
use iapkit::store::{AnnotationStore, Geometry};
use proptest::prelude::*;

mod proptest_helpers;

use proptest_helpers::{arb_bbox, arb_store, eps_yolo, snapshot, CLASS_NAMES};

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn coco_string_round_trip_restores_the_store(store in arb_store(25)) {
        let dataset = snapshot(&store);
        let json = to_coco_string(&dataset).expect("serialize coco");
        let mut restored = from_coco_str(&json).expect("parse coco");
        // slice exports are matched back by stem on import
        for (image, original) in restored.images.iter_mut().zip(&dataset.images) {
            prop_assert_eq!(&image.file_name, &original.file_name);
            image.key = original.key.clone();
        }

        let mut fresh = AnnotationStore::new();
        for name in CLASS_NAMES {
            fresh.registry_mut().add(name).expect("register class");
        }
        let summary = restored.merge_into(&mut fresh).expect("merge");
        prop_assert_eq!(summary.annotations, store.annotation_count());
        prop_assert_eq!(summary.skipped, 0);
        prop_assert_eq!(fresh, store);
    }

    #[test]
    fn coco_serialization_is_deterministic(store in arb_store(15)) {
        let dataset = snapshot(&store);
        let first = to_coco_string(&dataset).expect("serialize");
        let again = to_coco_string(&from_coco_str(&first).expect("parse")).expect("serialize");
        prop_assert_eq!(first, again);
    }

    #[test]
    fn yolo_box_line_decodes_to_the_same_box(b in arb_bbox(640), class in 0usize..5) {
        let line = format_label_line(class, &Geometry::BBox(b), 640, 640);
        let tokens: Vec<&str> = line.split(' ').collect();
        prop_assert_eq!(tokens.len(), 5);
        prop_assert_eq!(tokens[0].parse::<usize>().expect("class index"), class);
        for token in &tokens[1..] {
            prop_assert_eq!(token.split('.').nth(1).map(str::len), Some(6));
        }

        let values: Vec<f64> = tokens[1..].iter().map(|t| t.parse().expect("number")).collect();
        let (cx, cy, w, h) = (values[0] * 640.0, values[1] * 640.0, values[2] * 640.0, values[3] * 640.0);
        let eps = eps_yolo(640, 640);
        prop_assert!((cx - w / 2.0 - b.x).abs() <= eps);
        prop_assert!((cy - h / 2.0 - b.y).abs() <= eps);
        prop_assert!((w - b.width).abs() <= eps);
        prop_assert!((h - b.height).abs() <= eps);
    }
}
