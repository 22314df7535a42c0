#![allow(dead_code)]

use iapkit::geometry::{BBox, Pixel, Polygon};
use iapkit::ir::{Dataset, Image};
use iapkit::store::{Annotation, AnnotationStore, Geometry};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub const CLASS_NAMES: [&str; 4] = ["cell", "dot", "nucleus", "debris"];
pub const SLICE_KEYS: [&str; 3] = ["a.png", "img_Z1", "img_Z2"];
pub const IMAGE_SIZE: u32 = 200;

pub fn eps_yolo(image_w: u32, image_h: u32) -> f64 {
    image_w.max(image_h) as f64 * 1e-6
}

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Integer-cornered box inside the image.
pub fn arb_bbox(max: u32) -> BoxedStrategy<BBox<Pixel>> {
    (0..max - 1, 0..max - 1)
        .prop_flat_map(move |(x, y)| (Just(x), Just(y), 1..=max - x, 1..=max - y))
        .prop_map(|(x, y, w, h)| BBox::new(x as f64, y as f64, w as f64, h as f64))
        .boxed()
}

/// Axis-aligned polygon with a notch, integer vertices.
pub fn arb_polygon(max: u32) -> BoxedStrategy<Polygon> {
    arb_bbox(max)
        .prop_filter("room for a notch", |b| b.width >= 2.0 && b.height >= 2.0)
        .prop_map(|b| {
            let (x0, y0, x1, y1) = (b.x, b.y, b.xmax(), b.ymax());
            let mx = ((x0 + x1) / 2.0).floor();
            Polygon::new(vec![x0, y0, mx, y0 + 1.0, x1, y0, x1, y1, x0, y1])
                .expect("five vertices")
        })
        .boxed()
}

pub fn arb_geometry(max: u32) -> BoxedStrategy<Geometry> {
    prop_oneof![
        arb_bbox(max).prop_map(Geometry::BBox),
        arb_polygon(max).prop_map(Geometry::Polygon),
    ]
    .boxed()
}

/// `(slice index, class index, geometry)` triples.
pub fn arb_puts(max_len: usize) -> BoxedStrategy<Vec<(usize, usize, Geometry)>> {
    prop::collection::vec(
        (
            0..SLICE_KEYS.len(),
            0..CLASS_NAMES.len(),
            arb_geometry(IMAGE_SIZE),
        ),
        0..=max_len,
    )
    .boxed()
}

/// Store with every class registered and `puts` applied in order.
pub fn build_store(puts: &[(usize, usize, Geometry)]) -> AnnotationStore {
    let mut store = AnnotationStore::new();
    for name in CLASS_NAMES {
        store.registry_mut().add(name).expect("register class");
    }
    for (slice, class, geometry) in puts {
        let name = CLASS_NAMES[*class];
        let id = store.registry().id_of(name).expect("registered");
        store
            .put(SLICE_KEYS[*slice], Annotation::new(id, name, geometry.clone()))
            .expect("put annotation");
    }
    store
}

pub fn arb_store(max_len: usize) -> BoxedStrategy<AnnotationStore> {
    arb_puts(max_len).prop_map(|puts| build_store(&puts)).boxed()
}

/// One image per slice key, all `IMAGE_SIZE` square.
pub fn images_for_slices() -> Vec<Image> {
    SLICE_KEYS
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let file_name = if key.ends_with(".png") {
                key.to_string()
            } else {
                format!("{key}.png")
            };
            Image::new((i + 1) as u64, file_name, IMAGE_SIZE, IMAGE_SIZE).with_key(*key)
        })
        .collect()
}

pub fn snapshot(store: &AnnotationStore) -> Dataset {
    Dataset::from_store(store, images_for_slices())
}
