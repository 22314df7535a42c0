//! Exports of whole projects and re-imports of the written datasets.

mod common;

use std::fs;
use std::path::Path;

use common::{bbox, put, quiet_config, square, write_png, write_tiff_stack};
use iapkit::conversion::{
    export_project, import_annotations, ExportFormat, ExportIssueCode, ImportFormat, COCO_FILE,
    VOC_DIR,
};
use iapkit::image_source::DimensionAssignment;
use iapkit::ir::io_labeled_images::LABELED_DIR;
use iapkit::ir::io_semantic_labels::SEMANTIC_DIR;
use iapkit::progress::NoProgress;
use iapkit::prompt::FixedAnswers;
use iapkit::Project;

fn two_image_project(dir: &Path) -> Project {
    let a = write_png(&dir.join("in/a.png"), 100, 100);
    let b = write_png(&dir.join("in/b.png"), 60, 40);
    let mut prompt = FixedAnswers::new();
    let mut project = Project::new(quiet_config());
    project.add_image(&a, &mut prompt).expect("add a");
    project.add_image(&b, &mut prompt).expect("add b");
    project.add_class("cell", None, &mut prompt).expect("add cell");
    project.add_class("dot", None, &mut prompt).expect("add dot");
    put(&mut project, "a.png", "cell", square(10.0, 10.0, 80.0));
    put(&mut project, "a.png", "cell", square(20.0, 20.0, 10.0));
    put(&mut project, "a.png", "dot", bbox(5.0, 5.0, 4.0, 4.0));
    put(&mut project, "b.png", "dot", bbox(1.0, 2.0, 3.0, 4.0));
    project
}

#[test]
fn coco_export_round_trips_into_a_fresh_project() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut project = two_image_project(temp.path());
    let out = temp.path().join("coco");

    let report = export_project(&mut project, ExportFormat::Coco, &out, &mut NoProgress)
        .expect("export coco");
    assert!(!report.is_lossy(), "{report}");
    assert_eq!(report.counts.annotations, 4);
    assert_eq!(report.files_written, 3);
    assert!(out.join(COCO_FILE).is_file());
    assert!(out.join("images/a.png").is_file());

    let mut fresh = Project::new(quiet_config());
    let mut prompt = FixedAnswers::new();
    let imported = import_annotations(&mut fresh, ImportFormat::Coco, &out, &mut prompt)
        .expect("import coco");
    assert_eq!(imported.added_images, vec!["a.png", "b.png"]);
    assert!(imported.dropped_images.is_empty());
    assert_eq!(imported.merge.new_classes, vec!["cell", "dot"]);
    assert_eq!(fresh.store(), project.store());
}

#[test]
fn slice_exports_match_back_by_stem() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = write_tiff_stack(&temp.path().join("in/img.tif"), 3, 32, 32);
    let dims: DimensionAssignment = "ZHW".parse().expect("parse dims");
    let mut prompt = FixedAnswers::new().with_dims(dims);
    let mut project = Project::new(quiet_config());
    project.add_image(&source, &mut prompt).expect("add stack");
    project.add_class("cell", None, &mut prompt).expect("add class");
    put(&mut project, "img_Z2", "cell", square(4.0, 4.0, 8.0));

    let out = temp.path().join("coco");
    let report = export_project(&mut project, ExportFormat::Coco, &out, &mut NoProgress)
        .expect("export coco");
    assert!(report.has(ExportIssueCode::SlicesRendered));
    for key in ["img_Z1", "img_Z2", "img_Z3"] {
        assert!(out.join(format!("images/{key}.png")).is_file(), "{key}");
    }

    let mut other = Project::new(quiet_config());
    other.add_image(&source, &mut prompt).expect("add stack");
    let imported = import_annotations(&mut other, ImportFormat::Coco, &out, &mut prompt)
        .expect("import coco");
    assert!(imported.added_images.is_empty());
    assert_eq!(other.images().len(), 1);
    assert_eq!(other.store().annotations("img_Z2", "cell").len(), 1);
}

#[test]
fn yolo_labels_are_normalized_center_boxes() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let image = write_png(&temp.path().join("in/img.png"), 640, 480);
    let mut prompt = FixedAnswers::new();
    let mut project = Project::new(quiet_config());
    project.add_image(&image, &mut prompt).expect("add image");
    project.add_class("cell", None, &mut prompt).expect("add class");
    put(&mut project, "img.png", "cell", bbox(64.0, 48.0, 128.0, 96.0));

    let out = temp.path().join("yolo");
    let report = export_project(&mut project, ExportFormat::Yolo, &out, &mut NoProgress)
        .expect("export yolo");
    assert!(report.has(ExportIssueCode::DropOrdinals));

    let labels = fs::read_to_string(out.join("labels/img.txt")).expect("read labels");
    assert_eq!(labels, "0 0.200000 0.200000 0.200000 0.200000\n");
    let data = fs::read_to_string(out.join("data.yaml")).expect("read data.yaml");
    assert!(data.contains("cell"));
    assert!(out.join("images/img.png").is_file());

    let mut fresh = Project::new(quiet_config());
    let imported = import_annotations(&mut fresh, ImportFormat::Yolo, &out, &mut prompt)
        .expect("import yolo");
    assert_eq!(imported.merge.annotations, 1);
    let back = &fresh.store().annotations("img.png", "cell")[0];
    assert_eq!(back.bbox().to_array(), [64.0, 48.0, 128.0, 96.0]);
}

#[test]
fn voc_writes_polygons_as_boxes() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut project = two_image_project(temp.path());
    let out = temp.path().join("voc");

    let report = export_project(&mut project, ExportFormat::Voc, &out, &mut NoProgress)
        .expect("export voc");
    assert!(report.has(ExportIssueCode::VocDropsPolygonDetail));
    let xml = fs::read_to_string(out.join(VOC_DIR).join("Annotations/a.xml")).expect("read xml");
    assert!(xml.contains("<xmin>10</xmin>"));
    assert!(xml.contains("<xmax>90</xmax>"));
    assert!(!xml.contains("<segmentation>"));

    let out = temp.path().join("voc-seg");
    export_project(&mut project, ExportFormat::VocSeg, &out, &mut NoProgress)
        .expect("export voc-seg");
    let xml = fs::read_to_string(out.join(VOC_DIR).join("Annotations/a.xml")).expect("read xml");
    assert!(xml.contains("<segmented>1</segmented>"));
    assert!(xml.contains("<pt1><x>10</x><y>10</y></pt1>"));
}

#[test]
fn raster_exports_write_masks() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut project = two_image_project(temp.path());

    let out = temp.path().join("labeled");
    let report = export_project(&mut project, ExportFormat::Labeled, &out, &mut NoProgress)
        .expect("export labeled");
    assert!(report.has(ExportIssueCode::RasterNotReversible));
    let cell = image::open(out.join(LABELED_DIR).join("cell/a_mask.png"))
        .expect("open cell mask")
        .to_luma16();
    assert_eq!(cell.get_pixel(50, 50).0, [1]);
    assert_eq!(cell.get_pixel(25, 25).0, [2]);
    assert_eq!(cell.get_pixel(2, 2).0, [0]);
    assert!(out.join(LABELED_DIR).join("dot/b_mask.png").is_file());
    assert!(!out.join(LABELED_DIR).join("cell/b_mask.png").exists());

    let out = temp.path().join("semantic");
    export_project(&mut project, ExportFormat::Semantic, &out, &mut NoProgress)
        .expect("export semantic");
    let mask = image::open(out.join(SEMANTIC_DIR).join("a_semantic_mask.png"))
        .expect("open semantic mask")
        .to_luma8();
    assert_eq!(mask.get_pixel(50, 50).0, [1]);
    assert_eq!(mask.get_pixel(6, 6).0, [2]);
    let mapping =
        fs::read_to_string(out.join(SEMANTIC_DIR).join("class_mapping.txt")).expect("mapping");
    assert_eq!(mapping, "0: background\n1: cell\n2: dot\n");
}

#[test]
fn export_replaces_previous_output_only() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut project = two_image_project(temp.path());
    let out = temp.path().join("coco");
    fs::create_dir_all(out.join("images")).expect("create output");
    fs::write(out.join("images/stale.png"), b"old").expect("write stale");
    fs::write(out.join("README"), b"keep").expect("write readme");

    export_project(&mut project, ExportFormat::Coco, &out, &mut NoProgress).expect("export");
    assert!(!out.join("images/stale.png").exists());
    assert!(out.join("README").is_file());
    let leftovers = fs::read_dir(temp.path())
        .expect("list temp dir")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".iapkit-export-"))
        .count();
    assert_eq!(leftovers, 0);
}
