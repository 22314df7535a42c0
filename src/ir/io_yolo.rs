//! Ultralytics-style YOLO v8 reader and writer.
//!
//! A dataset directory holds `images/`, `labels/` and `data.yaml`. Each
//! label file has one line per object, either a box
//! `<class> <cx> <cy> <w> <h>` or a polygon `<class> <x1> <y1> <x2> <y2> ...`,
//! all coordinates normalized to `[0, 1]`. The writer only produces the
//! labels and `data.yaml`; copying or rendering rasters into `images/` is
//! the caller's job.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use super::model::{basename, Annotation, Category, Dataset, DatasetInfo, Image};
use super::{AnnotationId, CategoryId, ImageId};
use crate::error::IapError;
use crate::geometry::{BBox, Normalized, Polygon};
use crate::store::Geometry;

pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];
const LABEL_EXTENSION: &str = "txt";

/// A YOLO dataset read from disk.
#[derive(Clone, Debug, Default)]
pub struct YoloImport {
    pub dataset: Dataset,
    /// Absolute path of every image in `dataset`, keyed by image `key`.
    pub image_paths: BTreeMap<String, PathBuf>,
    /// Label files (relative, without extension) that have no image.
    pub orphan_labels: Vec<String>,
}

/// Read a YOLO dataset directory.
///
/// `path` may be the dataset root containing `images/` + `labels/`, or the
/// `labels/` directory itself. Labels without a matching image are reported
/// in [`YoloImport::orphan_labels`] instead of failing the read.
pub fn read_yolo_dir(path: &Path) -> Result<YoloImport, IapError> {
    let layout = discover_layout(path)?;
    let class_map = read_class_map(&layout)?;

    let mut image_files = collect_files_with_extensions(&layout.images_dir, &IMAGE_EXTENSIONS)?;
    image_files.sort_by_cached_key(|image_path| rel_string(&layout.images_dir, image_path));

    let mut images = Vec::with_capacity(image_files.len());
    let mut image_paths = BTreeMap::new();
    let mut image_lookup: BTreeMap<String, ImageMeta> = BTreeMap::new();

    for (index, image_path) in image_files.iter().enumerate() {
        let rel = rel_string(&layout.images_dir, image_path);
        let (width, height) = read_image_dimensions(image_path)?;
        let image_id = ImageId::new((index + 1) as u64);
        let key = basename(&rel).to_string();

        images.push(Image::new(image_id, rel.clone(), width, height).with_key(key.clone()));
        image_paths.insert(key, image_path.clone());
        image_lookup.insert(
            strip_extension(&rel),
            ImageMeta {
                id: image_id,
                width,
                height,
            },
        );
    }

    let categories: Vec<Category> = class_map
        .names
        .iter()
        .enumerate()
        .map(|(i, name)| Category::new((i + 1) as u64, name.clone()))
        .collect();

    let mut label_files = collect_files_with_extensions(&layout.labels_dir, &[LABEL_EXTENSION])?;
    label_files.sort_by_cached_key(|label_path| rel_string(&layout.labels_dir, label_path));

    let mut annotations = Vec::new();
    let mut orphan_labels = Vec::new();
    let mut next_annotation_id: u64 = 1;

    for label_path in label_files {
        let stem = strip_extension(&rel_string(&layout.labels_dir, &label_path));
        let Some(image_meta) = image_lookup.get(&stem).copied() else {
            log::warn!("label {} has no image", label_path.display());
            orphan_labels.push(stem);
            continue;
        };

        let content = fs::read_to_string(&label_path).map_err(IapError::Io)?;
        for (line_idx, line) in content.lines().enumerate() {
            let line_num = line_idx + 1;
            let Some(parsed) = parse_label_line(line, &label_path, line_num)? else {
                continue;
            };

            if parsed.class_id >= class_map.names.len() {
                return Err(IapError::YoloLabelParse {
                    path: label_path.clone(),
                    line: line_num,
                    message: format!(
                        "class_id {} is out of range for class map with {} class(es)",
                        parsed.class_id,
                        class_map.names.len()
                    ),
                });
            }

            let (w, h) = (image_meta.width as f64, image_meta.height as f64);
            let geometry = match parsed.shape {
                LabelShape::Box { cx, cy, w: bw, h: bh } => {
                    Geometry::BBox(BBox::<Normalized>::from_cxcywh(cx, cy, bw, bh).to_pixel(w, h))
                }
                LabelShape::Polygon(coords) => {
                    let pixels = coords
                        .chunks_exact(2)
                        .flat_map(|xy| [xy[0] * w, xy[1] * h])
                        .collect();
                    let polygon = Polygon::new(pixels).map_err(|e| IapError::YoloLabelParse {
                        path: label_path.clone(),
                        line: line_num,
                        message: e.to_string(),
                    })?;
                    Geometry::Polygon(polygon)
                }
            };

            annotations.push(Annotation::new(
                AnnotationId::new(next_annotation_id),
                image_meta.id,
                CategoryId::new(parsed.class_id as u64 + 1),
                geometry,
            ));
            next_annotation_id += 1;
        }
    }

    Ok(YoloImport {
        dataset: Dataset {
            info: DatasetInfo::default(),
            images,
            categories,
            annotations,
        },
        image_paths,
        orphan_labels,
    })
}

/// Write labels and `data.yaml` for `dataset` under `path`.
///
/// Creates `images/` (empty) and `labels/<stem>.txt` for every image, with
/// class indices following category id order.
pub fn write_yolo_dir(path: &Path, dataset: &Dataset) -> Result<(), IapError> {
    fs::create_dir_all(path).map_err(IapError::Io)?;

    let images_dir = path.join("images");
    let labels_dir = path.join("labels");
    fs::create_dir_all(&images_dir).map_err(IapError::Io)?;
    fs::create_dir_all(&labels_dir).map_err(IapError::Io)?;

    let mut categories_sorted: Vec<&Category> = dataset.categories.iter().collect();
    categories_sorted.sort_by_key(|cat| cat.id);

    let category_to_class: BTreeMap<CategoryId, usize> = categories_sorted
        .iter()
        .enumerate()
        .map(|(idx, cat)| (cat.id, idx))
        .collect();

    let image_ids: BTreeSet<ImageId> = dataset.images.iter().map(|img| img.id).collect();
    let mut annotations_by_image: BTreeMap<ImageId, Vec<&Annotation>> = BTreeMap::new();
    for ann in &dataset.annotations {
        if !image_ids.contains(&ann.image_id) {
            return Err(IapError::ExportFailed {
                slice: ann.image_id.to_string(),
                message: format!("annotation {} references a missing image", ann.id),
            });
        }
        annotations_by_image
            .entry(ann.image_id)
            .or_default()
            .push(ann);
    }

    for image in &dataset.images {
        let label_path = labels_dir.join(format!("{}.{LABEL_EXTENSION}", image.stem()));
        if let Some(parent) = label_path.parent() {
            fs::create_dir_all(parent).map_err(IapError::Io)?;
        }
        let mut label_file = fs::File::create(&label_path).map_err(IapError::Io)?;

        let mut anns = annotations_by_image.remove(&image.id).unwrap_or_default();
        anns.sort_by_key(|ann| ann.id);

        for ann in anns {
            let Some(class_index) = category_to_class.get(&ann.category_id) else {
                return Err(IapError::ExportFailed {
                    slice: image.key.clone(),
                    message: format!(
                        "annotation {} references missing category {}",
                        ann.id, ann.category_id
                    ),
                });
            };
            writeln!(
                label_file,
                "{}",
                format_label_line(*class_index, &ann.geometry, image.width, image.height)
            )
            .map_err(IapError::Io)?;
        }
    }

    write_data_yaml(path, &categories_sorted)?;
    log::info!(
        "wrote YOLO labels for {} image(s) to {}",
        dataset.images.len(),
        path.display()
    );
    Ok(())
}

/// One label line with six decimals, e.g. `0 0.200000 0.200000 0.200000 0.200000`.
pub fn format_label_line(class_index: usize, geometry: &Geometry, width: u32, height: u32) -> String {
    let (w, h) = (width as f64, height as f64);
    match geometry {
        Geometry::BBox(b) => {
            let (cx, cy, bw, bh) = b.to_normalized(w, h).to_cxcywh();
            format!("{class_index} {cx:.6} {cy:.6} {bw:.6} {bh:.6}")
        }
        Geometry::Polygon(p) => {
            let mut line = class_index.to_string();
            for point in p.points() {
                line.push_str(&format!(" {:.6} {:.6}", point.x / w, point.y / h));
            }
            line
        }
    }
}

#[derive(Clone, Copy)]
struct ImageMeta {
    id: ImageId,
    width: u32,
    height: u32,
}

#[derive(Clone, Debug)]
struct YoloLayout {
    #[cfg_attr(not(test), allow(dead_code))]
    root: PathBuf,
    images_dir: PathBuf,
    labels_dir: PathBuf,
    class_map_source: YoloClassMapSource,
}

#[derive(Clone, Debug)]
enum YoloClassMapSource {
    DataYaml(PathBuf),
    ClassesTxt(PathBuf),
    Inferred,
}

#[derive(Debug)]
struct YoloClassMap {
    names: Vec<String>,
}

#[derive(Debug, PartialEq)]
enum LabelShape {
    Box { cx: f64, cy: f64, w: f64, h: f64 },
    Polygon(Vec<f64>),
}

#[derive(Debug, PartialEq)]
struct YoloLabelRow {
    class_id: usize,
    shape: LabelShape,
}

fn discover_layout(input: &Path) -> Result<YoloLayout, IapError> {
    if !input.is_dir() {
        return Err(IapError::YoloLayoutInvalid {
            path: input.to_path_buf(),
            message: "input must be a directory".to_string(),
        });
    }

    let (root, labels_dir) = if input.join("labels").is_dir() {
        (input.to_path_buf(), input.join("labels"))
    } else if is_dir_named(input, "labels") {
        let root = input
            .parent()
            .ok_or_else(|| IapError::YoloLayoutInvalid {
                path: input.to_path_buf(),
                message: "labels directory has no parent directory".to_string(),
            })?
            .to_path_buf();
        (root, input.to_path_buf())
    } else {
        return Err(IapError::YoloLayoutInvalid {
            path: input.to_path_buf(),
            message: "expected a YOLO dataset root containing labels/ or a labels/ directory itself"
                .to_string(),
        });
    };

    let images_dir = root.join("images");
    if !images_dir.is_dir() {
        return Err(IapError::YoloLayoutInvalid {
            path: images_dir,
            message: "missing images/ directory".to_string(),
        });
    }

    let data_yaml = root.join("data.yaml");
    let classes_txt = root.join("classes.txt");
    let class_map_source = if data_yaml.is_file() {
        YoloClassMapSource::DataYaml(data_yaml)
    } else if classes_txt.is_file() {
        YoloClassMapSource::ClassesTxt(classes_txt)
    } else {
        YoloClassMapSource::Inferred
    };

    Ok(YoloLayout {
        root,
        images_dir,
        labels_dir,
        class_map_source,
    })
}

fn read_class_map(layout: &YoloLayout) -> Result<YoloClassMap, IapError> {
    match &layout.class_map_source {
        YoloClassMapSource::DataYaml(path) => read_data_yaml_names(path),
        YoloClassMapSource::ClassesTxt(path) => read_classes_txt(path),
        YoloClassMapSource::Inferred => infer_class_map(&layout.labels_dir),
    }
}

#[derive(Debug, Deserialize)]
struct DataYaml {
    names: DataYamlNames,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataYamlNames {
    Sequence(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}

fn read_data_yaml_names(path: &Path) -> Result<YoloClassMap, IapError> {
    let data = fs::read_to_string(path).map_err(IapError::Io)?;
    let parsed: DataYaml =
        serde_yaml::from_str(&data).map_err(|source| IapError::YoloDataYamlParse {
            path: path.to_path_buf(),
            source,
        })?;

    let names = match parsed.names {
        DataYamlNames::Sequence(names) => names,
        DataYamlNames::Mapping(mapping) => {
            let len = mapping.keys().max().map_or(0, |max| max + 1);
            (0..len)
                .map(|index| match mapping.get(&index) {
                    Some(name) if !name.trim().is_empty() => name.clone(),
                    _ => format!("class_{index}"),
                })
                .collect()
        }
    };

    Ok(YoloClassMap { names })
}

fn write_data_yaml(output_root: &Path, categories: &[&Category]) -> Result<(), IapError> {
    let mut yaml = String::from("path: .\ntrain: images\nval: images\ntest: images\n");
    yaml.push_str(&format!("nc: {}\n", categories.len()));
    yaml.push_str("names:\n");
    for (idx, category) in categories.iter().enumerate() {
        yaml.push_str(&format!("  {}: {}\n", idx, yaml_single_quoted(&category.name)));
    }

    let path = output_root.join("data.yaml");
    fs::write(&path, yaml).map_err(IapError::Io)
}

fn yaml_single_quoted(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

fn read_classes_txt(path: &Path) -> Result<YoloClassMap, IapError> {
    let data = fs::read_to_string(path).map_err(IapError::Io)?;
    let names = data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    Ok(YoloClassMap { names })
}

fn infer_class_map(labels_dir: &Path) -> Result<YoloClassMap, IapError> {
    let label_files = collect_files_with_extensions(labels_dir, &[LABEL_EXTENSION])?;

    let mut max_class_id = None;
    for label_path in label_files {
        let content = fs::read_to_string(&label_path).map_err(IapError::Io)?;
        for (line_idx, line) in content.lines().enumerate() {
            if let Some(parsed) = parse_label_line(line, &label_path, line_idx + 1)? {
                max_class_id = max_class_id.max(Some(parsed.class_id));
            }
        }
    }

    let names = match max_class_id {
        Some(max_id) => (0..=max_id).map(|id| format!("class_{id}")).collect(),
        None => Vec::new(),
    };
    Ok(YoloClassMap { names })
}

fn collect_files_with_extensions(root: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, IapError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|source| IapError::YoloLayoutInvalid {
            path: root.to_path_buf(),
            message: format!("failed while traversing directory: {source}"),
        })?;

        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

pub(crate) fn read_image_dimensions(path: &Path) -> Result<(u32, u32), IapError> {
    let size = imagesize::size(path).map_err(|source| IapError::ImageDimensionRead {
        path: path.to_path_buf(),
        source,
    })?;
    let width = u32::try_from(size.width).map_err(|_| IapError::DecodeFailed {
        path: path.to_path_buf(),
        message: format!("image width {} does not fit in u32", size.width),
    })?;
    let height = u32::try_from(size.height).map_err(|_| IapError::DecodeFailed {
        path: path.to_path_buf(),
        message: format!("image height {} does not fit in u32", size.height),
    })?;
    Ok((width, height))
}

fn parse_label_line(line: &str, file_path: &Path, line_num: usize) -> Result<Option<YoloLabelRow>, IapError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let mut tokens = trimmed.split_whitespace();
    let class_token = tokens.next().unwrap_or_default();
    let class_id = class_token
        .parse::<usize>()
        .map_err(|_| IapError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("invalid class_id '{class_token}'; expected non-negative integer"),
        })?;

    let coords = tokens
        .map(|raw| {
            raw.parse::<f64>().map_err(|_| IapError::YoloLabelParse {
                path: file_path.to_path_buf(),
                line: line_num,
                message: format!("invalid coordinate '{raw}'; expected floating-point number"),
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let shape = match coords.len() {
        4 => LabelShape::Box {
            cx: coords[0],
            cy: coords[1],
            w: coords[2],
            h: coords[3],
        },
        n if n >= 6 && n % 2 == 0 => LabelShape::Polygon(coords),
        n => {
            return Err(IapError::YoloLabelParse {
                path: file_path.to_path_buf(),
                line: line_num,
                message: format!(
                    "expected 4 box values or an even count of at least 6 polygon values, found {n}"
                ),
            })
        }
    };

    Ok(Some(YoloLabelRow { class_id, shape }))
}

/// Fuzz-only entrypoint for single-line parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(input: &str) -> Result<(), IapError> {
    let _ = parse_label_line(input, Path::new("<fuzz>"), 1)?;
    Ok(())
}

fn is_dir_named(path: &Path, dir_name: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.eq_ignore_ascii_case(dir_name))
        .unwrap_or(false)
}

fn rel_string(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

fn strip_extension(rel: &str) -> String {
    match rel.rfind('.') {
        Some(i) if i > rel.rfind('/').map_or(0, |s| s + 1) => rel[..i].to_string(),
        _ => rel.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        image::GrayImage::new(width, height)
            .save(path)
            .expect("write png");
    }

    fn create_basic_layout(root: &Path) {
        fs::create_dir_all(root.join("images/train")).expect("create images dir");
        fs::create_dir_all(root.join("labels/train")).expect("create labels dir");
    }

    #[test]
    fn parse_label_line_infers_shape_from_token_count() {
        let bbox = parse_label_line("2 0.5 0.25 0.3 0.1", Path::new("a.txt"), 1)
            .expect("parse should succeed")
            .expect("line should produce a row");
        assert_eq!(
            bbox,
            YoloLabelRow {
                class_id: 2,
                shape: LabelShape::Box {
                    cx: 0.5,
                    cy: 0.25,
                    w: 0.3,
                    h: 0.1
                },
            }
        );

        let poly = parse_label_line("0 0.1 0.1 0.9 0.1 0.9 0.9", Path::new("a.txt"), 2)
            .expect("parse should succeed")
            .expect("line should produce a row");
        assert!(matches!(poly.shape, LabelShape::Polygon(ref c) if c.len() == 6));
    }

    #[test]
    fn parse_label_line_skips_empty_rows() {
        let parsed = parse_label_line("   ", Path::new("a.txt"), 2).expect("parse should succeed");
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_label_line_rejects_odd_and_short_rows() {
        for line in ["0 0.1 0.2", "0 0.1 0.2 0.3 0.4 0.5", "0 0.1 0.2 0.3 0.4 0.5 0.6 0.7", "x 0.1 0.2 0.3 0.4"] {
            let err = parse_label_line(line, Path::new("a.txt"), 3).unwrap_err();
            assert!(matches!(err, IapError::YoloLabelParse { .. }), "{line}");
        }
    }

    #[test]
    fn label_line_matches_six_decimal_format() {
        let line = format_label_line(0, &Geometry::BBox(BBox::new(64.0, 48.0, 128.0, 96.0)), 640, 480);
        assert_eq!(line, "0 0.200000 0.200000 0.200000 0.200000");

        let tri = Polygon::new(vec![0.0, 0.0, 320.0, 0.0, 320.0, 240.0]).unwrap();
        let line = format_label_line(3, &Geometry::Polygon(tri), 640, 480);
        assert_eq!(line, "3 0.000000 0.000000 0.500000 0.000000 0.500000 0.500000");
    }

    #[test]
    fn discover_layout_accepts_root_or_labels_dir() {
        let temp = tempfile::tempdir().expect("create temp dir");
        create_basic_layout(temp.path());

        let root_layout = discover_layout(temp.path()).expect("discover from root");
        assert_eq!(root_layout.root, temp.path());
        assert_eq!(root_layout.labels_dir, temp.path().join("labels"));

        let labels_layout =
            discover_layout(&temp.path().join("labels")).expect("discover from labels dir");
        assert_eq!(labels_layout.root, temp.path());
    }

    #[test]
    fn class_map_prefers_data_yaml_over_classes_txt() {
        let temp = tempfile::tempdir().expect("create temp dir");
        create_basic_layout(temp.path());
        fs::write(temp.path().join("data.yaml"), "names:\n  0: cell\n  2: debris\n")
            .expect("write data yaml");
        fs::write(temp.path().join("classes.txt"), "wrong\n").expect("write classes");

        let layout = discover_layout(temp.path()).expect("discover layout");
        let class_map = read_class_map(&layout).expect("read class map");
        assert_eq!(class_map.names, vec!["cell", "class_1", "debris"]);
    }

    #[test]
    fn read_yolo_dir_denormalizes_and_reports_orphans() {
        let temp = tempfile::tempdir().expect("create temp dir");
        create_basic_layout(temp.path());
        write_png(&temp.path().join("images/train/a.png"), 20, 10);
        fs::write(temp.path().join("data.yaml"), "names:\n  - cell\n  - dot\n")
            .expect("write data yaml");
        fs::write(
            temp.path().join("labels/train/a.txt"),
            "1 0.5 0.5 0.5 0.5\n0 0.0 0.0 1.0 0.0 1.0 1.0\n",
        )
        .expect("write a labels");
        fs::write(temp.path().join("labels/train/ghost.txt"), "0 0.5 0.5 1 1\n")
            .expect("write orphan labels");

        let import = read_yolo_dir(temp.path()).expect("read yolo dataset");
        let dataset = &import.dataset;
        assert_eq!(dataset.images[0].file_name, "train/a.png");
        assert_eq!(dataset.images[0].key, "a.png");
        assert_eq!(import.orphan_labels, vec!["train/ghost"]);
        assert_eq!(dataset.annotations.len(), 2);
        assert_eq!(
            dataset.annotations[0].geometry,
            Geometry::BBox(BBox::new(5.0, 2.5, 10.0, 5.0))
        );
        let Geometry::Polygon(p) = &dataset.annotations[1].geometry else {
            panic!("expected polygon");
        };
        assert_eq!(p.coords(), &[0.0, 0.0, 20.0, 0.0, 20.0, 10.0]);
    }

    #[test]
    fn write_yolo_dir_creates_data_yaml_and_labels() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let dataset = Dataset {
            images: vec![
                Image::new(1u64, "img.png", 640, 480),
                Image::new(2u64, "stack_Z1.png", 8, 8).with_key("stack_Z1"),
            ],
            categories: vec![Category::new(1u64, "cell")],
            annotations: vec![Annotation::new(
                1u64,
                1u64,
                1u64,
                Geometry::BBox(BBox::new(64.0, 48.0, 128.0, 96.0)),
            )],
            ..Default::default()
        };

        write_yolo_dir(temp.path(), &dataset).expect("write yolo dataset");

        let data_yaml = fs::read_to_string(temp.path().join("data.yaml")).expect("read data.yaml");
        assert!(data_yaml.contains("train: images"));
        assert!(data_yaml.contains("0: 'cell'"));
        let label = fs::read_to_string(temp.path().join("labels/img.txt")).expect("read label");
        assert_eq!(label, "0 0.200000 0.200000 0.200000 0.200000\n");
        assert!(fs::read_to_string(temp.path().join("labels/stack_Z1.txt"))
            .expect("read empty label")
            .is_empty());
    }
}
