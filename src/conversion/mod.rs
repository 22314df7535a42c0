//! Export and import between a [`Project`] and the interchange formats.
//!
//! Every export goes through one [`Dataset`] snapshot ([`export_dataset`]),
//! so class ids always come from the registry. The target format is written
//! into a hidden stage directory next to the output and moved into place only
//! after the last file was written; an error or a cancelled progress sink
//! drops the stage and leaves the output as it was.
//!
//! Output layout by format:
//!
//! ```text
//! coco      annotations.json, images/
//! yolo      data.yaml, images/, labels/
//! labeled   labeled_images/<class>/<stem>_mask.png, labeled_images/class_summary.txt
//! semantic  semantic_labels/<stem>_semantic_mask.png, semantic_labels/class_mapping.txt
//! voc       pascal_voc/Annotations/<stem>.xml
//! voc-seg   pascal_voc/Annotations/<stem>.xml (with <segmentation>)
//! ```

pub mod report;

pub use report::{
    ExportCounts, ExportIssue, ExportIssueCode, ExportReport, ExportSeverity, ImportReport,
};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Local;
use walkdir::WalkDir;

use crate::editor::Editor;
use crate::error::IapError;
use crate::ir::io_coco_json::{read_coco_json, write_coco_json};
use crate::ir::io_labeled_images::{write_labeled_image, write_labeled_summary};
use crate::ir::io_semantic_labels::{class_values, write_semantic_mapping, write_semantic_mask};
use crate::ir::io_voc_xml::{read_voc_dir, write_voc_dir, VocFlavor};
use crate::ir::io_yolo::{read_yolo_dir, write_yolo_dir};
use crate::ir::{Dataset, DatasetInfo, Image};
use crate::progress::{step, NoProgress, ProgressSink};
use crate::project::Project;
use crate::prompt::UserPrompt;
use crate::store::Geometry;

pub const COCO_FILE: &str = "annotations.json";
pub const VOC_DIR: &str = "pascal_voc";
const IMAGES_DIR: &str = "images";
const STAGE_PREFIX: &str = ".iapkit-export-";

// ============================================================================
// Formats
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Coco,
    Yolo,
    Labeled,
    Semantic,
    Voc,
    VocSeg,
}

/// How much of the store a format carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lossiness {
    /// Geometry, ordinals and colors survive.
    Lossless,
    /// Geometry survives; ordinals or colors may not.
    Conditional,
    /// Geometry cannot be read back as written.
    Lossy,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 6] = [
        ExportFormat::Coco,
        ExportFormat::Yolo,
        ExportFormat::Labeled,
        ExportFormat::Semantic,
        ExportFormat::Voc,
        ExportFormat::VocSeg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Coco => "coco",
            ExportFormat::Yolo => "yolo",
            ExportFormat::Labeled => "labeled",
            ExportFormat::Semantic => "semantic",
            ExportFormat::Voc => "voc",
            ExportFormat::VocSeg => "voc-seg",
        }
    }

    pub fn lossiness(&self) -> Lossiness {
        match self {
            ExportFormat::Coco => Lossiness::Lossless,
            ExportFormat::Yolo | ExportFormat::VocSeg => Lossiness::Conditional,
            ExportFormat::Voc | ExportFormat::Labeled | ExportFormat::Semantic => Lossiness::Lossy,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = IapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportFormat::ALL
            .into_iter()
            .find(|format| format.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| IapError::UnsupportedFormat(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImportFormat {
    Coco,
    Yolo,
    Voc,
}

impl ImportFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ImportFormat::Coco => "coco",
            ImportFormat::Yolo => "yolo",
            ImportFormat::Voc => "voc",
        }
    }
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImportFormat {
    type Err = IapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coco" => Ok(ImportFormat::Coco),
            "yolo" => Ok(ImportFormat::Yolo),
            "voc" => Ok(ImportFormat::Voc),
            _ => Err(IapError::UnsupportedFormat(s.to_string())),
        }
    }
}

// ============================================================================
// Export
// ============================================================================

/// Snapshot of the project for export: one image per slice key, in image
/// order. Single frames keep their file name; slices are named
/// `<slice-key>.png`.
pub fn export_dataset(project: &Project) -> Dataset {
    let mut images = Vec::new();
    for descriptor in project.images() {
        if descriptor.is_multi() {
            for key in descriptor.slice_keys() {
                let id = images.len() as u64 + 1;
                images.push(
                    Image::new(id, format!("{key}.png"), descriptor.width, descriptor.height)
                        .with_key(key),
                );
            }
        } else {
            let id = images.len() as u64 + 1;
            images.push(Image::new(
                id,
                descriptor.file_name.clone(),
                descriptor.width,
                descriptor.height,
            ));
        }
    }

    let mut dataset = Dataset::from_store(project.store(), images);
    dataset.info = DatasetInfo {
        description: Some(format!("exported by iapkit {}", env!("CARGO_PKG_VERSION"))),
        date_created: Some(Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
    };
    dataset
}

/// Counts plus what `format` will drop from `dataset`.
pub fn build_export_report(dataset: &Dataset, format: ExportFormat) -> ExportReport {
    let mut report = ExportReport::new(format.name());
    report.counts = ExportCounts {
        images: dataset.images.len(),
        categories: dataset.categories.len(),
        annotations: dataset.annotations.len(),
    };

    let polygons = dataset
        .annotations
        .iter()
        .filter(|a| matches!(a.geometry, Geometry::Polygon(_)))
        .count();
    let empty_images = dataset
        .images
        .iter()
        .filter(|image| dataset.annotations_of(image.id).next().is_none())
        .count();
    let rendered = dataset.images.iter().filter(|i| i.key != i.file_name).count();

    match format {
        ExportFormat::Voc if polygons > 0 => report.add(ExportIssue::warning(
            ExportIssueCode::VocDropsPolygonDetail,
            format!("{polygons} polygon(s) will be written as their bounding box"),
        )),
        ExportFormat::Labeled | ExportFormat::Semantic if !dataset.annotations.is_empty() => {
            report.add(ExportIssue::warning(
                ExportIssueCode::RasterNotReversible,
                "masks are raster only and cannot be imported back as polygons",
            ))
        }
        _ => {}
    }

    if matches!(
        format,
        ExportFormat::Yolo | ExportFormat::Voc | ExportFormat::VocSeg
    ) && !dataset.annotations.is_empty()
    {
        report.add(ExportIssue::warning(
            ExportIssueCode::DropOrdinals,
            "annotation ordinals are not stored; they are reassigned in file order on import",
        ));
    }
    if format != ExportFormat::Coco && !dataset.categories.is_empty() {
        report.add(ExportIssue::warning(
            ExportIssueCode::DropClassColors,
            format!("{} class color(s) will be dropped", dataset.categories.len()),
        ));
    }

    match format {
        ExportFormat::Yolo => {
            report.add(ExportIssue::info(
                ExportIssueCode::YoloClassOrder,
                "class indices follow registry order, starting at 0",
            ));
            report.add(ExportIssue::info(
                ExportIssueCode::YoloFloatPrecision,
                "coordinates are normalized and written with 6 decimals",
            ));
        }
        ExportFormat::Semantic => {
            report.add(ExportIssue::info(
                ExportIssueCode::SemanticValueOrder,
                "pixel values follow sorted class names (0 is background)",
            ));
            report.add(ExportIssue::info(
                ExportIssueCode::SemanticOverlapPolicy,
                "where classes overlap, the class with the higher id wins",
            ));
        }
        _ => {}
    }

    if empty_images > 0 && format != ExportFormat::Labeled {
        report.add(ExportIssue::info(
            ExportIssueCode::EmptyImagesKept,
            format!("{empty_images} image(s) without annotations get empty output"),
        ));
    }
    if rendered > 0 && matches!(format, ExportFormat::Coco | ExportFormat::Yolo) {
        report.add(ExportIssue::info(
            ExportIssueCode::SlicesRendered,
            format!("{rendered} slice(s) of multi-slice images are written as <slice>.png"),
        ));
    }

    report
}

/// Writes the project in `format` under `out`.
///
/// The editor's pending buffer is not consulted; use [`export_guarded`]
/// when an editor is open.
pub fn export_project(
    project: &mut Project,
    format: ExportFormat,
    out: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<ExportReport, IapError> {
    let dataset = export_dataset(project);
    let mut report = build_export_report(&dataset, format);

    let parent = match out.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| persistence_failed(&parent, e))?;
    let stage = tempfile::Builder::new()
        .prefix(STAGE_PREFIX)
        .tempdir_in(&parent)
        .map_err(|e| persistence_failed(&parent, e))?;
    log::info!(
        "exporting {} image(s) as {} to {}",
        dataset.images.len(),
        format,
        out.display()
    );

    let root = stage.path();
    let total = dataset.images.len();
    match format {
        ExportFormat::Coco => {
            write_images(project, &dataset, &root.join(IMAGES_DIR), progress)?;
            write_coco_json(&root.join(COCO_FILE), &dataset)?;
        }
        ExportFormat::Yolo => {
            write_images(project, &dataset, &root.join(IMAGES_DIR), progress)?;
            write_yolo_dir(root, &dataset)?;
        }
        ExportFormat::Labeled => {
            for (index, image) in dataset.images.iter().enumerate() {
                write_labeled_image(root, &dataset, image)?;
                step(progress, index + 1, total)?;
            }
            write_labeled_summary(root, &dataset)?;
        }
        ExportFormat::Semantic => {
            let values = class_values(&dataset)?;
            for (index, image) in dataset.images.iter().enumerate() {
                write_semantic_mask(root, &dataset, image, &values)?;
                step(progress, index + 1, total)?;
            }
            write_semantic_mapping(root, &dataset, &values)?;
        }
        ExportFormat::Voc | ExportFormat::VocSeg => {
            let flavor = if format == ExportFormat::VocSeg {
                VocFlavor::Segmentation
            } else {
                VocFlavor::BBox
            };
            write_voc_dir(&root.join(VOC_DIR), &dataset, flavor)?;
            step(progress, total, total)?;
        }
    }

    report.files_written = count_files(root);
    publish(root, out)?;
    log::info!(
        "exported {} file(s) to {}",
        report.files_written,
        out.display()
    );
    Ok(report)
}

/// [`export_project`] after forcing the editor's pending buffer through
/// commit-or-discard. `Ok(None)` means the user cancelled.
pub fn export_guarded(
    project: &mut Project,
    editor: &mut Editor,
    prompt: &mut dyn UserPrompt,
    format: ExportFormat,
    out: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<Option<ExportReport>, IapError> {
    if !editor.prepare_external(&mut project.edit_context(prompt))? {
        return Ok(None);
    }
    export_project(project, format, out, progress).map(Some)
}

/// Copies single frames and renders slices into `dir` under their export
/// file names.
fn write_images(
    project: &mut Project,
    dataset: &Dataset,
    dir: &Path,
    progress: &mut dyn ProgressSink,
) -> Result<(), IapError> {
    fs::create_dir_all(dir).map_err(IapError::Io)?;
    let total = dataset.images.len();
    for (index, image) in dataset.images.iter().enumerate() {
        let target = dir.join(&image.file_name);
        let copy_from = project
            .owner_of(&image.key)
            .filter(|d| !d.is_multi())
            .map(|d| d.path.clone());
        let written = match copy_from {
            Some(source) => fs::copy(&source, &target).map(|_| ()).map_err(IapError::Io),
            None => project
                .raster(&image.key, &mut NoProgress)
                .and_then(|raster| raster.save(&target)),
        };
        written.map_err(|e| IapError::ExportFailed {
            slice: image.key.clone(),
            message: e.to_string(),
        })?;
        step(progress, index + 1, total)?;
    }
    Ok(())
}

/// Moves every entry of `stage` into `out`, replacing entries of the same
/// name. Other content of `out` is left alone.
fn publish(stage: &Path, out: &Path) -> Result<(), IapError> {
    fs::create_dir_all(out).map_err(|e| persistence_failed(out, e))?;
    let entries = fs::read_dir(stage).map_err(|e| persistence_failed(stage, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| persistence_failed(stage, e))?;
        let target = out.join(entry.file_name());
        let cleared = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else if target.exists() {
            fs::remove_file(&target)
        } else {
            Ok(())
        };
        cleared
            .and_then(|()| fs::rename(entry.path(), &target))
            .map_err(|e| persistence_failed(&target, e))?;
    }
    Ok(())
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}

fn persistence_failed(path: &Path, error: std::io::Error) -> IapError {
    IapError::PersistenceFailed {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

// ============================================================================
// Import
// ============================================================================

/// A dataset read from disk plus where its images might be.
struct Incoming {
    dataset: Dataset,
    /// Directories searched for `Image::file_name` and its basename.
    search_dirs: Vec<PathBuf>,
    /// Exact locations the reader already knows, keyed by image key.
    known_paths: BTreeMap<String, PathBuf>,
    /// Names referenced by the source that have no image at all.
    unreferenced: Vec<String>,
}

/// Merges the annotations at `path` into the project.
///
/// Each incoming image is matched to a slice the project already produces,
/// either by file name or, for re-imported slice exports, by file stem.
/// Images found next to the import are added to the project. The rest are
/// missing: [`UserPrompt::proceed_without`] decides between dropping their
/// annotations and cancelling the import, in which case nothing changes.
pub fn import_annotations(
    project: &mut Project,
    format: ImportFormat,
    path: &Path,
    prompt: &mut dyn UserPrompt,
) -> Result<ImportReport, IapError> {
    let Incoming {
        mut dataset,
        search_dirs,
        known_paths,
        unreferenced,
    } = read_incoming(format, path)?;
    log::info!(
        "importing {} from {} ({} image(s), {} annotation(s))",
        format,
        path.display(),
        dataset.images.len(),
        dataset.annotations.len()
    );

    let produced: BTreeSet<String> = project.slice_keys().into_iter().collect();
    let mut to_add: Vec<(String, PathBuf)> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    for image in &mut dataset.images {
        if produced.contains(&image.key) {
            continue;
        }
        let stem = strip_extension(&image.key).to_string();
        if produced.contains(&stem) {
            log::debug!("matched {} to slice '{}'", image.file_name, stem);
            image.key = stem;
            continue;
        }
        match locate(image, &search_dirs, &known_paths) {
            Some(found) => to_add.push((image.key.clone(), found)),
            None => missing.push(image.key.clone()),
        }
    }

    let mut report = ImportReport {
        format: format.name().to_string(),
        ..Default::default()
    };
    let mut asked: Vec<String> = missing.clone();
    asked.extend(unreferenced);
    if !asked.is_empty() {
        log::warn!("{} referenced image(s) not found: {}", asked.len(), asked.join(", "));
        if !prompt.proceed_without(&asked) {
            return Err(IapError::Cancelled);
        }
    }

    for (key, found) in to_add {
        match project.add_image(&found, prompt) {
            Ok(descriptor) if descriptor.slice_keys().contains(&key) => {
                report.added_images.push(key);
            }
            Ok(descriptor) => {
                log::warn!(
                    "{} opened as {} slice(s); its annotations are not imported",
                    descriptor.file_name,
                    descriptor.slice_keys().len()
                );
                missing.push(key);
            }
            Err(error) => {
                prompt.notify(&error);
                missing.push(key);
            }
        }
    }

    if !missing.is_empty() {
        dataset.remove_images(|image| missing.contains(&image.key));
    }
    let mut dropped = asked;
    for key in missing {
        if !dropped.contains(&key) {
            dropped.push(key);
        }
    }
    report.dropped_images = dropped;
    report.merge = dataset.merge_into(project.store_mut())?;
    log::info!(
        "imported {} annotation(s), {} new class(es)",
        report.merge.annotations,
        report.merge.new_classes.len()
    );
    project.autosave(prompt);
    Ok(report)
}

/// [`import_annotations`] after forcing the editor's pending buffer through
/// commit-or-discard. `Ok(None)` means the user cancelled.
pub fn import_guarded(
    project: &mut Project,
    editor: &mut Editor,
    prompt: &mut dyn UserPrompt,
    format: ImportFormat,
    path: &Path,
) -> Result<Option<ImportReport>, IapError> {
    if !editor.prepare_external(&mut project.edit_context(prompt))? {
        return Ok(None);
    }
    import_annotations(project, format, path, prompt).map(Some)
}

fn read_incoming(format: ImportFormat, path: &Path) -> Result<Incoming, IapError> {
    match format {
        ImportFormat::Coco => {
            let json = if path.is_dir() {
                path.join(COCO_FILE)
            } else {
                path.to_path_buf()
            };
            if !json.is_file() {
                return Err(IapError::ResourceMissing {
                    what: "COCO annotation file",
                    path: json,
                });
            }
            let dir = json.parent().map(Path::to_path_buf).unwrap_or_default();
            Ok(Incoming {
                dataset: read_coco_json(&json)?,
                search_dirs: vec![dir.clone(), dir.join(IMAGES_DIR)],
                known_paths: BTreeMap::new(),
                unreferenced: Vec::new(),
            })
        }
        ImportFormat::Yolo => {
            let import = read_yolo_dir(path)?;
            Ok(Incoming {
                dataset: import.dataset,
                search_dirs: Vec::new(),
                known_paths: import.image_paths,
                unreferenced: import.orphan_labels,
            })
        }
        ImportFormat::Voc => {
            let root = if path.file_name().is_some_and(|n| n == "Annotations") {
                path.parent().map(Path::to_path_buf).unwrap_or_default()
            } else {
                path.to_path_buf()
            };
            let mut search_dirs = vec![
                root.clone(),
                root.join("JPEGImages"),
                root.join(IMAGES_DIR),
            ];
            if let Some(up) = root.parent() {
                search_dirs.push(up.join(IMAGES_DIR));
            }
            Ok(Incoming {
                dataset: read_voc_dir(path)?,
                search_dirs,
                known_paths: BTreeMap::new(),
                unreferenced: Vec::new(),
            })
        }
    }
}

fn locate(
    image: &Image,
    search_dirs: &[PathBuf],
    known_paths: &BTreeMap<String, PathBuf>,
) -> Option<PathBuf> {
    if let Some(known) = known_paths.get(&image.key).filter(|p| p.is_file()) {
        return Some(known.clone());
    }
    search_dirs
        .iter()
        .flat_map(|dir| [dir.join(&image.file_name), dir.join(&image.key)])
        .find(|candidate| candidate.is_file())
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}
