//! The open project: annotation store, image descriptors, and their `.iap`
//! form on disk.
//!
//! ```text
//! <dir>/<name>.iap
//! <dir>/images/<original file names...>
//! ```
//!
//! Saving copies every image that is not already under `<dir>/images/` and
//! writes the project document atomically. Loading registers classes and
//! rehydrates annotations before any image is opened, then opens images in
//! document order and reconciles the ones that are gone.

mod autosave;
mod schema;

pub use autosave::{AutoSave, AutoSaveAction};
pub use schema::{AnnotationRecord, ClassRecord, ImageRecord, ProjectFile, ShapeType, SliceRecord};

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::editor::{EditContext, Editor, Effect};
use crate::error::IapError;
use crate::image_source::{ImageDescriptor, ImageSource, Raster};
use crate::progress::ProgressSink;
use crate::prompt::{MissingImagesChoice, UserPrompt};
use crate::store::{AnnotationStore, ClassId, Rgb};

pub const PROJECT_EXTENSION: &str = "iap";
pub const IMAGES_DIR: &str = "images";

/// What happened to the images of a project while it was opened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub annotations: usize,
    /// Missing images found elsewhere and copied into `images/`.
    pub located: Vec<String>,
    /// Missing images dropped together with their annotations.
    pub dropped: Vec<String>,
    /// Images present on disk that could not be opened as stored.
    pub rejected: Vec<String>,
}

#[derive(Debug)]
pub struct Project {
    config: Config,
    source: ImageSource,
    store: AnnotationStore,
    images: Vec<ImageDescriptor>,
    path: Option<PathBuf>,
    notes: String,
    creation_date: Option<String>,
    last_modified: Option<String>,
    autosave: AutoSave,
    load_summary: LoadSummary,
}

impl Project {
    /// An empty, unsaved project.
    pub fn new(config: Config) -> Self {
        Self {
            source: ImageSource::new(config.display.clone()),
            config,
            store: AnnotationStore::new(),
            images: Vec::new(),
            path: None,
            notes: String::new(),
            creation_date: None,
            last_modified: None,
            autosave: AutoSave::new(),
            load_summary: LoadSummary::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AnnotationStore {
        &mut self.store
    }

    pub fn images(&self) -> &[ImageDescriptor] {
        &self.images
    }

    pub fn image(&self, file_name: &str) -> Option<&ImageDescriptor> {
        self.images.iter().find(|d| d.file_name == file_name)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    pub fn creation_date(&self) -> Option<&str> {
        self.creation_date.as_deref()
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    pub fn load_summary(&self) -> &LoadSummary {
        &self.load_summary
    }

    /// Every slice key the images produce under their current assignments,
    /// in image order.
    pub fn slice_keys(&self) -> Vec<String> {
        self.images.iter().flat_map(|d| d.slice_keys()).collect()
    }

    /// The image whose slices include `key`.
    pub fn owner_of(&self, key: &str) -> Option<&ImageDescriptor> {
        self.images
            .iter()
            .find(|d| d.slice_keys().iter().any(|k| k == key))
    }

    /// Rendered raster of one slice.
    pub fn raster(&mut self, key: &str, progress: &mut dyn ProgressSink) -> Result<&Raster, IapError> {
        let index = self
            .images
            .iter()
            .position(|d| d.slice_keys().iter().any(|k| k == key))
            .ok_or_else(|| IapError::invalid(format!("no image produces slice '{key}'")))?;
        self.source.slice(&mut self.images[index], key, progress)
    }

    /// Editing context over this project's store.
    pub fn edit_context<'a>(&'a mut self, prompt: &'a mut dyn UserPrompt) -> EditContext<'a> {
        EditContext::new(&mut self.store, prompt)
    }

    // ---- images ---------------------------------------------------------

    /// Opens `path` and appends it. N-D files ask for a dimension assignment.
    pub fn add_image(&mut self, path: &Path, prompt: &mut dyn UserPrompt) -> Result<&ImageDescriptor, IapError> {
        if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
            if self.image(&name).is_some() {
                return Err(IapError::invalid(format!(
                    "image '{name}' is already part of the project"
                )));
            }
        }
        let descriptor = self.source.open(path, prompt)?;
        log::info!("added image {}", descriptor.file_name);
        self.images.push(descriptor);
        let index = self.images.len() - 1;
        self.autosave(prompt);
        Ok(&self.images[index])
    }

    /// Deletes every annotation of `file_name`'s current slices, then asks
    /// for a new assignment and rebuilds the slice list.
    ///
    /// The purge happens first and is not undone when the user cancels or
    /// the new assignment is invalid. Returns how many slice entries were
    /// purged.
    pub fn redefine_dimensions(&mut self, file_name: &str, prompt: &mut dyn UserPrompt) -> Result<usize, IapError> {
        let index = self
            .images
            .iter()
            .position(|d| d.file_name == file_name)
            .ok_or_else(|| IapError::invalid(format!("no image named '{file_name}'")))?;
        let descriptor = &self.images[index];
        let Some(stack) = &descriptor.stack else {
            return Err(IapError::DimensionAssignmentInvalid {
                file: file_name.to_string(),
                message: "single-frame images have no dimensions to assign".to_string(),
            });
        };
        let shape = stack.shape.clone();
        let purged = self.store.purge_base(&descriptor.purge_base());

        let Some(dims) = prompt.assign_dimensions(file_name, &shape) else {
            self.autosave(prompt);
            return Err(IapError::Cancelled);
        };
        let result = self.source.reassign_dimensions(&mut self.images[index], dims);
        self.autosave(prompt);
        result.map(|_| purged)
    }

    // ---- classes --------------------------------------------------------

    pub fn add_class(&mut self, name: &str, color: Option<Rgb>, prompt: &mut dyn UserPrompt) -> Result<ClassId, IapError> {
        let id = match color {
            Some(color) => self.store.registry_mut().add_with_color(name, color)?,
            None => self.store.registry_mut().add(name)?,
        };
        log::info!("added class '{}' (id {})", name.trim(), id);
        self.autosave(prompt);
        Ok(id)
    }

    pub fn rename_class(&mut self, old: &str, new: &str, prompt: &mut dyn UserPrompt) -> Result<(), IapError> {
        self.store.rename_class(old, new)?;
        self.autosave(prompt);
        Ok(())
    }

    pub fn recolor_class(&mut self, name: &str, color: Rgb, prompt: &mut dyn UserPrompt) -> Result<(), IapError> {
        self.store.registry_mut().recolor(name, color)?;
        self.autosave(prompt);
        Ok(())
    }

    /// Removes the class and all of its annotations.
    pub fn delete_class(&mut self, name: &str, prompt: &mut dyn UserPrompt) -> Result<usize, IapError> {
        let removed = self.store.delete_class(name)?;
        self.autosave(prompt);
        Ok(removed)
    }

    // ---- auto-save ------------------------------------------------------

    /// Auto-saves after an editor action that changed the store.
    pub fn note_effect(&mut self, effect: &Effect, prompt: &mut dyn UserPrompt) {
        if effect.store_changed() {
            self.autosave(prompt);
        }
    }

    /// Saves quietly if auto-save is on. Failures are passed to
    /// [`UserPrompt::notify`] and never abort the triggering action.
    pub fn autosave(&mut self, prompt: &mut dyn UserPrompt) {
        let action = self
            .autosave
            .decide(self.config.project.autosave, self.path.is_some(), prompt);
        let result = match action {
            AutoSaveAction::Skip => return,
            AutoSaveAction::Save => self.save(),
            AutoSaveAction::SaveAs(path) => self.save_as(&path),
        };
        match result {
            Ok(()) => log::debug!("auto-saved project"),
            Err(error) => {
                log::warn!("auto-save failed: {error}");
                prompt.notify(&error);
            }
        }
    }

    // ---- persistence ----------------------------------------------------

    /// Saves after forcing the editor's pending buffer through
    /// commit-or-discard. `Ok(false)` means the user cancelled.
    pub fn save_guarded(&mut self, editor: &mut Editor, prompt: &mut dyn UserPrompt) -> Result<bool, IapError> {
        if !editor.prepare_external(&mut EditContext::new(&mut self.store, prompt))? {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Saves under a new project path; `.iap` is appended when missing.
    pub fn save_as(&mut self, path: &Path) -> Result<(), IapError> {
        let path = if path.extension().is_some_and(|e| e == PROJECT_EXTENSION) {
            path.to_path_buf()
        } else {
            path.with_extension(PROJECT_EXTENSION)
        };
        let previous = self.path.replace(path);
        if let Err(error) = self.save() {
            self.path = previous;
            return Err(error);
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), IapError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| IapError::invalid("project has no file yet; save it under a path first"))?;
        let images_dir = project_dir_of(&path).join(IMAGES_DIR);
        fs::create_dir_all(&images_dir).map_err(|e| persistence_failed(&images_dir, e))?;

        let mut image_paths = BTreeMap::new();
        for descriptor in &mut self.images {
            let target = images_dir.join(&descriptor.file_name);
            if !same_file(&descriptor.path, &target) {
                fs::copy(&descriptor.path, &target).map_err(|e| IapError::PersistenceFailed {
                    path: target.clone(),
                    message: format!("copying {}: {e}", descriptor.path.display()),
                })?;
                log::info!("copied {} into {}", descriptor.path.display(), images_dir.display());
                descriptor.path = target;
            }
            image_paths.insert(
                descriptor.file_name.clone(),
                format!("{IMAGES_DIR}/{}", descriptor.file_name),
            );
        }

        let now = timestamp();
        let creation_date = self.creation_date.get_or_insert_with(|| now.clone()).clone();
        let document = self.to_document(image_paths, creation_date, now.clone());
        write_project_file(&path, &document)?;
        self.last_modified = Some(now);
        log::info!(
            "saved project {} ({} image(s), {} annotation(s))",
            path.display(),
            self.images.len(),
            self.store.annotation_count()
        );
        Ok(())
    }

    /// The document [`Project::save`] would write, without touching disk.
    pub fn to_document(
        &self,
        image_paths: BTreeMap<String, String>,
        creation_date: String,
        last_modified: String,
    ) -> ProjectFile {
        let classes = self
            .store
            .registry()
            .iter()
            .map(|(_, entry)| ClassRecord {
                name: entry.name.clone(),
                color: entry.color,
            })
            .collect();
        let images = self.images.iter().map(|d| self.image_record(d)).collect();
        ProjectFile {
            classes,
            images,
            image_paths,
            creation_date,
            last_modified,
            notes: self.notes.clone(),
        }
    }

    fn image_record(&self, descriptor: &ImageDescriptor) -> ImageRecord {
        let mut record = ImageRecord {
            file_name: descriptor.file_name.clone(),
            width: descriptor.width,
            height: descriptor.height,
            is_multi_slice: false,
            dimensions: None,
            shape: None,
            slices: None,
            annotations: None,
        };
        match &descriptor.stack {
            Some(stack) => {
                record.is_multi_slice = true;
                record.dimensions = Some(stack.dims.clone());
                record.shape = Some(stack.shape.clone());
                record.slices = Some(
                    descriptor
                        .slice_keys()
                        .into_iter()
                        .map(|key| SliceRecord {
                            annotations: self.annotation_records(&key),
                            name: key,
                        })
                        .collect(),
                );
            }
            None => record.annotations = Some(self.annotation_records(&descriptor.file_name)),
        }
        record
    }

    /// Registry order, then ordinal.
    fn annotation_records(&self, key: &str) -> Vec<AnnotationRecord> {
        self.store
            .registry()
            .iter()
            .flat_map(|(_, entry)| self.store.annotations(key, &entry.name))
            .map(AnnotationRecord::from_annotation)
            .collect()
    }

    /// Loads a project file.
    ///
    /// Images that are gone from the project directory are put to the user
    /// through [`UserPrompt::reconcile_missing`]; cancelling aborts the load.
    pub fn open(path: &Path, config: Config, prompt: &mut dyn UserPrompt) -> Result<Self, IapError> {
        let document = read_project_file(path)?;
        let dir = project_dir_of(path).to_path_buf();
        log::info!(
            "opening project {} ({} class(es), {} image(s))",
            path.display(),
            document.classes.len(),
            document.images.len()
        );

        let mut project = Project::new(config);
        project.path = Some(path.to_path_buf());
        project.notes = document.notes.clone();
        project.creation_date = Some(document.creation_date.clone()).filter(|d| !d.is_empty());
        project.last_modified = Some(document.last_modified.clone()).filter(|d| !d.is_empty());

        for class in &document.classes {
            project
                .store
                .registry_mut()
                .add_with_color(&class.name, class.color)?;
        }
        project.load_summary.annotations = project.rehydrate(&document.images)?;

        let mut present: Vec<(usize, ImageRecord, PathBuf)> = Vec::new();
        let mut missing: Vec<(usize, ImageRecord)> = Vec::new();
        for (index, record) in document.images.into_iter().enumerate() {
            match resolve_image_path(&dir, &document.image_paths, &record.file_name) {
                Some(found) => present.push((index, record, found)),
                None => missing.push((index, record)),
            }
        }
        if !missing.is_empty() {
            project.reconcile_missing(&dir, missing, &mut present, prompt)?;
        }
        present.sort_by_key(|(index, _, _)| *index);

        for (_, record, image_path) in present {
            match project.materialize(&record, &image_path) {
                Ok(descriptor) => project.images.push(descriptor),
                Err(error) => {
                    log::warn!("rejected {}: {error}", record.file_name);
                    prompt.notify(&error);
                    project.store.purge_base(&record.purge_base());
                    project.load_summary.rejected.push(record.file_name);
                }
            }
        }
        Ok(project)
    }

    /// Ends the session. Unsaved changes are dropped.
    pub fn close(self) {
        log::info!(
            "closed project {}",
            self.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<unsaved>".to_string())
        );
    }

    fn rehydrate(&mut self, records: &[ImageRecord]) -> Result<usize, IapError> {
        let mut count = 0;
        for record in records {
            for (key, stored) in record.keyed_annotations() {
                let mut batch = Vec::with_capacity(stored.len());
                for entry in stored {
                    let class_id = self.store.registry_mut().ensure(&entry.category_name)?;
                    match entry.to_annotation(class_id) {
                        Some(annotation) => batch.push(annotation),
                        None => log::warn!(
                            "skipping unusable {}-{} on '{}'",
                            entry.category_name,
                            entry.number,
                            key
                        ),
                    }
                }
                match self.store.insert_numbered(key, batch) {
                    Ok(inserted) => count += inserted,
                    Err(error) => log::warn!("skipping annotations on '{key}': {error}"),
                }
            }
        }
        log::debug!("rehydrated {} annotation(s)", count);
        Ok(count)
    }

    fn reconcile_missing(
        &mut self,
        dir: &Path,
        missing: Vec<(usize, ImageRecord)>,
        present: &mut Vec<(usize, ImageRecord, PathBuf)>,
        prompt: &mut dyn UserPrompt,
    ) -> Result<(), IapError> {
        let names: Vec<String> = missing.iter().map(|(_, r)| r.file_name.clone()).collect();
        log::warn!("{} image(s) missing: {}", names.len(), names.join(", "));

        let choice = prompt.reconcile_missing(&names);
        if choice == MissingImagesChoice::Cancel {
            return Err(IapError::Cancelled);
        }
        for (index, record) in missing {
            let located = match choice {
                MissingImagesChoice::Locate => prompt
                    .locate_image(&record.file_name)
                    .filter(|p| p.is_file()),
                _ => None,
            };
            match located {
                Some(found) => {
                    let images_dir = dir.join(IMAGES_DIR);
                    fs::create_dir_all(&images_dir).map_err(|e| persistence_failed(&images_dir, e))?;
                    let target = images_dir.join(&record.file_name);
                    fs::copy(&found, &target).map_err(|e| IapError::PersistenceFailed {
                        path: target.clone(),
                        message: format!("copying {}: {e}", found.display()),
                    })?;
                    log::info!("located {} at {}", record.file_name, found.display());
                    self.load_summary.located.push(record.file_name.clone());
                    present.push((index, record, target));
                }
                None => {
                    let purged = self.store.purge_base(&record.purge_base());
                    log::info!(
                        "dropped missing image {} ({} slice entr(ies))",
                        record.file_name,
                        purged
                    );
                    self.load_summary.dropped.push(record.file_name);
                }
            }
        }
        Ok(())
    }

    /// Opens one stored image with its stored assignment and checks that it
    /// still produces the same slices.
    fn materialize(&self, record: &ImageRecord, path: &Path) -> Result<ImageDescriptor, IapError> {
        let dims = if record.is_multi_slice {
            record.dimensions.clone()
        } else {
            None
        };
        let descriptor = self.source.open_with_dims(path, dims)?;
        let mismatch = |message: String| IapError::DimensionAssignmentInvalid {
            file: record.file_name.clone(),
            message,
        };
        if descriptor.is_multi() != record.is_multi_slice {
            return Err(mismatch(format!(
                "stored as {} but the file is {}",
                if record.is_multi_slice { "multi-slice" } else { "single-frame" },
                if descriptor.is_multi() { "multi-slice" } else { "single-frame" }
            )));
        }
        if let (Some(stored), Some(stack)) = (&record.shape, &descriptor.stack) {
            if stored != &stack.shape {
                return Err(mismatch(format!(
                    "stored shape {stored:?} does not match file shape {:?}",
                    stack.shape
                )));
            }
        }
        Ok(descriptor)
    }
}

/// Reads and parses a `.iap` document.
pub fn read_project_file(path: &Path) -> Result<ProjectFile, IapError> {
    if !path.is_file() {
        return Err(IapError::ResourceMissing {
            what: "project file",
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path).map_err(IapError::Io)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|source| IapError::ProjectJsonParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a project document held in memory.
pub fn from_project_slice(bytes: &[u8]) -> Result<ProjectFile, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Writes `document` to a temporary file next to `path` and renames it into
/// place, so a failed save leaves the previous file intact.
pub fn write_project_file(path: &Path, document: &ProjectFile) -> Result<(), IapError> {
    let dir = project_dir_of(path);
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| persistence_failed(path, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, document).map_err(|source| {
            IapError::ProjectJsonWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.flush().map_err(|e| persistence_failed(path, e))?;
    }
    temp.persist(path)
        .map_err(|e| persistence_failed(path, e.error))?;
    Ok(())
}

fn resolve_image_path(dir: &Path, image_paths: &BTreeMap<String, String>, file_name: &str) -> Option<PathBuf> {
    let canonical = dir.join(IMAGES_DIR).join(file_name);
    let recorded = image_paths.get(file_name).map(|p| {
        let p = PathBuf::from(p);
        if p.is_absolute() {
            p
        } else {
            dir.join(p)
        }
    });
    recorded
        .into_iter()
        .chain(std::iter::once(canonical))
        .find(|p| p.is_file())
}

fn project_dir_of(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn persistence_failed(path: &Path, error: std::io::Error) -> IapError {
    IapError::PersistenceFailed {
        path: path.to_path_buf(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, Polygon};
    use crate::prompt::FixedAnswers;
    use crate::store::{Annotation, Geometry};
    use image::{GrayImage, Luma};

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.project.autosave = false;
        config
    }

    fn png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        GrayImage::from_pixel(w, h, Luma([90])).save(&path).expect("save png");
        path
    }

    #[test]
    fn minimal_document_parses_with_defaults() {
        let json = br#"{
            "classes": [{"name": "cell", "color": [255, 0, 0]}],
            "images": [{"file_name": "img.png", "width": 4, "height": 4,
                        "annotations": [{"category_id": 1, "category_name": "cell",
                                         "number": 1, "type": "bbox",
                                         "bbox": [0, 0, 2, 2], "area": 4}]}]
        }"#;
        let document = from_project_slice(json).unwrap();
        assert!(document.notes.is_empty());
        assert!(document.image_paths.is_empty());
        assert!(!document.images[0].is_multi_slice);
        let records = document.images[0].keyed_annotations();
        assert_eq!(records[0].0, "img.png");
        assert_eq!(records[0].1[0].shape_type, ShapeType::BBox);
        assert!(from_project_slice(b"{\"classes\": 3}").is_err());
    }

    #[test]
    fn duplicate_image_names_are_rejected() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let src = png(temp.path(), "img.png", 8, 8);
        let mut prompt = FixedAnswers::new();
        let mut project = Project::new(quiet_config());
        project.add_image(&src, &mut prompt).unwrap();
        let err = project.add_image(&src, &mut prompt).unwrap_err();
        assert!(matches!(err, IapError::UserInputInvalid { .. }));
        assert_eq!(project.images().len(), 1);
    }

    #[test]
    fn save_copies_images_and_writes_document() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let outside = tempfile::tempdir().expect("create temp dir");
        let src = png(outside.path(), "img.png", 100, 100);
        let mut prompt = FixedAnswers::new();
        let mut project = Project::new(quiet_config());
        project.add_image(&src, &mut prompt).unwrap();
        let cell = project.add_class("cell", None, &mut prompt).unwrap();
        let square = Polygon::new(vec![10.0, 10.0, 90.0, 10.0, 90.0, 90.0, 10.0, 90.0]).unwrap();
        project
            .store_mut()
            .put("img.png", Annotation::new(cell, "cell", Geometry::Polygon(square)))
            .unwrap();
        project.set_notes("first pass");

        let file = temp.path().join("p");
        project.save_as(&file).unwrap();
        let file = temp.path().join("p.iap");
        assert_eq!(project.path(), Some(file.as_path()));
        assert!(temp.path().join("images/img.png").is_file());
        assert_eq!(project.images()[0].path, temp.path().join("images/img.png"));

        let document = read_project_file(&file).unwrap();
        assert_eq!(document.classes[0].name, "cell");
        assert_eq!(document.image_paths["img.png"], "images/img.png");
        assert_eq!(document.notes, "first pass");
        assert!(!document.creation_date.is_empty());
        let records = document.images[0].annotations.as_ref().unwrap();
        assert_eq!(records[0].bbox, [10.0, 10.0, 80.0, 80.0]);
    }

    #[test]
    fn autosave_asks_once_and_saves_after_class_changes() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let mut prompt = FixedAnswers::new();
        let mut project = Project::new(Config::default());

        project.add_class("cell", None, &mut prompt).unwrap();
        assert!(project.path().is_none());

        prompt.project_path = Some(temp.path().join("auto.iap"));
        project.add_class("dot", None, &mut prompt).unwrap();
        assert!(project.path().is_none(), "declined once means off for the session");

        let mut project = Project::new(Config::default());
        project.add_class("cell", Some(Rgb(1, 2, 3)), &mut prompt).unwrap();
        assert!(temp.path().join("auto.iap").is_file());
        project.rename_class("cell", "nucleus", &mut prompt).unwrap();
        let document = read_project_file(&temp.path().join("auto.iap")).unwrap();
        assert_eq!(document.classes[0].name, "nucleus");
        assert_eq!(document.classes[0].color, Rgb(1, 2, 3));
        project.recolor_class("nucleus", Rgb(9, 9, 9), &mut prompt).unwrap();
        let document = read_project_file(&temp.path().join("auto.iap")).unwrap();
        assert_eq!(document.classes[0].color, Rgb(9, 9, 9));
    }

    #[test]
    fn redefine_dimensions_rejects_single_frames() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let src = png(temp.path(), "img.png", 8, 8);
        let mut prompt = FixedAnswers::new();
        let mut project = Project::new(quiet_config());
        project.add_image(&src, &mut prompt).unwrap();
        let err = project.redefine_dimensions("img.png", &mut prompt).unwrap_err();
        assert!(matches!(err, IapError::DimensionAssignmentInvalid { .. }));
    }

    #[test]
    fn stored_ordinals_survive_load_in_any_file_order() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let images = temp.path().join(IMAGES_DIR);
        fs::create_dir_all(&images).expect("create images dir");
        png(&images, "img.png", 100, 100);
        let record = |x: f64, number: u32| {
            AnnotationRecord::from_annotation(
                &Annotation::new(ClassId::new(1), "cell", Geometry::BBox(BBox::new(x, x, 5.0, 5.0)))
                    .with_number(number),
            )
        };
        let document = ProjectFile {
            classes: vec![ClassRecord {
                name: "cell".into(),
                color: Rgb(0, 0, 0),
            }],
            images: vec![ImageRecord {
                file_name: "img.png".into(),
                width: 100,
                height: 100,
                is_multi_slice: false,
                dimensions: None,
                shape: None,
                slices: None,
                annotations: Some(vec![record(50.0, 2), record(0.0, 1)]),
            }],
            ..Default::default()
        };
        let file = temp.path().join("p.iap");
        write_project_file(&file, &document).unwrap();

        let project = Project::open(&file, quiet_config(), &mut FixedAnswers::new()).unwrap();
        let list = project.store().annotations("img.png", "cell");
        assert_eq!(list[0].number, 1);
        assert_eq!(list[0].bbox().x, 0.0);
        assert_eq!(list[1].number, 2);
        assert_eq!(list[1].bbox().x, 50.0);
    }

    #[test]
    fn unusable_records_are_skipped_on_load() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let images = temp.path().join(IMAGES_DIR);
        fs::create_dir_all(&images).expect("create images dir");
        png(&images, "img.png", 10, 10);
        let document = ProjectFile {
            classes: vec![ClassRecord {
                name: "cell".into(),
                color: Rgb(0, 0, 0),
            }],
            images: vec![ImageRecord {
                file_name: "img.png".into(),
                width: 10,
                height: 10,
                is_multi_slice: false,
                dimensions: None,
                shape: None,
                slices: None,
                annotations: Some(vec![
                    AnnotationRecord::from_annotation(
                        &Annotation::new(
                            ClassId::new(1),
                            "cell",
                            Geometry::BBox(BBox::new(1.0, 1.0, 0.0, 3.0)),
                        )
                        .with_number(1),
                    ),
                    AnnotationRecord::from_annotation(
                        &Annotation::new(
                            ClassId::new(7),
                            "debris",
                            Geometry::BBox(BBox::new(1.0, 1.0, 2.0, 3.0)),
                        )
                        .with_number(4),
                    ),
                ]),
            }],
            ..Default::default()
        };
        let file = temp.path().join("p.iap");
        write_project_file(&file, &document).unwrap();

        let project = Project::open(&file, quiet_config(), &mut FixedAnswers::new()).unwrap();
        assert_eq!(project.load_summary().annotations, 1);
        let kept = &project.store().annotations("img.png", "debris")[0];
        assert_eq!(kept.number, 1);
        assert_eq!(kept.class_id, ClassId::new(2));
    }
}
