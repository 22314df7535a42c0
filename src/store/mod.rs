//! The annotation store: slice key -> class name -> ordered annotations.
//!
//! The store owns the [`ClassRegistry`] so that every class-level mutation
//! (rename, delete) rewrites the denormalized fields of every annotation in a
//! single place. After every public operation:
//!
//! - the ordinals of each `(slice, class)` list are exactly `1..=N`,
//! - no slice maps to an empty class map and no class maps to an empty list,
//! - every annotation's `class_id` matches the registry entry for its
//!   `class_name`.

mod annotation;
mod registry;

pub use annotation::{Annotation, Geometry};
pub use registry::{ClassEntry, ClassId, ClassRegistry, Rgb, PALETTE};

use std::collections::BTreeMap;

use crate::error::IapError;
use crate::geometry::union::union;
use crate::geometry::Polygon;

/// Class map of a single slice.
pub type SliceAnnotations = BTreeMap<String, Vec<Annotation>>;

/// Names one annotation within a slice.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationRef {
    pub class_name: String,
    pub number: u32,
}

impl AnnotationRef {
    pub fn new(class_name: impl Into<String>, number: u32) -> Self {
        Self {
            class_name: class_name.into(),
            number,
        }
    }
}

/// Outcome of [`AnnotationStore::union`].
#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    /// Ordinal of the merged annotation after renumbering.
    pub number: u32,
    /// Outer rings discarded by the largest-ring policy.
    pub dropped_rings: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnnotationStore {
    registry: ClassRegistry,
    slices: BTreeMap<String, SliceAnnotations>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Mutable registry access for additions, colors and visibility.
    /// Renames and deletions go through the store.
    pub fn registry_mut(&mut self) -> &mut ClassRegistry {
        &mut self.registry
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn clear(&mut self) {
        self.slices.clear();
    }

    pub fn annotation_count(&self) -> usize {
        self.slices
            .values()
            .flat_map(|classes| classes.values())
            .map(Vec::len)
            .sum()
    }

    /// Appends `annotation` under the next free ordinal and returns it.
    ///
    /// The class must be registered; `class_id` is taken from the registry.
    pub fn put(&mut self, slice: &str, mut annotation: Annotation) -> Result<u32, IapError> {
        annotation.class_id = self.class_id(&annotation.class_name)?;
        check_geometry(&annotation.geometry)?;
        let list = self
            .slices
            .entry(slice.to_string())
            .or_default()
            .entry(annotation.class_name.clone())
            .or_default();
        let number = list.len() as u32 + 1;
        annotation.number = number;
        log::debug!(
            "put {}-{} ({}) on '{}'",
            annotation.class_name,
            number,
            annotation.geometry.kind(),
            slice
        );
        list.push(annotation);
        Ok(number)
    }

    /// Appends a batch of annotations to `slice`, keeping their own ordinals
    /// in relative order.
    ///
    /// Each class list grows after its existing annotations, which keep their
    /// numbers. Within the batch, annotations of one class are ordered by
    /// their provided ordinal; ordinal `0` means "none" and sorts last, ties
    /// keep batch order. Nothing is inserted when any annotation is rejected.
    pub fn insert_numbered(&mut self, slice: &str, batch: Vec<Annotation>) -> Result<usize, IapError> {
        let mut by_class: BTreeMap<String, Vec<Annotation>> = BTreeMap::new();
        for mut annotation in batch {
            annotation.class_id = self.class_id(&annotation.class_name)?;
            check_geometry(&annotation.geometry)?;
            by_class
                .entry(annotation.class_name.clone())
                .or_default()
                .push(annotation);
        }

        let mut inserted = 0;
        for (class, mut incoming) in by_class {
            incoming.sort_by_key(|a| if a.number == 0 { u32::MAX } else { a.number });
            let list = self
                .slices
                .entry(slice.to_string())
                .or_default()
                .entry(class)
                .or_default();
            for mut annotation in incoming {
                annotation.number = list.len() as u32 + 1;
                list.push(annotation);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Removes one annotation and renumbers its class list.
    pub fn remove(&mut self, slice: &str, target: &AnnotationRef) -> Result<Annotation, IapError> {
        let list = self
            .slices
            .get_mut(slice)
            .and_then(|classes| classes.get_mut(&target.class_name))
            .ok_or_else(|| not_found(slice, target))?;
        let pos = list
            .iter()
            .position(|a| a.number == target.number)
            .ok_or_else(|| not_found(slice, target))?;
        let removed = list.remove(pos);
        self.renumber_class(slice, &target.class_name);
        log::debug!("removed {} from '{}'", removed.label(), slice);
        Ok(removed)
    }

    /// Reassigns ordinals `1..=N` for every class list of `slice`, keeping the
    /// current relative order, and drops empty entries.
    pub fn renumber(&mut self, slice: &str) {
        let classes: Vec<String> = match self.slices.get(slice) {
            Some(classes) => classes.keys().cloned().collect(),
            None => return,
        };
        for class in classes {
            self.renumber_class(slice, &class);
        }
    }

    fn renumber_class(&mut self, slice: &str, class: &str) {
        let Some(classes) = self.slices.get_mut(slice) else {
            return;
        };
        if let Some(list) = classes.get_mut(class) {
            list.sort_by_key(|a| a.number);
            for (i, a) in list.iter_mut().enumerate() {
                a.number = i as u32 + 1;
            }
            if list.is_empty() {
                classes.remove(class);
            }
        }
        if classes.is_empty() {
            self.slices.remove(slice);
        }
    }

    /// Replaces a whole `(slice, class)` list, then renumbers it.
    pub fn replace_list(
        &mut self,
        slice: &str,
        class: &str,
        list: Vec<Annotation>,
    ) -> Result<(), IapError> {
        let class_id = self.class_id(class)?;
        let mut list = list;
        for a in &mut list {
            check_geometry(&a.geometry)?;
            a.class_id = class_id;
            a.class_name = class.to_string();
        }
        self.slices
            .entry(slice.to_string())
            .or_default()
            .insert(class.to_string(), list);
        self.renumber_class(slice, class);
        Ok(())
    }

    /// Swaps the geometry of an existing annotation in place.
    pub fn set_geometry(
        &mut self,
        slice: &str,
        target: &AnnotationRef,
        geometry: Geometry,
    ) -> Result<(), IapError> {
        check_geometry(&geometry)?;
        let annotation = self
            .slices
            .get_mut(slice)
            .and_then(|classes| classes.get_mut(&target.class_name))
            .and_then(|list| list.iter_mut().find(|a| a.number == target.number))
            .ok_or_else(|| not_found(slice, target))?;
        annotation.geometry = geometry;
        Ok(())
    }

    /// Renames a class in the registry and in every annotation.
    pub fn rename_class(&mut self, old: &str, new: &str) -> Result<(), IapError> {
        let new = new.trim();
        let id = self.registry.rename(old, new)?;
        if old == new {
            return Ok(());
        }
        for classes in self.slices.values_mut() {
            if let Some(mut list) = classes.remove(old) {
                for a in &mut list {
                    a.class_name = new.to_string();
                    a.class_id = id;
                }
                classes.insert(new.to_string(), list);
            }
        }
        log::info!("renamed class '{}' to '{}'", old, new);
        Ok(())
    }

    /// Deletes a class and every annotation of it; returns how many
    /// annotations were removed.
    pub fn delete_class(&mut self, name: &str) -> Result<usize, IapError> {
        self.registry.remove(name)?;
        let mut removed = 0;
        for classes in self.slices.values_mut() {
            if let Some(list) = classes.remove(name) {
                removed += list.len();
            }
        }
        self.slices.retain(|_, classes| !classes.is_empty());
        self.resync_class_ids();
        log::info!("deleted class '{}' ({} annotation(s))", name, removed);
        Ok(removed)
    }

    fn resync_class_ids(&mut self) {
        for classes in self.slices.values_mut() {
            for (name, list) in classes.iter_mut() {
                if let Some(id) = self.registry.id_of(name) {
                    for a in list {
                        a.class_id = id;
                    }
                }
            }
        }
    }

    pub fn get(&self, slice: &str) -> Option<&SliceAnnotations> {
        self.slices.get(slice)
    }

    pub fn annotations(&self, slice: &str, class: &str) -> &[Annotation] {
        self.slices
            .get(slice)
            .and_then(|classes| classes.get(class))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn annotation(&self, slice: &str, target: &AnnotationRef) -> Option<&Annotation> {
        self.annotations(slice, &target.class_name)
            .iter()
            .find(|a| a.number == target.number)
    }

    /// Slice keys that hold at least one annotation, sorted.
    pub fn all_slices_with_annotations(&self) -> Vec<&str> {
        self.slices.keys().map(String::as_str).collect()
    }

    /// Iterates `(slice, class, annotations)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[Annotation])> {
        self.slices.iter().flat_map(|(slice, classes)| {
            classes
                .iter()
                .map(move |(class, list)| (slice.as_str(), class.as_str(), list.as_slice()))
        })
    }

    /// Merges the selected annotations of one class into a single polygon.
    ///
    /// Nothing is modified when the selection is invalid or disconnected.
    /// Without `keep_originals` the selection is replaced by the union; the
    /// class list is renumbered once afterwards either way.
    pub fn union(
        &mut self,
        slice: &str,
        selected: &[AnnotationRef],
        keep_originals: bool,
    ) -> Result<MergeOutcome, IapError> {
        if selected.len() < 2 {
            return Err(IapError::invalid("select at least two annotations to merge"));
        }
        let class = &selected[0].class_name;
        if selected.iter().any(|r| &r.class_name != class) {
            return Err(IapError::invalid(
                "all merged annotations must share one class",
            ));
        }

        let mut polygons: Vec<Polygon> = Vec::with_capacity(selected.len());
        for target in selected {
            let a = self
                .annotation(slice, target)
                .ok_or_else(|| not_found(slice, target))?;
            polygons.push(a.geometry.to_polygon());
        }

        let outcome = union(&polygons)?;
        if outcome.dropped_rings > 0 {
            log::warn!(
                "merge on '{}' kept the largest ring and dropped {} other(s)",
                slice,
                outcome.dropped_rings
            );
        }

        let class_id = self.class_id(class)?;
        let mut list = self.annotations(slice, class).to_vec();
        if !keep_originals {
            list.retain(|a| !selected.iter().any(|r| r.number == a.number));
        }
        let provisional = list.iter().map(|a| a.number).max().unwrap_or(0) + 1;
        list.push(
            Annotation::new(class_id, class.clone(), Geometry::Polygon(outcome.polygon))
                .with_number(provisional),
        );
        self.replace_list(slice, class, list)?;

        let number = self.annotations(slice, class).len() as u32;
        log::info!(
            "merged {} annotation(s) of '{}' on '{}' into {}-{}",
            selected.len(),
            class,
            slice,
            class,
            number
        );
        Ok(MergeOutcome {
            number,
            dropped_rings: outcome.dropped_rings,
        })
    }

    /// Removes every slice whose key is `base` or starts with `base_`.
    pub fn purge_base(&mut self, base: &str) -> usize {
        let prefix = format!("{base}_");
        let before = self.slices.len();
        self.slices
            .retain(|key, _| key != base && !key.starts_with(&prefix));
        let purged = before - self.slices.len();
        if purged > 0 {
            log::info!("purged {} slice(s) derived from '{}'", purged, base);
        }
        purged
    }

    fn class_id(&self, name: &str) -> Result<ClassId, IapError> {
        self.registry
            .id_of(name)
            .ok_or_else(|| IapError::invalid(format!("unknown class '{name}'")))
    }

    /// Unchecked access for tests that need a corrupt store.
    #[cfg(test)]
    pub(crate) fn raw_list_mut(&mut self, slice: &str, class: &str) -> &mut Vec<Annotation> {
        self.slices
            .entry(slice.to_string())
            .or_default()
            .entry(class.to_string())
            .or_default()
    }
}

fn check_geometry(geometry: &Geometry) -> Result<(), IapError> {
    match geometry {
        Geometry::BBox(b) if !b.is_positive() => Err(IapError::invalid(format!(
            "bounding box must have positive size, got {}x{}",
            b.width, b.height
        ))),
        _ => Ok(()),
    }
}

fn not_found(slice: &str, target: &AnnotationRef) -> IapError {
    IapError::invalid(format!(
        "no annotation {}-{} on '{}'",
        target.class_name, target.number, slice
    ))
}
