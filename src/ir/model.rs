//! COCO-shaped interchange dataset.
//!
//! Every export goes store -> [`Dataset`] -> format, and every import goes
//! format -> [`Dataset`] -> store, so class ids and geometry are decided in
//! exactly one place ([`Dataset::from_store`] and [`Dataset::merge_into`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::{AnnotationId, CategoryId, ImageId};
use crate::error::IapError;
use crate::store::{Annotation as StoreAnnotation, AnnotationStore, Geometry, Rgb};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub info: DatasetInfo,
    pub images: Vec<Image>,
    pub categories: Vec<Category>,
    pub annotations: Vec<Annotation>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    /// Name written to the target format.
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    /// Store slice key this raster stands for. Equal to `file_name` except
    /// for slices of a stack, which export as `<key>.png`.
    pub key: String,
}

impl Image {
    /// An image whose slice key is its file name.
    pub fn new(id: impl Into<ImageId>, file_name: impl Into<String>, width: u32, height: u32) -> Self {
        let file_name = file_name.into();
        Self {
            id: id.into(),
            key: file_name.clone(),
            file_name,
            width,
            height,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        match self.file_name.rfind('.') {
            Some(i) if i > 0 => &self.file_name[..i],
            _ => &self.file_name,
        }
    }
}

/// Last path component of a `/`-separated image name.
pub(crate) fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,
}

impl Category {
    pub fn new(id: impl Into<CategoryId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub image_id: ImageId,
    pub category_id: CategoryId,
    /// Ordinal within `(image, category)` when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    pub geometry: Geometry,
}

impl Annotation {
    pub fn new(
        id: impl Into<AnnotationId>,
        image_id: impl Into<ImageId>,
        category_id: impl Into<CategoryId>,
        geometry: Geometry,
    ) -> Self {
        Self {
            id: id.into(),
            image_id: image_id.into(),
            category_id: category_id.into(),
            number: None,
            geometry,
        }
    }

    pub fn with_number(mut self, number: u32) -> Self {
        self.number = Some(number);
        self
    }

    pub fn area(&self) -> f64 {
        self.geometry.area()
    }
}

/// What [`Dataset::merge_into`] did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeSummary {
    pub annotations: usize,
    /// Categories that were not registered before.
    pub new_classes: Vec<String>,
    /// Annotations skipped because their image or category id is unknown.
    pub skipped: usize,
}

impl Dataset {
    /// Snapshot of `store` for `images`, in image order.
    ///
    /// Categories are the registry with its ids; annotations follow image
    /// order, then registry order, then ordinal. Slices without an entry in
    /// `images` are left out.
    pub fn from_store(store: &AnnotationStore, images: Vec<Image>) -> Self {
        let registry = store.registry();
        let categories = registry
            .iter()
            .map(|(id, entry)| Category {
                id: CategoryId::new(id.as_u32() as u64),
                name: entry.name.clone(),
                color: Some(entry.color),
            })
            .collect();

        let mut annotations = Vec::new();
        for image in &images {
            for (class_id, entry) in registry.iter() {
                for a in store.annotations(&image.key, &entry.name) {
                    let id = annotations.len() as u64 + 1;
                    annotations.push(
                        Annotation::new(id, image.id, class_id.as_u32() as u64, a.geometry.clone())
                            .with_number(a.number),
                    );
                }
            }
        }

        Dataset {
            info: DatasetInfo::default(),
            images,
            categories,
            annotations,
        }
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images.iter().find(|i| i.id == id)
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Category names in id order.
    pub fn category_names(&self) -> Vec<&str> {
        let mut cats: Vec<&Category> = self.categories.iter().collect();
        cats.sort_by_key(|c| c.id);
        cats.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn annotations_of(&self, image: ImageId) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.image_id == image)
    }

    /// Drops every image accepted by `drop` together with its annotations.
    pub fn remove_images(&mut self, mut drop: impl FnMut(&Image) -> bool) -> usize {
        let removed: Vec<ImageId> = self.images.iter().filter(|i| drop(i)).map(|i| i.id).collect();
        self.images.retain(|i| !removed.contains(&i.id));
        let before = self.annotations.len();
        self.annotations.retain(|a| !removed.contains(&a.image_id));
        before - self.annotations.len()
    }

    /// Adds the annotations to `store`, keyed by each image's `key`.
    ///
    /// Categories are matched to the registry by name; unknown names are
    /// registered with the incoming color if any. Provided ordinals are
    /// kept in relative order, others follow in file order, and everything
    /// lands after annotations the store already holds for that slice.
    pub fn merge_into(&self, store: &mut AnnotationStore) -> Result<MergeSummary, IapError> {
        let mut summary = MergeSummary::default();
        let mut categories: Vec<&Category> = self.categories.iter().collect();
        categories.sort_by_key(|c| c.id);
        for cat in categories {
            if store.registry().contains(&cat.name) {
                continue;
            }
            match cat.color {
                Some(color) => store.registry_mut().add_with_color(&cat.name, color)?,
                None => store.registry_mut().add(&cat.name)?,
            };
            log::info!("import registered class '{}'", cat.name);
            summary.new_classes.push(cat.name.clone());
        }

        let mut by_slice: BTreeMap<&str, Vec<StoreAnnotation>> = BTreeMap::new();
        for a in &self.annotations {
            let (Some(image), Some(cat)) = (self.image(a.image_id), self.category(a.category_id)) else {
                log::warn!(
                    "skipping annotation {}: unknown image {} or category {}",
                    a.id,
                    a.image_id,
                    a.category_id
                );
                summary.skipped += 1;
                continue;
            };
            let class_id = store
                .registry()
                .id_of(&cat.name)
                .ok_or_else(|| IapError::invalid(format!("unknown class '{}'", cat.name)))?;
            by_slice.entry(image.key.as_str()).or_default().push(
                StoreAnnotation::new(class_id, cat.name.clone(), a.geometry.clone())
                    .with_number(a.number.unwrap_or(0)),
            );
        }
        for (key, batch) in by_slice {
            summary.annotations += store.insert_numbered(key, batch)?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, Polygon};

    fn store() -> AnnotationStore {
        let mut store = AnnotationStore::new();
        let cell = store.registry_mut().add("cell").unwrap();
        let dot = store.registry_mut().add("dot").unwrap();
        let square = Polygon::new(vec![10.0, 10.0, 90.0, 10.0, 90.0, 90.0, 10.0, 90.0]).unwrap();
        store
            .put("a.png", StoreAnnotation::new(dot, "dot", Geometry::BBox(BBox::new(1.0, 2.0, 3.0, 4.0))))
            .unwrap();
        store
            .put("a.png", StoreAnnotation::new(cell, "cell", Geometry::Polygon(square)))
            .unwrap();
        store
            .put("gone.png", StoreAnnotation::new(cell, "cell", Geometry::BBox(BBox::new(0.0, 0.0, 1.0, 1.0))))
            .unwrap();
        store
    }

    #[test]
    fn from_store_uses_registry_ids_and_order() {
        let ds = Dataset::from_store(&store(), vec![Image::new(1u64, "a.png", 100, 100)]);
        assert_eq!(ds.category_names(), vec!["cell", "dot"]);
        assert_eq!(ds.annotations.len(), 2);
        assert_eq!(ds.annotations[0].category_id, CategoryId(1));
        assert_eq!(ds.annotations[1].category_id, CategoryId(2));
        assert_eq!(ds.annotations[0].area(), 6400.0);
    }

    #[test]
    fn merge_into_empty_store_round_trips() {
        let original = store();
        let ds = Dataset::from_store(
            &original,
            vec![
                Image::new(1u64, "a.png", 100, 100),
                Image::new(2u64, "gone.png", 10, 10),
            ],
        );
        let mut restored = AnnotationStore::new();
        let summary = ds.merge_into(&mut restored).unwrap();
        assert_eq!(summary.annotations, 3);
        assert_eq!(summary.new_classes, vec!["cell", "dot"]);
        assert_eq!(restored, original);
    }

    #[test]
    fn merge_reconciles_classes_by_name() {
        let mut target = AnnotationStore::new();
        target.registry_mut().add("dot").unwrap();
        let ds = Dataset {
            images: vec![Image::new(5u64, "x.png", 10, 10)],
            categories: vec![Category::new(9u64, "dot"), Category::new(1u64, "new")],
            annotations: vec![
                Annotation::new(1u64, 5u64, 9u64, Geometry::BBox(BBox::new(0.0, 0.0, 2.0, 2.0))),
                Annotation::new(2u64, 5u64, 1u64, Geometry::BBox(BBox::new(0.0, 0.0, 2.0, 2.0))),
                Annotation::new(3u64, 6u64, 1u64, Geometry::BBox(BBox::new(0.0, 0.0, 2.0, 2.0))),
            ],
            ..Default::default()
        };
        let summary = ds.merge_into(&mut target).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(target.registry().id_of("dot").unwrap().as_u32(), 1);
        assert_eq!(target.registry().id_of("new").unwrap().as_u32(), 2);
        assert_eq!(target.annotations("x.png", "new")[0].class_id.as_u32(), 2);
    }

    #[test]
    fn merge_keeps_source_ordinals_listed_out_of_order() {
        let ds = Dataset {
            images: vec![Image::new(1u64, "x.png", 100, 100)],
            categories: vec![Category::new(1u64, "cell")],
            annotations: vec![
                Annotation::new(1u64, 1u64, 1u64, Geometry::BBox(BBox::new(50.0, 50.0, 5.0, 5.0)))
                    .with_number(2),
                Annotation::new(2u64, 1u64, 1u64, Geometry::BBox(BBox::new(0.0, 0.0, 5.0, 5.0)))
                    .with_number(1),
            ],
            ..Default::default()
        };
        let mut target = AnnotationStore::new();
        ds.merge_into(&mut target).unwrap();
        let list = target.annotations("x.png", "cell");
        assert_eq!(list[0].number, 1);
        assert_eq!(list[0].geometry, Geometry::BBox(BBox::new(0.0, 0.0, 5.0, 5.0)));
        assert_eq!(list[1].number, 2);
        assert_eq!(list[1].geometry, Geometry::BBox(BBox::new(50.0, 50.0, 5.0, 5.0)));
    }

    #[test]
    fn merge_appends_after_existing_annotations() {
        let mut target = store();
        let existing = target.annotations("a.png", "cell").to_vec();
        let ds = Dataset {
            images: vec![Image::new(1u64, "a.png", 100, 100)],
            categories: vec![Category::new(1u64, "cell")],
            annotations: vec![
                Annotation::new(1u64, 1u64, 1u64, Geometry::BBox(BBox::new(5.0, 5.0, 5.0, 5.0)))
                    .with_number(1),
            ],
            ..Default::default()
        };
        ds.merge_into(&mut target).unwrap();
        let list = target.annotations("a.png", "cell");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], existing[0]);
        assert_eq!(list[1].number, 2);
        assert_eq!(list[1].geometry, Geometry::BBox(BBox::new(5.0, 5.0, 5.0, 5.0)));
    }

    #[test]
    fn remove_images_drops_their_annotations() {
        let mut ds = Dataset::from_store(
            &store(),
            vec![
                Image::new(1u64, "a.png", 100, 100),
                Image::new(2u64, "gone.png", 10, 10),
            ],
        );
        assert_eq!(ds.remove_images(|i| i.file_name == "gone.png"), 1);
        assert_eq!(ds.images.len(), 1);
        assert_eq!(ds.annotations.len(), 2);
    }
}
