//! Interchange representation for import and export.
//!
//! Every annotation format goes through one COCO-shaped [`Dataset`]: exports
//! snapshot the store with [`Dataset::from_store`] and hand the result to a
//! writer, imports parse into a `Dataset` and fold it back with
//! [`Dataset::merge_into`]. Class ids in every written format therefore come
//! from the registry, and geometry is converted in one place.
//!
//! # Example
//!
//! ```
//! use iapkit::ir::{Annotation, Category, Dataset, Image};
//! use iapkit::geometry::BBox;
//! use iapkit::store::Geometry;
//!
//! let dataset = Dataset {
//!     images: vec![Image::new(1u64, "img.png", 640, 480)],
//!     categories: vec![Category::new(1u64, "cell")],
//!     annotations: vec![Annotation::new(
//!         1u64,
//!         1u64,
//!         1u64,
//!         Geometry::BBox(BBox::new(64.0, 48.0, 128.0, 96.0)),
//!     )],
//!     ..Default::default()
//! };
//! assert_eq!(dataset.annotations[0].area(), 128.0 * 96.0);
//! ```

mod ids;
pub mod io_coco_json;
pub mod io_labeled_images;
pub mod io_semantic_labels;
pub mod io_voc_xml;
pub mod io_yolo;
mod model;

pub use ids::{AnnotationId, CategoryId, ImageId};
pub(crate) use model::basename;
pub use model::{Annotation, Category, Dataset, DatasetInfo, Image, MergeSummary};
