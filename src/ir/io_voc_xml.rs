//! Pascal VOC XML reader and writer.
//!
//! The layout is an `Annotations/` directory with one XML file per image,
//! named after the image stem. The writer has two flavors: plain boxes, and
//! boxes plus a `<segmentation><polygon>` child listing integer vertices as
//! `<pt1><x/><y/></pt1>`, `<pt2>`... The reader accepts both.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::Node;
use walkdir::WalkDir;

use super::model::{basename, Annotation, Category, Dataset, DatasetInfo, Image};
use super::{AnnotationId, CategoryId, ImageId};
use crate::error::IapError;
use crate::geometry::{BBox, Pixel, Polygon};
use crate::store::Geometry;

const VOC_XML_EXTENSION: &str = "xml";

/// Which VOC flavor [`write_voc_dir`] produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VocFlavor {
    /// `<bndbox>` only; polygons are reduced to their bounding box.
    BBox,
    /// `<bndbox>` plus `<segmentation>` for polygon annotations.
    Segmentation,
}

/// Read a Pascal VOC dataset directory.
///
/// `path` may be the dataset root containing `Annotations/`, or the
/// `Annotations/` directory itself. Categories are numbered in sorted name
/// order and images in sorted file name order.
pub fn read_voc_dir(path: &Path) -> Result<Dataset, IapError> {
    let layout = discover_layout(path)?;
    let mut xml_files = collect_xml_files(&layout.annotations_dir)?;
    xml_files.sort_by_cached_key(|xml_path| rel_string(&layout.annotations_dir, xml_path));

    let mut parsed_files = Vec::with_capacity(xml_files.len());
    for xml_path in xml_files {
        let parsed = parse_voc_xml(&xml_path)?;
        parsed_files.push((xml_path, parsed));
    }

    let mut image_defs: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    let mut category_names = BTreeSet::new();

    for (xml_path, parsed) in &parsed_files {
        if image_defs.contains_key(&parsed.filename) {
            return Err(IapError::VocXmlParse {
                path: xml_path.clone(),
                message: format!(
                    "duplicate <filename> '{}' found in multiple XML files",
                    parsed.filename
                ),
            });
        }
        image_defs.insert(parsed.filename.clone(), (parsed.width, parsed.height));
        for object in &parsed.objects {
            category_names.insert(object.name.clone());
        }
    }

    let categories: Vec<Category> = category_names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| Category::new((idx + 1) as u64, name))
        .collect();
    let category_id_by_name: BTreeMap<&str, CategoryId> = categories
        .iter()
        .map(|category| (category.name.as_str(), category.id))
        .collect();

    let images: Vec<Image> = image_defs
        .into_iter()
        .enumerate()
        .map(|(idx, (file_name, (width, height)))| {
            let key = basename(&file_name).to_string();
            Image::new((idx + 1) as u64, file_name, width, height).with_key(key)
        })
        .collect();
    let image_id_by_name: BTreeMap<&str, ImageId> = images
        .iter()
        .map(|image| (image.file_name.as_str(), image.id))
        .collect();

    let mut annotations = Vec::new();
    let mut next_annotation_id: u64 = 1;

    for (xml_path, parsed) in &parsed_files {
        let image_id = image_id_by_name
            .get(parsed.filename.as_str())
            .copied()
            .ok_or_else(|| IapError::VocXmlParse {
                path: xml_path.clone(),
                message: format!("image '{}' missing from lookup", parsed.filename),
            })?;

        for object in &parsed.objects {
            let category_id = category_id_by_name
                .get(object.name.as_str())
                .copied()
                .ok_or_else(|| IapError::VocXmlParse {
                    path: xml_path.clone(),
                    message: format!("category '{}' missing from lookup", object.name),
                })?;

            let geometry = match &object.polygon {
                Some(polygon) => Geometry::Polygon(polygon.clone()),
                None => Geometry::BBox(object.bbox),
            };
            annotations.push(Annotation::new(
                AnnotationId::new(next_annotation_id),
                image_id,
                category_id,
                geometry,
            ));
            next_annotation_id += 1;
        }
    }

    Ok(Dataset {
        info: DatasetInfo::default(),
        images,
        categories,
        annotations,
    })
}

/// Write `dataset` as `Annotations/<stem>.xml` files under `path`.
pub fn write_voc_dir(path: &Path, dataset: &Dataset, flavor: VocFlavor) -> Result<(), IapError> {
    let annotations_dir = path.join("Annotations");
    fs::create_dir_all(&annotations_dir).map_err(IapError::Io)?;

    let image_by_id: BTreeMap<ImageId, &Image> =
        dataset.images.iter().map(|img| (img.id, img)).collect();
    let category_name_by_id: BTreeMap<CategoryId, &str> = dataset
        .categories
        .iter()
        .map(|category| (category.id, category.name.as_str()))
        .collect();

    let mut annotations_by_image: BTreeMap<ImageId, Vec<&Annotation>> = BTreeMap::new();
    for annotation in &dataset.annotations {
        if !image_by_id.contains_key(&annotation.image_id) {
            return Err(IapError::ExportFailed {
                slice: annotation.image_id.to_string(),
                message: format!(
                    "annotation {} references missing image {}",
                    annotation.id, annotation.image_id
                ),
            });
        }
        annotations_by_image
            .entry(annotation.image_id)
            .or_default()
            .push(annotation);
    }

    let mut images_sorted: Vec<&Image> = dataset.images.iter().collect();
    images_sorted.sort_by(|left, right| left.file_name.cmp(&right.file_name));

    for image in images_sorted {
        let xml_path = annotations_dir.join(format!("{}.{VOC_XML_EXTENSION}", image.stem()));
        if let Some(parent) = xml_path.parent() {
            fs::create_dir_all(parent).map_err(IapError::Io)?;
        }

        let mut image_annotations = annotations_by_image.remove(&image.id).unwrap_or_default();
        image_annotations.sort_by_key(|annotation| annotation.id);

        let xml = render_voc_xml(image, &image_annotations, &category_name_by_id, flavor)?;
        fs::write(&xml_path, xml).map_err(IapError::Io)?;
    }

    log::info!(
        "wrote {} VOC annotation file(s) to {}",
        dataset.images.len(),
        annotations_dir.display()
    );
    Ok(())
}

/// Parse one VOC XML document held in memory.
pub fn from_voc_xml_str(xml: &str) -> Result<(), IapError> {
    parse_voc_xml_str(xml, Path::new("<memory>"))?;
    Ok(())
}

/// Parse VOC XML from bytes, which must be UTF-8.
pub fn from_voc_xml_slice(bytes: &[u8]) -> Result<(), IapError> {
    let xml = std::str::from_utf8(bytes).map_err(|source| IapError::VocXmlParse {
        path: PathBuf::from("<memory>"),
        message: format!("input is not valid UTF-8: {source}"),
    })?;
    from_voc_xml_str(xml)
}

#[derive(Clone, Debug)]
struct VocLayout {
    #[cfg_attr(not(test), allow(dead_code))]
    root: PathBuf,
    annotations_dir: PathBuf,
}

#[derive(Debug)]
struct ParsedVocAnnotation {
    filename: String,
    width: u32,
    height: u32,
    objects: Vec<ParsedVocObject>,
}

#[derive(Debug)]
struct ParsedVocObject {
    name: String,
    bbox: BBox<Pixel>,
    polygon: Option<Polygon>,
}

fn discover_layout(input: &Path) -> Result<VocLayout, IapError> {
    if !input.is_dir() {
        return Err(IapError::VocLayoutInvalid {
            path: input.to_path_buf(),
            message: "input must be a directory".to_string(),
        });
    }

    let (root, annotations_dir) = if input.join("Annotations").is_dir() {
        (input.to_path_buf(), input.join("Annotations"))
    } else if is_dir_named(input, "Annotations") {
        let root = input
            .parent()
            .ok_or_else(|| IapError::VocLayoutInvalid {
                path: input.to_path_buf(),
                message: "Annotations directory has no parent directory".to_string(),
            })?
            .to_path_buf();
        (root, input.to_path_buf())
    } else {
        return Err(IapError::VocLayoutInvalid {
            path: input.to_path_buf(),
            message: "expected a VOC dataset root containing Annotations/ or an Annotations/ directory itself"
                .to_string(),
        });
    };

    Ok(VocLayout {
        root,
        annotations_dir,
    })
}

fn collect_xml_files(dir: &Path) -> Result<Vec<PathBuf>, IapError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(IapError::Io)? {
        let entry = entry.map_err(IapError::Io)?;
        let path = entry.path();
        if path.is_file() && has_xml_extension(&path) {
            files.push(path);
        }
    }

    let mut nested_xml = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).min_depth(2) {
        let entry = entry.map_err(|source| IapError::VocLayoutInvalid {
            path: dir.to_path_buf(),
            message: format!("failed while traversing annotations directory: {source}"),
        })?;
        if entry.file_type().is_file() && has_xml_extension(entry.path()) {
            nested_xml.push(entry.path().to_path_buf());
        }
    }
    if !nested_xml.is_empty() {
        nested_xml.sort_by_cached_key(|path| rel_string(dir, path));
        log::warn!(
            "VOC reader scans Annotations/ flat; skipping {} nested .xml file(s), e.g. {}",
            nested_xml.len(),
            rel_string(dir, &nested_xml[0])
        );
    }

    Ok(files)
}

fn parse_voc_xml(path: &Path) -> Result<ParsedVocAnnotation, IapError> {
    let xml = fs::read_to_string(path).map_err(IapError::Io)?;
    parse_voc_xml_str(&xml, path)
}

fn parse_voc_xml_str(xml: &str, path: &Path) -> Result<ParsedVocAnnotation, IapError> {
    let document = roxmltree::Document::parse(xml).map_err(|source| IapError::VocXmlParse {
        path: path.to_path_buf(),
        message: source.to_string(),
    })?;

    let annotation = document.root_element();
    if annotation.tag_name().name() != "annotation" {
        return Err(IapError::VocXmlParse {
            path: path.to_path_buf(),
            message: "missing <annotation> root element".to_string(),
        });
    }

    let filename = required_child_text(annotation, "filename", path, "<annotation>")?;
    let size = required_child_element(annotation, "size", path, "<annotation>")?;
    let width = parse_required_u32(size, "width", path, "<size>")?;
    let height = parse_required_u32(size, "height", path, "<size>")?;

    let mut objects = Vec::new();
    for object in annotation
        .children()
        .filter(|node| node.is_element() && node.tag_name().name() == "object")
    {
        let name = required_child_text(object, "name", path, "<object>")?;
        let bndbox = required_child_element(object, "bndbox", path, "<object>")?;

        let xmin = parse_required_f64(bndbox, "xmin", path, "<bndbox>")?;
        let ymin = parse_required_f64(bndbox, "ymin", path, "<bndbox>")?;
        let xmax = parse_required_f64(bndbox, "xmax", path, "<bndbox>")?;
        let ymax = parse_required_f64(bndbox, "ymax", path, "<bndbox>")?;

        let polygon = match child_element(object, "segmentation")
            .and_then(|seg| child_element(seg, "polygon"))
        {
            Some(polygon) => Some(parse_polygon(polygon, path)?),
            None => None,
        };

        objects.push(ParsedVocObject {
            name,
            bbox: BBox::new(xmin, ymin, xmax - xmin, ymax - ymin),
            polygon,
        });
    }

    Ok(ParsedVocAnnotation {
        filename,
        width,
        height,
        objects,
    })
}

/// Reads `<pt1>`, `<pt2>`... in numeric order.
fn parse_polygon(node: Node<'_, '_>, path: &Path) -> Result<Polygon, IapError> {
    let mut points: Vec<(u32, f64, f64)> = Vec::new();
    for pt in node.children().filter(|child| child.is_element()) {
        let tag = pt.tag_name().name();
        let Some(index) = tag.strip_prefix("pt").and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        let x = parse_required_f64(pt, "x", path, tag)?;
        let y = parse_required_f64(pt, "y", path, tag)?;
        points.push((index, x, y));
    }
    points.sort_by_key(|(index, _, _)| *index);

    let coords = points.into_iter().flat_map(|(_, x, y)| [x, y]).collect();
    Polygon::new(coords).map_err(|e| IapError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("invalid <segmentation> polygon: {e}"),
    })
}

fn required_child_element<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<Node<'a, 'input>, IapError> {
    child_element(node, tag).ok_or_else(|| IapError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn required_child_text(node: Node<'_, '_>, tag: &str, path: &Path, context: &str) -> Result<String, IapError> {
    optional_child_text(node, tag).ok_or_else(|| IapError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn parse_required_u32(node: Node<'_, '_>, tag: &str, path: &Path, context: &str) -> Result<u32, IapError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<u32>().map_err(|_| IapError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("invalid <{tag}> value '{raw}' in {context}; expected u32"),
    })
}

fn parse_required_f64(node: Node<'_, '_>, tag: &str, path: &Path, context: &str) -> Result<f64, IapError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<f64>().map_err(|_| IapError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("invalid <{tag}> value '{raw}' in {context}; expected floating-point number"),
    })
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == tag)
}

fn optional_child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child_element(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

fn render_voc_xml(
    image: &Image,
    annotations: &[&Annotation],
    category_name_by_id: &BTreeMap<CategoryId, &str>,
    flavor: VocFlavor,
) -> Result<String, IapError> {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str("<annotation>\n");
    xml.push_str("  <folder>images</folder>\n");
    xml.push_str(&format!("  <filename>{}</filename>\n", xml_escape(&image.file_name)));
    xml.push_str("  <size>\n");
    xml.push_str(&format!("    <width>{}</width>\n", image.width));
    xml.push_str(&format!("    <height>{}</height>\n", image.height));
    xml.push_str("    <depth>3</depth>\n");
    xml.push_str("  </size>\n");
    xml.push_str("  <segmented>");
    xml.push_str(if flavor == VocFlavor::Segmentation { "1" } else { "0" });
    xml.push_str("</segmented>\n");

    for annotation in annotations {
        let category_name = category_name_by_id
            .get(&annotation.category_id)
            .ok_or_else(|| IapError::ExportFailed {
                slice: image.key.clone(),
                message: format!(
                    "annotation {} references missing category {}",
                    annotation.id, annotation.category_id
                ),
            })?;

        let bbox = annotation.geometry.bbox().rounded();
        xml.push_str("  <object>\n");
        xml.push_str(&format!("    <name>{}</name>\n", xml_escape(category_name)));
        xml.push_str("    <pose>Unspecified</pose>\n");
        xml.push_str("    <truncated>0</truncated>\n");
        xml.push_str("    <difficult>0</difficult>\n");
        xml.push_str("    <bndbox>\n");
        xml.push_str(&format!("      <xmin>{}</xmin>\n", bbox.x));
        xml.push_str(&format!("      <ymin>{}</ymin>\n", bbox.y));
        xml.push_str(&format!("      <xmax>{}</xmax>\n", bbox.xmax()));
        xml.push_str(&format!("      <ymax>{}</ymax>\n", bbox.ymax()));
        xml.push_str("    </bndbox>\n");

        if let (VocFlavor::Segmentation, Geometry::Polygon(polygon)) = (flavor, &annotation.geometry) {
            xml.push_str("    <segmentation>\n      <polygon>\n");
            for (i, point) in polygon.rounded().points().iter().enumerate() {
                xml.push_str(&format!(
                    "        <pt{n}><x>{}</x><y>{}</y></pt{n}>\n",
                    point.x,
                    point.y,
                    n = i + 1
                ));
            }
            xml.push_str("      </polygon>\n    </segmentation>\n");
        }
        xml.push_str("  </object>\n");
    }

    xml.push_str("</annotation>\n");
    Ok(xml)
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn has_xml_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(VOC_XML_EXTENSION))
        .unwrap_or(false)
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
