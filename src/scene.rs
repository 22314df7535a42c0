//! Draw lists for a renderer.
//!
//! [`emit_scene`] reads the store and the editor and produces an ordered list
//! of [`DrawCommand`]s for one frame. Nothing here rasterizes anything; the
//! consumer owns pixmaps, fonts and blending.

use image::GrayImage;

use crate::editor::{Editor, Pending};
use crate::geometry::{centroid, BBox, Pixel, Point, Polygon};
use crate::store::{AnnotationRef, AnnotationStore, Geometry, Rgb};

/// Fill opacity of committed annotations.
pub const FILL_ALPHA: f64 = 0.3;
/// Fill opacity of selected annotations.
pub const SELECTED_ALPHA: f64 = 0.6;
/// Opacity of the paint and eraser mask overlays.
pub const MASK_ALPHA: f64 = 0.5;

const PREVIEW_COLOR: Rgb = Rgb(255, 255, 0);
const POSITIVE_COLOR: Rgb = Rgb(0, 255, 0);
const NEGATIVE_COLOR: Rgb = Rgb(255, 0, 0);
const ERASER_COLOR: Rgb = Rgb(255, 255, 255);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    Polygon,
    BBox,
}

/// One drawing instruction. Coordinates are image space unless noted; the
/// renderer applies the `Image` command's offset and zoom to everything.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    /// The slice raster; always first.
    Image {
        slice: String,
        width: u32,
        height: u32,
        offset: Point,
        zoom: f64,
    },
    Annotation {
        kind: ShapeKind,
        geometry: Geometry,
        border_color: Rgb,
        fill_color: Rgb,
        alpha: f64,
        label_text: String,
        /// Vertex mean; `None` when there is nowhere to put a label.
        label_anchor: Option<Point>,
        selected: bool,
    },
    /// Polygon under construction plus the rubber band to the cursor.
    Polyline {
        points: Vec<Point>,
        rubber_band: Option<Point>,
        color: Rgb,
    },
    Rect {
        bbox: BBox<Pixel>,
        color: Rgb,
    },
    PromptBox {
        bbox: BBox<Pixel>,
    },
    PromptPoints {
        positive: Vec<Point>,
        negative: Vec<Point>,
        positive_color: Rgb,
        negative_color: Rgb,
    },
    Preview {
        polygon: Polygon,
        score: f64,
        color: Rgb,
    },
    MaskOverlay {
        mask: GrayImage,
        color: Rgb,
        alpha: f64,
    },
    /// Vertex grab handles of the polygon being edited.
    Handles {
        points: Vec<Point>,
        radius: f64,
    },
    /// Brush or eraser footprint at the cursor.
    Cursor {
        center: Point,
        radius: f64,
    },
}

/// An ordered frame description.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub commands: Vec<DrawCommand>,
}

impl Scene {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn annotations(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Annotation { .. }))
    }
}

/// Builds the frame for the editor's current slice. Without an open slice the
/// scene is empty.
pub fn emit_scene(store: &AnnotationStore, editor: &Editor) -> Scene {
    let mut commands = Vec::new();
    let Some(slice) = editor.slice() else {
        return Scene { commands };
    };
    let (width, height) = editor.image_size();
    let viewport = editor.viewport();
    commands.push(DrawCommand::Image {
        slice: slice.to_string(),
        width,
        height,
        offset: viewport.offset(),
        zoom: viewport.zoom(),
    });

    let registry = store.registry();
    for (_, entry) in registry.iter() {
        if !registry.is_visible(&entry.name) {
            continue;
        }
        for annotation in store.annotations(slice, &entry.name) {
            let selected = editor
                .selection()
                .contains(&AnnotationRef::new(entry.name.clone(), annotation.number));
            commands.push(annotation_command(
                &annotation.geometry,
                entry.color,
                annotation.label(),
                selected,
            ));
        }
    }

    overlays(editor, &mut commands);
    Scene { commands }
}

fn annotation_command(geometry: &Geometry, color: Rgb, label_text: String, selected: bool) -> DrawCommand {
    let (kind, label_anchor) = match geometry {
        Geometry::Polygon(p) => (ShapeKind::Polygon, centroid(&p.points())),
        Geometry::BBox(b) => (ShapeKind::BBox, centroid(&b.corners())),
    };
    DrawCommand::Annotation {
        kind,
        geometry: geometry.clone(),
        border_color: color,
        fill_color: color,
        alpha: if selected { SELECTED_ALPHA } else { FILL_ALPHA },
        label_text,
        label_anchor,
        selected,
    }
}

fn overlays(editor: &Editor, commands: &mut Vec<DrawCommand>) {
    match editor.pending() {
        Pending::None => {}
        Pending::Polygon(points) => commands.push(DrawCommand::Polyline {
            points: points.clone(),
            rubber_band: editor.cursor(),
            color: PREVIEW_COLOR,
        }),
        Pending::Rect { .. } => {
            if let Some(bbox) = editor.pending().rect() {
                commands.push(DrawCommand::Rect {
                    bbox,
                    color: PREVIEW_COLOR,
                });
            }
        }
        Pending::Paint(mask) => commands.push(DrawCommand::MaskOverlay {
            mask: mask.clone(),
            color: PREVIEW_COLOR,
            alpha: MASK_ALPHA,
        }),
        Pending::Erase(mask) => commands.push(DrawCommand::MaskOverlay {
            mask: mask.clone(),
            color: ERASER_COLOR,
            alpha: MASK_ALPHA,
        }),
        Pending::SamPreview(prediction) => commands.push(DrawCommand::Preview {
            polygon: prediction.polygon.clone(),
            score: prediction.score,
            color: PREVIEW_COLOR,
        }),
    }

    if let Some(bbox) = editor.sam_box() {
        commands.push(DrawCommand::PromptBox { bbox });
    }
    let (positive, negative) = editor.sam_points();
    if !positive.is_empty() || !negative.is_empty() {
        commands.push(DrawCommand::PromptPoints {
            positive: positive.to_vec(),
            negative: negative.to_vec(),
            positive_color: POSITIVE_COLOR,
            negative_color: NEGATIVE_COLOR,
        });
    }

    if let Some(edit) = editor.editing() {
        commands.push(DrawCommand::Handles {
            points: edit.polygon.points(),
            radius: editor.config().vertex_hit_radius / editor.viewport().zoom(),
        });
    }

    if let (Some(radius), Some(center)) = (editor.stroke_radius(), editor.cursor()) {
        commands.push(DrawCommand::Cursor {
            center,
            radius: radius as f64,
        });
    }
}
