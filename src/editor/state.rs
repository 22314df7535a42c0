use image::GrayImage;

use crate::geometry::{BBox, Pixel, Point, Polygon};
use crate::predictor::Prediction;
use crate::store::AnnotationRef;

/// The drawing tool selected by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    Polygon,
    Rectangle,
    Brush,
    Eraser,
    SamBox,
    SamPoints,
}

/// Observable state of the editor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Idle,
    PolygonBuilding,
    RectangleDragging,
    PaintBrush,
    Eraser,
    SamBboxDrawing,
    SamPointSeeding,
    EditingPolygon,
    AwaitingPredictionCommit,
}

/// The single uncommitted artifact. At most one exists at a time.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Pending {
    #[default]
    None,
    /// Vertices placed so far, image space.
    Polygon(Vec<Point>),
    Rect { start: Point, end: Point },
    Paint(GrayImage),
    Erase(GrayImage),
    SamPreview(Prediction),
}

impl Pending {
    pub fn is_none(&self) -> bool {
        matches!(self, Pending::None)
    }

    /// Name shown when asking to commit or discard.
    pub fn kind(&self) -> &'static str {
        match self {
            Pending::None => "nothing",
            Pending::Polygon(_) => "polygon",
            Pending::Rect { .. } => "rectangle",
            Pending::Paint(_) => "paint mask",
            Pending::Erase(_) => "eraser mask",
            Pending::SamPreview(_) => "prediction",
        }
    }

    pub fn rect(&self) -> Option<BBox<Pixel>> {
        match self {
            Pending::Rect { start, end } => Some(BBox::from_corners(*start, *end)),
            _ => None,
        }
    }
}

/// The polygon being edited in place.
#[derive(Clone, Debug, PartialEq)]
pub struct EditTarget {
    pub slice: String,
    pub target: AnnotationRef,
    /// Current shape, mirrored into the store after every completed edit.
    pub polygon: Polygon,
    /// Vertex being dragged.
    pub dragging: Option<usize>,
}

/// What a pointer button started.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum Drag {
    Stroke { last: Point },
    Rect,
    SamBox { start: Point, end: Point },
    Pan { last_screen: Point },
    Vertex,
}
