//! Interactive editing state machine over the annotation store.
//!
//! The editor owns every uncommitted artifact (the [`Pending`] buffer) and
//! routes every state-changing transition through one guard: if something is
//! pending the user is asked to commit, discard, or cancel, and cancel vetoes
//! the transition. Committed work goes straight into the
//! [`AnnotationStore`] passed in the [`EditContext`].

mod input;
mod state;
mod viewport;

pub use input::{Button, InputEvent, Key, Modifiers};
pub use state::{EditTarget, Mode, Pending, Tool};
pub use viewport::Viewport;

use std::collections::BTreeSet;

use image::{GrayImage, RgbImage};

use self::state::Drag;
use crate::config::EditorConfig;
use crate::error::IapError;
use crate::geometry::raster::{draw_disc, draw_stroke, mask_to_polygons, overlaps, rasterize_polygon, subtract};
use crate::geometry::{BBox, Pixel, Point, Polygon};
use crate::predictor::{Prediction, PredictorAdapter, Prompt};
use crate::prompt::{PendingChoice, UserPrompt};
use crate::store::{Annotation, AnnotationRef, AnnotationStore, Geometry};

/// Collaborators an editor operation may use.
pub struct EditContext<'a> {
    pub store: &'a mut AnnotationStore,
    pub prompt: &'a mut dyn UserPrompt,
    pub predictor: Option<&'a PredictorAdapter>,
    /// RGB rendering of the current slice, needed by the predictor.
    pub image: Option<&'a RgbImage>,
}

impl<'a> EditContext<'a> {
    pub fn new(store: &'a mut AnnotationStore, prompt: &'a mut dyn UserPrompt) -> Self {
        Self {
            store,
            prompt,
            predictor: None,
            image: None,
        }
    }

    pub fn with_predictor(mut self, predictor: &'a PredictorAdapter, image: &'a RgbImage) -> Self {
        self.predictor = Some(predictor);
        self.image = Some(image);
        self
    }
}

/// What an operation did, for the caller's redraw and auto-save decisions.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    None,
    /// Only editor-local state changed.
    Redraw,
    /// New annotations were appended.
    Committed(Vec<AnnotationRef>),
    /// Existing annotations were modified or deleted.
    StoreChanged,
    /// No predictor was supplied; the caller should run this prompt (e.g. via
    /// `PredictorAdapter::predict_in_background`) and hand the result to
    /// [`Editor::deliver_prediction`].
    PredictionRequested(Prompt),
}

impl Effect {
    pub fn store_changed(&self) -> bool {
        matches!(self, Effect::Committed(_) | Effect::StoreChanged)
    }
}

#[derive(Debug)]
pub struct Editor {
    config: EditorConfig,
    tool: Option<Tool>,
    pending: Pending,
    active_class: Option<String>,
    slice: Option<String>,
    image_size: (u32, u32),
    viewport: Viewport,
    cursor: Option<Point>,
    drag: Option<Drag>,
    sam_points: (Vec<Point>, Vec<Point>),
    editing: Option<EditTarget>,
    selection: BTreeSet<AnnotationRef>,
}

impl Editor {
    pub fn new(config: EditorConfig) -> Self {
        let viewport = Viewport::new(config.zoom_min, config.zoom_max);
        Self {
            config,
            tool: None,
            pending: Pending::None,
            active_class: None,
            slice: None,
            image_size: (0, 0),
            viewport,
            cursor: None,
            drag: None,
            sam_points: (Vec::new(), Vec::new()),
            editing: None,
            selection: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn tool(&self) -> Option<Tool> {
        self.tool
    }

    pub fn pending(&self) -> &Pending {
        &self.pending
    }

    pub fn slice(&self) -> Option<&str> {
        self.slice.as_deref()
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.image_size
    }

    pub fn active_class(&self) -> Option<&str> {
        self.active_class.as_deref()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn cursor(&self) -> Option<Point> {
        self.cursor
    }

    pub fn editing(&self) -> Option<&EditTarget> {
        self.editing.as_ref()
    }

    pub fn selection(&self) -> &BTreeSet<AnnotationRef> {
        &self.selection
    }

    /// Box being dragged for a box prompt, image space.
    pub fn sam_box(&self) -> Option<BBox<Pixel>> {
        match self.drag {
            Some(Drag::SamBox { start, end }) => Some(BBox::from_corners(start, end)),
            _ => None,
        }
    }

    /// Accumulated positive and negative seed points.
    pub fn sam_points(&self) -> (&[Point], &[Point]) {
        (&self.sam_points.0, &self.sam_points.1)
    }

    /// Radius of the active stroke tool, if any.
    pub fn stroke_radius(&self) -> Option<u32> {
        match self.tool {
            Some(Tool::Brush) => Some(self.config.brush_size),
            Some(Tool::Eraser) => Some(self.config.eraser_size),
            _ => None,
        }
    }

    pub fn set_brush_size(&mut self, size: u32) {
        self.config.brush_size = size.max(1);
    }

    pub fn set_eraser_size(&mut self, size: u32) {
        self.config.eraser_size = size.max(1);
    }

    pub fn mode(&self) -> Mode {
        if self.editing.is_some() {
            return Mode::EditingPolygon;
        }
        if matches!(self.pending, Pending::SamPreview(_)) {
            return Mode::AwaitingPredictionCommit;
        }
        match self.tool {
            None => Mode::Idle,
            Some(Tool::Polygon) => Mode::PolygonBuilding,
            Some(Tool::Rectangle) => Mode::RectangleDragging,
            Some(Tool::Brush) => Mode::PaintBrush,
            Some(Tool::Eraser) => Mode::Eraser,
            Some(Tool::SamBox) => Mode::SamBboxDrawing,
            Some(Tool::SamPoints) => Mode::SamPointSeeding,
        }
    }

    pub fn set_active_class(&mut self, class: Option<String>) {
        self.active_class = class;
    }

    // ---- transitions --------------------------------------------------

    /// Resolves the pending buffer before a transition. `Ok(false)` means the
    /// user cancelled and the transition must not happen.
    pub fn guard(&mut self, ctx: &mut EditContext<'_>) -> Result<bool, IapError> {
        if self.pending.is_none() {
            self.sam_points = (Vec::new(), Vec::new());
            return Ok(true);
        }
        let kind = self.pending.kind();
        match ctx.prompt.resolve_pending(kind) {
            PendingChoice::Commit => {
                self.commit(ctx)?;
                Ok(true)
            }
            PendingChoice::Discard => {
                self.discard();
                Ok(true)
            }
            PendingChoice::Cancel => {
                log::debug!("transition vetoed with pending {kind}");
                Ok(false)
            }
        }
    }

    /// Selects a tool (or none). Rejected while a polygon is being edited.
    pub fn set_tool(&mut self, tool: Option<Tool>, ctx: &mut EditContext<'_>) -> Result<bool, IapError> {
        if self.editing.is_some() {
            return Err(IapError::PendingBufferConflict {
                kind: "polygon edit",
            });
        }
        if self.tool == tool {
            return Ok(true);
        }
        if !self.guard(ctx)? {
            return Ok(false);
        }
        self.tool = tool;
        self.drag = None;
        log::debug!("tool set to {:?}", tool);
        Ok(true)
    }

    /// Switches to another slice (or image). `width`/`height` size the
    /// paint and eraser masks.
    pub fn set_slice(
        &mut self,
        slice: &str,
        width: u32,
        height: u32,
        ctx: &mut EditContext<'_>,
    ) -> Result<bool, IapError> {
        if !self.guard(ctx)? {
            return Ok(false);
        }
        self.editing = None;
        self.drag = None;
        self.selection.clear();
        self.slice = Some(slice.to_string());
        self.image_size = (width, height);
        Ok(true)
    }

    /// Leaves the current slice without entering another, e.g. on close.
    pub fn clear_slice(&mut self, ctx: &mut EditContext<'_>) -> Result<bool, IapError> {
        if !self.guard(ctx)? {
            return Ok(false);
        }
        self.editing = None;
        self.drag = None;
        self.selection.clear();
        self.slice = None;
        self.image_size = (0, 0);
        Ok(true)
    }

    pub fn set_class_visibility(
        &mut self,
        class: &str,
        visible: bool,
        ctx: &mut EditContext<'_>,
    ) -> Result<bool, IapError> {
        if !self.guard(ctx)? {
            return Ok(false);
        }
        ctx.store.registry_mut().set_visible(class, visible);
        Ok(true)
    }

    /// Guard for import, export and save.
    pub fn prepare_external(&mut self, ctx: &mut EditContext<'_>) -> Result<bool, IapError> {
        if !self.guard(ctx)? {
            return Ok(false);
        }
        self.editing = None;
        Ok(true)
    }

    // ---- selection ----------------------------------------------------

    /// Control-click semantics: `additive` toggles, otherwise replaces.
    pub fn select(&mut self, target: AnnotationRef, additive: bool) {
        if additive {
            if !self.selection.remove(&target) {
                self.selection.insert(target);
            }
        } else {
            self.selection.clear();
            self.selection.insert(target);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Merges the selection on the current slice. The selection survives a
    /// failed merge.
    pub fn merge_selected(
        &mut self,
        keep_originals: bool,
        ctx: &mut EditContext<'_>,
    ) -> Result<Effect, IapError> {
        let slice = self.current_slice()?;
        let selected: Vec<AnnotationRef> = self.selection.iter().cloned().collect();
        let outcome = ctx.store.union(&slice, &selected, keep_originals)?;
        self.selection.clear();
        let class = selected[0].class_name.clone();
        Ok(Effect::Committed(vec![AnnotationRef::new(class, outcome.number)]))
    }

    /// Deletes every selected annotation on the current slice.
    pub fn delete_selected(&mut self, ctx: &mut EditContext<'_>) -> Result<Effect, IapError> {
        let slice = self.current_slice()?;
        // Highest ordinal first so earlier removals don't shift later targets.
        let mut targets: Vec<AnnotationRef> = self.selection.iter().cloned().collect();
        targets.sort_by(|a, b| b.number.cmp(&a.number));
        for target in &targets {
            ctx.store.remove(&slice, target)?;
        }
        self.selection.clear();
        Ok(if targets.is_empty() {
            Effect::None
        } else {
            Effect::StoreChanged
        })
    }

    // ---- commit / discard ---------------------------------------------

    /// Commits the pending buffer. An invalid buffer is rejected and left
    /// untouched.
    pub fn commit(&mut self, ctx: &mut EditContext<'_>) -> Result<Effect, IapError> {
        let effect = match &self.pending {
            Pending::None => return Ok(Effect::None),
            Pending::Polygon(points) => {
                if points.len() < 3 {
                    return Err(IapError::invalid(format!(
                        "a polygon needs at least 3 vertices, got {}",
                        points.len()
                    )));
                }
                let polygon = Polygon::from_points(points)?;
                let refs = self.append(ctx, vec![Geometry::Polygon(polygon)], None)?;
                Effect::Committed(refs)
            }
            Pending::Rect { start, end } => {
                let bbox = BBox::from_corners(*start, *end);
                if !bbox.is_positive() {
                    return Err(IapError::invalid("a rectangle needs positive width and height"));
                }
                let refs = self.append(ctx, vec![Geometry::BBox(bbox)], None)?;
                Effect::Committed(refs)
            }
            Pending::Paint(mask) => {
                let geometries = mask_to_polygons(mask, self.config.min_contour_area)
                    .into_iter()
                    .map(Geometry::Polygon)
                    .collect();
                let refs = self.append(ctx, geometries, None)?;
                Effect::Committed(refs)
            }
            Pending::Erase(mask) => self.apply_erase(ctx, mask)?,
            Pending::SamPreview(prediction) => {
                let class = prediction.label.clone();
                let geometry = Geometry::Polygon(prediction.polygon.clone());
                let refs = self.append(ctx, vec![geometry], class)?;
                Effect::Committed(refs)
            }
        };
        log::info!("committed {}", self.pending.kind());
        self.pending = Pending::None;
        self.sam_points = (Vec::new(), Vec::new());
        self.drag = None;
        Ok(effect)
    }

    pub fn discard(&mut self) {
        if !self.pending.is_none() {
            log::debug!("discarded {}", self.pending.kind());
        }
        self.pending = Pending::None;
        self.sam_points = (Vec::new(), Vec::new());
        self.drag = None;
    }

    fn current_slice(&self) -> Result<String, IapError> {
        self.slice
            .clone()
            .ok_or_else(|| IapError::invalid("no slice is open"))
    }

    /// Appends geometries under `class` (or the active class), registering
    /// `class` first when it is unknown.
    fn append(
        &self,
        ctx: &mut EditContext<'_>,
        geometries: Vec<Geometry>,
        class: Option<String>,
    ) -> Result<Vec<AnnotationRef>, IapError> {
        let slice = self.current_slice()?;
        let class = match class.or_else(|| self.active_class.clone()) {
            Some(c) => c,
            None => return Err(IapError::invalid("select a class first")),
        };
        let class_id = ctx.store.registry_mut().ensure(&class)?;
        let mut refs = Vec::with_capacity(geometries.len());
        for geometry in geometries {
            let number = ctx
                .store
                .put(&slice, Annotation::new(class_id, class.clone(), geometry))?;
            refs.push(AnnotationRef::new(class.clone(), number));
        }
        Ok(refs)
    }

    /// Subtracts `mask` from every polygon on the slice that it overlaps.
    fn apply_erase(&self, ctx: &mut EditContext<'_>, mask: &GrayImage) -> Result<Effect, IapError> {
        let slice = self.current_slice()?;
        let (w, h) = mask.dimensions();
        let classes: Vec<String> = match ctx.store.get(&slice) {
            Some(classes) => classes.keys().cloned().collect(),
            None => return Ok(Effect::None),
        };
        let mut changed = false;
        for class in classes {
            let original = ctx.store.annotations(&slice, &class).to_vec();
            let mut next = original.iter().map(|a| a.number).max().unwrap_or(0) + 1;
            let mut list = Vec::with_capacity(original.len());
            let mut touched = false;
            for annotation in original {
                let raster = match &annotation.geometry {
                    Geometry::Polygon(polygon) => rasterize_polygon(polygon, w, h),
                    Geometry::BBox(_) => {
                        list.push(annotation);
                        continue;
                    }
                };
                if !overlaps(&raster, mask) {
                    list.push(annotation);
                    continue;
                }
                touched = true;
                let pieces = mask_to_polygons(&subtract(&raster, mask), self.config.min_contour_area);
                for (i, piece) in pieces.into_iter().enumerate() {
                    let number = if i == 0 {
                        annotation.number
                    } else {
                        next += 1;
                        next - 1
                    };
                    list.push(Annotation {
                        geometry: Geometry::Polygon(piece),
                        number,
                        ..annotation.clone()
                    });
                }
            }
            if touched {
                ctx.store.replace_list(&slice, &class, list)?;
                changed = true;
            }
        }
        Ok(if changed {
            Effect::StoreChanged
        } else {
            Effect::None
        })
    }

    // ---- predictions --------------------------------------------------

    fn request_prediction(&mut self, prompt: Prompt, ctx: &mut EditContext<'_>) -> Effect {
        match (ctx.predictor, ctx.image) {
            (Some(predictor), Some(image)) => {
                let result = predictor.predict(image, &prompt);
                self.deliver_prediction(result, ctx.prompt)
            }
            _ => Effect::PredictionRequested(prompt),
        }
    }

    /// Installs a predictor result as the preview. Errors are reported and
    /// leave the pending buffer as it was; results that arrive after the user
    /// left the prediction tools are dropped.
    pub fn deliver_prediction(
        &mut self,
        result: Result<Option<Prediction>, IapError>,
        prompt: &mut dyn UserPrompt,
    ) -> Effect {
        if !matches!(self.tool, Some(Tool::SamBox | Tool::SamPoints)) || self.editing.is_some() {
            log::debug!("dropping late prediction");
            return Effect::None;
        }
        if !matches!(self.pending, Pending::None | Pending::SamPreview(_)) {
            return Effect::None;
        }
        match result {
            Ok(Some(prediction)) => {
                log::debug!("prediction received (score {:.3})", prediction.score);
                self.pending = Pending::SamPreview(prediction);
            }
            Ok(None) => {
                log::debug!("predictor returned no qualifying contour");
                self.pending = Pending::None;
            }
            Err(e) => {
                log::warn!("predictor failed: {e}");
                prompt.notify(&e);
            }
        }
        Effect::Redraw
    }

    // ---- input --------------------------------------------------------

    pub fn handle(&mut self, event: InputEvent, ctx: &mut EditContext<'_>) -> Result<Effect, IapError> {
        match event {
            InputEvent::Wheel {
                pos,
                delta,
                modifiers,
            } => {
                if modifiers.control && delta != 0.0 {
                    let factor = if delta > 0.0 {
                        self.config.zoom_step
                    } else {
                        1.0 / self.config.zoom_step
                    };
                    self.viewport.zoom_at(pos, factor);
                    return Ok(Effect::Redraw);
                }
                Ok(Effect::None)
            }
            InputEvent::Key(key) => self.on_key(key, ctx),
            InputEvent::Press {
                pos,
                button,
                modifiers,
            } => {
                if modifiers.control {
                    self.drag = Some(Drag::Pan { last_screen: pos });
                    return Ok(Effect::None);
                }
                let p = self.viewport.to_image(pos);
                self.cursor = Some(p);
                if self.slice.is_none() {
                    return Ok(Effect::None);
                }
                if self.editing.is_some() {
                    return self.edit_press(p, button, modifiers, ctx);
                }
                self.on_press(p, button, ctx)
            }
            InputEvent::Move { pos, .. } => {
                if let Some(Drag::Pan { last_screen }) = self.drag {
                    self.viewport.pan(pos.x - last_screen.x, pos.y - last_screen.y);
                    self.drag = Some(Drag::Pan { last_screen: pos });
                    return Ok(Effect::Redraw);
                }
                let p = self.viewport.to_image(pos);
                self.cursor = Some(p);
                self.on_move(p);
                Ok(Effect::Redraw)
            }
            InputEvent::Release { pos, button, .. } => {
                if let Some(Drag::Pan { .. }) = self.drag {
                    self.drag = None;
                    return Ok(Effect::None);
                }
                let p = self.viewport.to_image(pos);
                self.cursor = Some(p);
                self.on_release(p, button, ctx)
            }
            InputEvent::DoubleClick { pos, button, .. } => {
                if button != Button::Left || self.slice.is_none() {
                    return Ok(Effect::None);
                }
                let p = self.viewport.to_image(pos);
                self.on_double_click(p, ctx)
            }
        }
    }

    fn on_key(&mut self, key: Key, ctx: &mut EditContext<'_>) -> Result<Effect, IapError> {
        if let Some(edit) = &self.editing {
            return match key {
                Key::Enter | Key::Escape => {
                    log::debug!("left edit mode on {}-{}", edit.target.class_name, edit.target.number);
                    self.editing = None;
                    self.drag = None;
                    Ok(Effect::Redraw)
                }
                Key::Delete => {
                    let edit = edit.clone();
                    self.editing = None;
                    self.drag = None;
                    ctx.store.remove(&edit.slice, &edit.target)?;
                    self.selection.remove(&edit.target);
                    Ok(Effect::StoreChanged)
                }
            };
        }
        match key {
            Key::Enter => self.commit(ctx),
            Key::Escape => {
                self.discard();
                Ok(Effect::Redraw)
            }
            Key::Delete => self.delete_selected(ctx),
        }
    }

    fn on_press(&mut self, p: Point, button: Button, ctx: &mut EditContext<'_>) -> Result<Effect, IapError> {
        match (self.tool, button) {
            (Some(Tool::Polygon), Button::Left) => {
                match &mut self.pending {
                    Pending::Polygon(points) => points.push(p),
                    _ => self.pending = Pending::Polygon(vec![p]),
                }
                Ok(Effect::Redraw)
            }
            (Some(Tool::Rectangle), Button::Left) => {
                self.pending = Pending::Rect { start: p, end: p };
                self.drag = Some(Drag::Rect);
                Ok(Effect::Redraw)
            }
            (Some(tool @ (Tool::Brush | Tool::Eraser)), Button::Left) => {
                let erase = tool == Tool::Eraser;
                let radius = if erase {
                    self.config.eraser_size
                } else {
                    self.config.brush_size
                };
                self.ensure_stroke_mask(erase);
                if let Pending::Paint(mask) | Pending::Erase(mask) = &mut self.pending {
                    draw_disc(mask, p, radius);
                }
                self.drag = Some(Drag::Stroke { last: p });
                Ok(Effect::Redraw)
            }
            (Some(Tool::SamBox), Button::Left) => {
                self.drag = Some(Drag::SamBox { start: p, end: p });
                Ok(Effect::Redraw)
            }
            (Some(Tool::SamPoints), _) => {
                match button {
                    Button::Left => self.sam_points.0.push(p),
                    Button::Right => self.sam_points.1.push(p),
                }
                let prompt = Prompt::Points {
                    positive: self.sam_points.0.clone(),
                    negative: self.sam_points.1.clone(),
                };
                Ok(self.request_prediction(prompt, ctx))
            }
            _ => Ok(Effect::None),
        }
    }

    /// Installs an empty paint or eraser mask unless a matching one exists.
    fn ensure_stroke_mask(&mut self, erase: bool) {
        let (w, h) = self.image_size;
        let fits = match (&self.pending, erase) {
            (Pending::Paint(m), false) | (Pending::Erase(m), true) => m.dimensions() == (w, h),
            _ => false,
        };
        if !fits {
            self.pending = if erase {
                Pending::Erase(GrayImage::new(w, h))
            } else {
                Pending::Paint(GrayImage::new(w, h))
            };
        }
    }

    fn on_move(&mut self, p: Point) {
        match self.drag {
            Some(Drag::Stroke { last }) => {
                let radius = match self.tool {
                    Some(Tool::Eraser) => self.config.eraser_size,
                    _ => self.config.brush_size,
                };
                if let Pending::Paint(mask) | Pending::Erase(mask) = &mut self.pending {
                    draw_stroke(mask, last, p, radius);
                }
                self.drag = Some(Drag::Stroke { last: p });
            }
            Some(Drag::Rect) => {
                if let Pending::Rect { end, .. } = &mut self.pending {
                    *end = p;
                }
            }
            Some(Drag::SamBox { start, .. }) => {
                self.drag = Some(Drag::SamBox { start, end: p });
            }
            Some(Drag::Vertex) => {
                if let Some(edit) = &mut self.editing {
                    if let Some(i) = edit.dragging {
                        edit.polygon.move_vertex(i, p);
                    }
                }
            }
            Some(Drag::Pan { .. }) | None => {}
        }
    }

    fn on_release(&mut self, p: Point, button: Button, ctx: &mut EditContext<'_>) -> Result<Effect, IapError> {
        if button != Button::Left {
            return Ok(Effect::None);
        }
        match self.drag.take() {
            Some(Drag::Stroke { last }) => {
                let radius = match self.tool {
                    Some(Tool::Eraser) => self.config.eraser_size,
                    _ => self.config.brush_size,
                };
                if let Pending::Paint(mask) | Pending::Erase(mask) = &mut self.pending {
                    draw_stroke(mask, last, p, radius);
                }
                // The mask stays pending until Enter.
                Ok(Effect::Redraw)
            }
            Some(Drag::Rect) => {
                if let Pending::Rect { end, .. } = &mut self.pending {
                    *end = p;
                }
                match self.pending.rect() {
                    Some(b) if b.is_positive() => self.commit(ctx),
                    _ => {
                        self.pending = Pending::None;
                        Ok(Effect::Redraw)
                    }
                }
            }
            Some(Drag::SamBox { start, .. }) => {
                let bbox = BBox::from_corners(start, p);
                if !bbox.is_positive() {
                    return Ok(Effect::Redraw);
                }
                Ok(self.request_prediction(Prompt::BBox(bbox), ctx))
            }
            Some(Drag::Vertex) => {
                let Some(edit) = &mut self.editing else {
                    return Ok(Effect::None);
                };
                edit.dragging = None;
                let (slice, target, polygon) = (edit.slice.clone(), edit.target.clone(), edit.polygon.clone());
                ctx.store.set_geometry(&slice, &target, Geometry::Polygon(polygon))?;
                Ok(Effect::StoreChanged)
            }
            Some(Drag::Pan { .. }) | None => Ok(Effect::None),
        }
    }

    fn on_double_click(&mut self, p: Point, ctx: &mut EditContext<'_>) -> Result<Effect, IapError> {
        if self.tool == Some(Tool::Polygon) {
            if let Pending::Polygon(points) = &self.pending {
                if !points.is_empty() {
                    return self.commit(ctx);
                }
            }
        }
        if self.editing.is_some() {
            return Ok(Effect::None);
        }
        let Some(target) = self.hit_polygon(p, ctx.store) else {
            return Ok(Effect::None);
        };
        if !self.guard(ctx)? {
            return Ok(Effect::None);
        }
        let slice = self.current_slice()?;
        let Some(Geometry::Polygon(polygon)) = ctx.store.annotation(&slice, &target).map(|a| a.geometry.clone()) else {
            return Ok(Effect::None);
        };
        log::debug!("editing {}-{} on '{}'", target.class_name, target.number, slice);
        self.editing = Some(EditTarget {
            slice,
            target,
            polygon,
            dragging: None,
        });
        Ok(Effect::Redraw)
    }

    /// First visible polygon containing `p`, in draw order.
    fn hit_polygon(&self, p: Point, store: &AnnotationStore) -> Option<AnnotationRef> {
        let slice = self.slice.as_deref()?;
        for (_, entry) in store.registry().iter() {
            if !store.registry().is_visible(&entry.name) {
                continue;
            }
            for a in store.annotations(slice, &entry.name) {
                if let Geometry::Polygon(poly) = &a.geometry {
                    if poly.contains(p) {
                        return Some(AnnotationRef::new(entry.name.clone(), a.number));
                    }
                }
            }
        }
        None
    }

    fn edit_press(
        &mut self,
        p: Point,
        button: Button,
        modifiers: Modifiers,
        ctx: &mut EditContext<'_>,
    ) -> Result<Effect, IapError> {
        if button != Button::Left {
            return Ok(Effect::None);
        }
        let radius = self.config.vertex_hit_radius / self.viewport.zoom();
        let epsilon = self.config.segment_epsilon;
        let Some(edit) = &mut self.editing else {
            return Ok(Effect::None);
        };
        if let Some(i) = edit.polygon.vertex_near(p, radius) {
            if modifiers.shift {
                edit.polygon.remove_vertex(i)?;
                let (slice, target, polygon) = (edit.slice.clone(), edit.target.clone(), edit.polygon.clone());
                ctx.store.set_geometry(&slice, &target, Geometry::Polygon(polygon))?;
                return Ok(Effect::StoreChanged);
            }
            edit.dragging = Some(i);
            self.drag = Some(Drag::Vertex);
            return Ok(Effect::Redraw);
        }
        if let Some(i) = edit.polygon.edge_near(p, epsilon) {
            edit.polygon.insert_after(i, p);
            edit.dragging = Some(i + 1);
            self.drag = Some(Drag::Vertex);
            let (slice, target, polygon) = (edit.slice.clone(), edit.target.clone(), edit.polygon.clone());
            ctx.store.set_geometry(&slice, &target, Geometry::Polygon(polygon))?;
            return Ok(Effect::StoreChanged);
        }
        Ok(Effect::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::{OtsuBackend, PredictorAdapter};
    use crate::prompt::FixedAnswers;
    use image::Rgb;

    fn setup(classes: &[&str]) -> (Editor, AnnotationStore, FixedAnswers) {
        let mut store = AnnotationStore::new();
        for c in classes {
            store.registry_mut().add(c).unwrap();
        }
        let mut editor = Editor::new(EditorConfig::default());
        let mut prompt = FixedAnswers::new();
        editor
            .set_slice("img.png", 200, 200, &mut EditContext::new(&mut store, &mut prompt))
            .unwrap();
        editor.set_active_class(classes.first().map(|c| c.to_string()));
        (editor, store, prompt)
    }

    macro_rules! ctx {
        ($store:expr, $prompt:expr) => {
            &mut EditContext::new(&mut $store, &mut $prompt)
        };
    }

    fn square(x: f64, y: f64, side: f64) -> Polygon {
        Polygon::new(vec![x, y, x + side, y, x + side, y + side, x, y + side]).unwrap()
    }

    #[test]
    fn polygon_commits_with_three_vertices_not_two() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::Polygon), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(10.0, 10.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(50.0, 10.0), ctx!(store, prompt)).unwrap();
        assert_eq!(ed.mode(), Mode::PolygonBuilding);

        let err = ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap_err();
        assert!(matches!(err, IapError::UserInputInvalid { .. }));
        assert!(matches!(ed.pending(), Pending::Polygon(v) if v.len() == 2));
        assert!(store.is_empty());

        ed.handle(InputEvent::press(50.0, 50.0), ctx!(store, prompt)).unwrap();
        let effect = ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        assert_eq!(effect, Effect::Committed(vec![AnnotationRef::new("cell", 1)]));
        assert!(ed.pending().is_none());
        assert_eq!(store.annotations("img.png", "cell")[0].area(), 800.0);
    }

    #[test]
    fn double_click_commits_polygon() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::Polygon), ctx!(store, prompt)).unwrap();
        for (x, y) in [(10.0, 10.0), (90.0, 10.0), (90.0, 90.0), (10.0, 90.0)] {
            ed.handle(InputEvent::press(x, y), ctx!(store, prompt)).unwrap();
            ed.handle(InputEvent::release(x, y), ctx!(store, prompt)).unwrap();
        }
        let effect = ed.handle(InputEvent::double_click(10.0, 90.0), ctx!(store, prompt)).unwrap();
        assert!(effect.store_changed());
        assert_eq!(store.annotations("img.png", "cell")[0].area(), 6400.0);
    }

    #[test]
    fn escape_discards_polygon() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::Polygon), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(10.0, 10.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::Key(Key::Escape), ctx!(store, prompt)).unwrap();
        assert!(ed.pending().is_none());
    }

    #[test]
    fn rectangle_commits_on_release_only_with_area() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::Rectangle), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(10.0, 10.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::moved(30.0, 10.0), ctx!(store, prompt)).unwrap();
        let effect = ed.handle(InputEvent::release(30.0, 10.0), ctx!(store, prompt)).unwrap();
        assert_eq!(effect, Effect::Redraw);
        assert!(store.is_empty());

        ed.handle(InputEvent::press(10.0, 10.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::moved(40.0, 30.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(40.0, 30.0), ctx!(store, prompt)).unwrap();
        let a = &store.annotations("img.png", "cell")[0];
        assert_eq!(a.geometry, Geometry::BBox(BBox::new(10.0, 10.0, 30.0, 20.0)));
    }

    #[test]
    fn pending_buffer_guard_honors_all_three_choices() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::Polygon), ctx!(store, prompt)).unwrap();
        for (x, y) in [(10.0, 10.0), (60.0, 10.0), (60.0, 60.0)] {
            ed.handle(InputEvent::press(x, y), ctx!(store, prompt)).unwrap();
        }

        prompt.pending = PendingChoice::Cancel;
        assert!(!ed.set_slice("other.png", 200, 200, ctx!(store, prompt)).unwrap());
        assert_eq!(ed.slice(), Some("img.png"));
        assert!(!ed.pending().is_none());

        prompt.pending = PendingChoice::Commit;
        assert!(ed.set_slice("other.png", 200, 200, ctx!(store, prompt)).unwrap());
        assert_eq!(store.annotations("img.png", "cell").len(), 1);
        assert!(ed.pending().is_none());

        for (x, y) in [(10.0, 10.0), (60.0, 10.0), (60.0, 60.0)] {
            ed.handle(InputEvent::press(x, y), ctx!(store, prompt)).unwrap();
        }
        prompt.pending = PendingChoice::Discard;
        assert!(ed.set_tool(Some(Tool::Brush), ctx!(store, prompt)).unwrap());
        assert!(store.annotations("other.png", "cell").is_empty());
        assert_eq!(ed.mode(), Mode::PaintBrush);
    }

    #[test]
    fn paint_commit_creates_one_annotation_per_blob() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_brush_size(5);
        ed.set_tool(Some(Tool::Brush), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(30.0, 30.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::moved(60.0, 30.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(60.0, 30.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(150.0, 150.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(150.0, 150.0), ctx!(store, prompt)).unwrap();
        assert!(matches!(ed.pending(), Pending::Paint(_)));
        assert!(store.is_empty());

        let effect = ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        let Effect::Committed(refs) = effect else {
            panic!("expected a commit, got {effect:?}");
        };
        assert_eq!(refs.len(), 2);
        assert_eq!(store.annotations("img.png", "cell").len(), 2);
    }

    #[test]
    fn paint_along_the_left_edge_commits() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_brush_size(5);
        ed.set_tool(Some(Tool::Brush), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(0.0, 20.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::moved(0.0, 80.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(0.0, 80.0), ctx!(store, prompt)).unwrap();
        let effect = ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        let Effect::Committed(refs) = effect else {
            panic!("expected a commit, got {effect:?}");
        };
        assert_eq!(refs.len(), 1);
        let stroke = store.annotations("img.png", "cell")[0].bbox();
        assert_eq!(stroke.x, 0.0);
    }

    #[test]
    fn tiny_paint_commits_nothing() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_brush_size(1);
        ed.set_tool(Some(Tool::Brush), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(30.0, 30.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(30.0, 30.0), ctx!(store, prompt)).unwrap();
        let effect = ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        assert_eq!(effect, Effect::Committed(vec![]));
        assert!(store.is_empty());
        assert!(ed.pending().is_none());
    }

    #[test]
    fn eraser_splits_polygon_and_keeps_first_ordinal() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        let id = store.registry().id_of("cell").unwrap();
        let band = Polygon::new(vec![0.0, 0.0, 200.0, 0.0, 200.0, 100.0, 0.0, 100.0]).unwrap();
        store
            .put("img.png", Annotation::new(id, "cell", Geometry::Polygon(band)))
            .unwrap();

        ed.set_eraser_size(5);
        ed.set_tool(Some(Tool::Eraser), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(100.0, 0.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::moved(100.0, 100.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(100.0, 100.0), ctx!(store, prompt)).unwrap();
        let effect = ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        assert_eq!(effect, Effect::StoreChanged);

        let list = store.annotations("img.png", "cell");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].number, 1);
        assert_eq!(list[1].number, 2);
        for a in list {
            let w = a.bbox().width;
            assert!((88.0..=100.0).contains(&w), "width {w}");
        }
    }

    #[test]
    fn eraser_ignores_bboxes_and_untouched_polygons() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        let id = store.registry().id_of("cell").unwrap();
        store
            .put("img.png", Annotation::new(id, "cell", Geometry::BBox(BBox::new(90.0, 90.0, 20.0, 20.0))))
            .unwrap();
        let far = Geometry::Polygon(square(150.0, 150.0, 20.0));
        store.put("img.png", Annotation::new(id, "cell", far.clone())).unwrap();

        ed.set_tool(Some(Tool::Eraser), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(100.0, 100.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(100.0, 100.0), ctx!(store, prompt)).unwrap();
        let effect = ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        assert_eq!(effect, Effect::None);
        assert_eq!(store.annotations("img.png", "cell")[1].geometry, far);
    }

    #[test]
    fn paint_then_erase_same_stroke_leaves_nothing() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        let stroke = [(40.0, 40.0), (80.0, 60.0), (120.0, 40.0)];
        for tool in [Tool::Brush, Tool::Eraser] {
            ed.set_tool(Some(tool), ctx!(store, prompt)).unwrap();
            ed.handle(InputEvent::press(stroke[0].0, stroke[0].1), ctx!(store, prompt)).unwrap();
            for &(x, y) in &stroke[1..] {
                ed.handle(InputEvent::moved(x, y), ctx!(store, prompt)).unwrap();
            }
            ed.handle(InputEvent::release(120.0, 40.0), ctx!(store, prompt)).unwrap();
            ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        }
        assert!(store.get("img.png").is_none());
    }

    #[test]
    fn edit_mode_moves_inserts_and_deletes_vertices() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        let id = store.registry().id_of("cell").unwrap();
        store
            .put("img.png", Annotation::new(id, "cell", Geometry::Polygon(square(10.0, 10.0, 80.0))))
            .unwrap();

        ed.handle(InputEvent::double_click(50.0, 50.0), ctx!(store, prompt)).unwrap();
        assert_eq!(ed.mode(), Mode::EditingPolygon);
        assert!(ed.set_tool(Some(Tool::Brush), ctx!(store, prompt)).is_err());

        // Drag the top-left vertex.
        ed.handle(InputEvent::press(12.0, 12.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::moved(0.0, 0.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(0.0, 0.0), ctx!(store, prompt)).unwrap();
        let r = AnnotationRef::new("cell", 1);
        let Geometry::Polygon(p) = &store.annotation("img.png", &r).unwrap().geometry else {
            panic!("expected polygon");
        };
        assert_eq!(p.vertex(0), Point::new(0.0, 0.0));

        // Insert on the bottom edge, then shift-delete it again.
        ed.handle(InputEvent::press(50.0, 90.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(50.0, 90.0), ctx!(store, prompt)).unwrap();
        let count = |store: &AnnotationStore| match &store.annotation("img.png", &r).unwrap().geometry {
            Geometry::Polygon(p) => p.vertex_count(),
            Geometry::BBox(_) => 0,
        };
        assert_eq!(count(&store), 5);
        ed.handle(
            InputEvent::Press {
                pos: Point::new(50.0, 90.0),
                button: Button::Left,
                modifiers: Modifiers::SHIFT,
            },
            ctx!(store, prompt),
        )
        .unwrap();
        assert_eq!(count(&store), 4);

        ed.handle(InputEvent::Key(Key::Delete), ctx!(store, prompt)).unwrap();
        assert!(store.is_empty());
        assert_eq!(ed.mode(), Mode::Idle);
    }

    #[test]
    fn control_drag_pans_without_touching_pending() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::Polygon), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(10.0, 10.0), ctx!(store, prompt)).unwrap();
        ed.handle(
            InputEvent::Press {
                pos: Point::new(100.0, 100.0),
                button: Button::Left,
                modifiers: Modifiers::CONTROL,
            },
            ctx!(store, prompt),
        )
        .unwrap();
        ed.handle(InputEvent::moved(80.0, 90.0), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::release(80.0, 90.0), ctx!(store, prompt)).unwrap();
        assert_eq!(ed.viewport().offset(), Point::new(20.0, 10.0));
        assert!(matches!(ed.pending(), Pending::Polygon(v) if v.len() == 1));

        ed.handle(
            InputEvent::Wheel {
                pos: Point::new(0.0, 0.0),
                delta: 1.0,
                modifiers: Modifiers::CONTROL,
            },
            ctx!(store, prompt),
        )
        .unwrap();
        assert!((ed.viewport().zoom() - 1.1).abs() < 1e-12);
    }

    fn blob_image() -> RgbImage {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([10, 10, 10]));
        for y in 50..90 {
            for x in 50..90 {
                img.put_pixel(x, y, Rgb([240, 240, 240]));
            }
        }
        img
    }

    #[test]
    fn sam_box_preview_accept_and_discard() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        let mut adapter = PredictorAdapter::new(Box::new(OtsuBackend::new()));
        adapter.set_model("sam2_t").unwrap();
        let image = blob_image();

        let run = |ed: &mut Editor, store: &mut AnnotationStore, prompt: &mut FixedAnswers, ev| {
            ed.handle(ev, &mut EditContext::new(store, prompt).with_predictor(&adapter, &image))
                .unwrap()
        };
        ed.set_tool(Some(Tool::SamBox), ctx!(store, prompt)).unwrap();
        run(&mut ed, &mut store, &mut prompt, InputEvent::press(40.0, 40.0));
        run(&mut ed, &mut store, &mut prompt, InputEvent::moved(100.0, 100.0));
        run(&mut ed, &mut store, &mut prompt, InputEvent::release(100.0, 100.0));
        assert_eq!(ed.mode(), Mode::AwaitingPredictionCommit);

        run(&mut ed, &mut store, &mut prompt, InputEvent::Key(Key::Escape));
        assert!(ed.pending().is_none());
        assert!(store.is_empty());

        run(&mut ed, &mut store, &mut prompt, InputEvent::press(40.0, 40.0));
        run(&mut ed, &mut store, &mut prompt, InputEvent::release(100.0, 100.0));
        let effect = run(&mut ed, &mut store, &mut prompt, InputEvent::Key(Key::Enter));
        assert!(effect.store_changed());
        let a = &store.annotations("img.png", "cell")[0];
        assert_eq!(a.bbox().to_array(), [50.0, 50.0, 39.0, 39.0]);
    }

    #[test]
    fn prediction_without_adapter_is_requested_and_delivered() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::SamPoints), ctx!(store, prompt)).unwrap();
        let effect = ed.handle(InputEvent::press(60.0, 60.0), ctx!(store, prompt)).unwrap();
        assert!(matches!(effect, Effect::PredictionRequested(Prompt::Points { .. })));
        ed.handle(InputEvent::right_press(5.0, 5.0), ctx!(store, prompt)).unwrap();
        assert_eq!(ed.sam_points().0.len(), 1);
        assert_eq!(ed.sam_points().1.len(), 1);

        // A failure is reported and nothing is lost.
        ed.deliver_prediction(Err(IapError::predictor("boom")), &mut prompt);
        assert_eq!(prompt.notices.len(), 1);
        assert_eq!(ed.sam_points().0.len(), 1);

        let prediction = Prediction {
            polygon: square(50.0, 50.0, 20.0),
            score: 0.8,
            label: Some("nucleus".into()),
        };
        ed.deliver_prediction(Ok(Some(prediction)), &mut prompt);
        assert_eq!(ed.mode(), Mode::AwaitingPredictionCommit);

        ed.handle(InputEvent::Key(Key::Enter), ctx!(store, prompt)).unwrap();
        assert_eq!(store.registry().id_of("nucleus").map(|id| id.as_u32()), Some(2));
        assert_eq!(store.annotations("img.png", "nucleus").len(), 1);
        assert!(ed.sam_points().0.is_empty());
    }

    #[test]
    fn merge_failure_preserves_selection() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        let id = store.registry().id_of("cell").unwrap();
        store.put("img.png", Annotation::new(id, "cell", Geometry::Polygon(square(0.0, 0.0, 10.0)))).unwrap();
        store.put("img.png", Annotation::new(id, "cell", Geometry::Polygon(square(50.0, 50.0, 10.0)))).unwrap();
        ed.select(AnnotationRef::new("cell", 1), false);
        ed.select(AnnotationRef::new("cell", 2), true);
        let before = store.clone();
        let err = ed.merge_selected(false, ctx!(store, prompt)).unwrap_err();
        assert!(matches!(err, IapError::Disconnected { .. }));
        assert_eq!(ed.selection().len(), 2);
        assert_eq!(store, before);
    }

    #[test]
    fn leaving_the_slice_drops_selection() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        let id = store.registry().id_of("cell").unwrap();
        store.put("img.png", Annotation::new(id, "cell", Geometry::Polygon(square(0.0, 0.0, 10.0)))).unwrap();
        ed.select(AnnotationRef::new("cell", 1), false);
        ed.clear_selection();
        assert!(ed.selection().is_empty());
        ed.select(AnnotationRef::new("cell", 1), false);
        assert!(ed.clear_slice(ctx!(store, prompt)).unwrap());
        assert_eq!(ed.slice(), None);
        assert!(ed.selection().is_empty());
        assert_eq!(ed.image_size(), (0, 0));
    }

    #[test]
    fn visibility_change_is_guarded() {
        let (mut ed, mut store, mut prompt) = setup(&["cell"]);
        ed.set_tool(Some(Tool::Polygon), ctx!(store, prompt)).unwrap();
        ed.handle(InputEvent::press(10.0, 10.0), ctx!(store, prompt)).unwrap();
        prompt.pending = PendingChoice::Cancel;
        assert!(!ed.set_class_visibility("cell", false, ctx!(store, prompt)).unwrap());
        assert!(store.registry().is_visible("cell"));
    }
}
