//! Predictor adapter: a pluggable segmentation back end behind a narrow
//! interface.
//!
//! The adapter turns back-end masks into a single polygon candidate. It never
//! touches the annotation store; the editor decides what to do with the
//! candidate.

mod otsu;

pub use otsu::OtsuBackend;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;

use image::{GrayImage, RgbImage};

use crate::error::IapError;
use crate::geometry::raster::mask_to_polygons;
use crate::geometry::{BBox, Pixel, Point, Polygon};

/// Recognized model identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelId {
    Sam2Tiny,
    Sam2Small,
    Sam2Base,
    Sam2Large,
}

impl ModelId {
    pub const ALL: [ModelId; 4] = [
        ModelId::Sam2Tiny,
        ModelId::Sam2Small,
        ModelId::Sam2Base,
        ModelId::Sam2Large,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelId::Sam2Tiny => "sam2_t",
            ModelId::Sam2Small => "sam2_s",
            ModelId::Sam2Base => "sam2_b",
            ModelId::Sam2Large => "sam2_l",
        }
    }

    pub fn weights_file(self) -> &'static str {
        match self {
            ModelId::Sam2Tiny => "sam2_t.pt",
            ModelId::Sam2Small => "sam2_s.pt",
            ModelId::Sam2Base => "sam2_b.pt",
            ModelId::Sam2Large => "sam2_l.pt",
        }
    }

    /// `<dir>/<weights file>`, which must exist.
    pub fn weights_path(self, dir: Option<&Path>) -> Result<PathBuf, IapError> {
        let path = dir
            .unwrap_or_else(|| Path::new("."))
            .join(self.weights_file());
        if path.is_file() {
            Ok(path)
        } else {
            Err(IapError::ResourceMissing {
                what: "model weights",
                path,
            })
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = IapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| IapError::UnknownModel(s.to_string()))
    }
}

/// What the user pointed at.
#[derive(Clone, Debug, PartialEq)]
pub enum Prompt {
    BBox(BBox<Pixel>),
    Points {
        positive: Vec<Point>,
        negative: Vec<Point>,
    },
}

/// A candidate polygon returned to the editor.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub polygon: Polygon,
    pub score: f64,
    /// Class suggested by the back end, if it labels its output.
    pub label: Option<String>,
}

/// Raw back-end output before vectorization.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskPrediction {
    /// Full-image mask; non-zero is foreground.
    pub mask: GrayImage,
    pub score: f64,
    pub label: Option<String>,
}

/// A segmentation model.
pub trait SegmentationBackend: Send {
    /// Whether `load` needs a weights file on disk.
    fn needs_weights(&self) -> bool {
        false
    }

    /// `weights` is `Some` exactly when [`needs_weights`](Self::needs_weights)
    /// is true.
    fn load(&mut self, model: ModelId, weights: Option<&Path>) -> Result<(), IapError>;

    fn segment(&mut self, image: &RgbImage, prompt: &Prompt) -> Result<Option<MaskPrediction>, IapError>;
}

/// Fronts a back end with model state and an in-flight guard.
pub struct PredictorAdapter {
    backend: Arc<Mutex<Box<dyn SegmentationBackend>>>,
    model: Option<ModelId>,
    weights_dir: Option<PathBuf>,
    in_flight: Arc<AtomicBool>,
    min_area: f64,
}

impl fmt::Debug for PredictorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictorAdapter")
            .field("model", &self.model)
            .field("weights_dir", &self.weights_dir)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl PredictorAdapter {
    pub fn new(backend: Box<dyn SegmentationBackend>) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            model: None,
            weights_dir: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            min_area: 10.0,
        }
    }

    pub fn with_weights_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.weights_dir = dir;
        self
    }

    pub fn with_min_area(mut self, min_area: f64) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn model(&self) -> Option<ModelId> {
        self.model
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Loads a model by identifier. Any failure leaves no model loaded.
    pub fn set_model(&mut self, identifier: &str) -> Result<ModelId, IapError> {
        self.model = None;
        let model: ModelId = identifier.parse()?;
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| IapError::predictor("back end is poisoned"))?;
        let weights = if backend.needs_weights() {
            Some(model.weights_path(self.weights_dir.as_deref())?)
        } else {
            None
        };
        backend.load(model, weights.as_deref())?;
        drop(backend);
        self.model = Some(model);
        log::info!("loaded predictor model {}", model);
        Ok(model)
    }

    /// Runs the back end on the dispatch thread.
    pub fn predict(&self, image: &RgbImage, prompt: &Prompt) -> Result<Option<Prediction>, IapError> {
        if self.model.is_none() {
            return Err(IapError::predictor("no model loaded"));
        }
        let _guard = InFlight::acquire(&self.in_flight)?;
        run(&self.backend, image, prompt, self.min_area)
    }

    /// Runs the back end on a worker thread. The result must be handed back
    /// to the editor on the dispatch thread.
    pub fn predict_in_background(
        &self,
        image: RgbImage,
        prompt: Prompt,
    ) -> Result<PredictionHandle, IapError> {
        if self.model.is_none() {
            return Err(IapError::predictor("no model loaded"));
        }
        let guard = InFlight::acquire(&self.in_flight)?;
        let backend = Arc::clone(&self.backend);
        let min_area = self.min_area;
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = run(&backend, &image, &prompt, min_area);
            drop(guard);
            // The receiver may be gone if the request was abandoned.
            let _ = tx.send(result);
        });
        Ok(PredictionHandle { rx })
    }
}

fn run(
    backend: &Mutex<Box<dyn SegmentationBackend>>,
    image: &RgbImage,
    prompt: &Prompt,
    min_area: f64,
) -> Result<Option<Prediction>, IapError> {
    let mut backend = backend
        .lock()
        .map_err(|_| IapError::predictor("back end is poisoned"))?;
    let Some(raw) = backend.segment(image, prompt)? else {
        return Ok(None);
    };
    drop(backend);
    let best = mask_to_polygons(&raw.mask, min_area)
        .into_iter()
        .max_by(|a, b| a.area().total_cmp(&b.area()));
    Ok(best.map(|polygon| Prediction {
        polygon,
        score: raw.score,
        label: raw.label,
    }))
}

/// Clears the in-flight flag when dropped.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, IapError> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(IapError::predictor("busy"));
        }
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Pending result of [`PredictorAdapter::predict_in_background`].
#[derive(Debug)]
pub struct PredictionHandle {
    rx: Receiver<Result<Option<Prediction>, IapError>>,
}

impl PredictionHandle {
    /// Non-blocking poll; `None` while the worker is still running.
    pub fn try_result(&self) -> Option<Result<Option<Prediction>, IapError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(IapError::predictor("worker exited without a result")))
            }
        }
    }

    pub fn wait(self) -> Result<Option<Prediction>, IapError> {
        self.rx
            .recv()
            .map_err(|_| IapError::predictor("worker exited without a result"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::raster::fill_polygon;

    /// Returns a fixed square mask; blocks until released when gated.
    struct FixedBackend {
        weights: bool,
        gate: Option<mpsc::Receiver<()>>,
    }

    impl SegmentationBackend for FixedBackend {
        fn needs_weights(&self) -> bool {
            self.weights
        }

        fn load(&mut self, _model: ModelId, _weights: Option<&Path>) -> Result<(), IapError> {
            Ok(())
        }

        fn segment(
            &mut self,
            image: &RgbImage,
            _prompt: &Prompt,
        ) -> Result<Option<MaskPrediction>, IapError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            let mut mask = GrayImage::new(image.width(), image.height());
            let square = Polygon::new(vec![10.0, 10.0, 30.0, 10.0, 30.0, 30.0, 10.0, 30.0]).unwrap();
            fill_polygon(&mut mask, &square);
            Ok(Some(MaskPrediction {
                mask,
                score: 0.9,
                label: Some("cell".into()),
            }))
        }
    }

    fn prompt() -> Prompt {
        Prompt::BBox(BBox::new(5.0, 5.0, 30.0, 30.0))
    }

    #[test]
    fn model_ids_parse_and_unknown_fails() {
        assert_eq!("sam2_b".parse::<ModelId>().unwrap(), ModelId::Sam2Base);
        let err = "sam3_x".parse::<ModelId>().unwrap_err();
        assert!(matches!(err, IapError::UnknownModel(_)));
    }

    #[test]
    fn predict_requires_a_model() {
        let adapter = PredictorAdapter::new(Box::new(FixedBackend {
            weights: false,
            gate: None,
        }));
        let err = adapter.predict(&RgbImage::new(50, 50), &prompt()).unwrap_err();
        assert!(matches!(err, IapError::PredictorFailed { .. }));
    }

    #[test]
    fn missing_weights_leave_no_model() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut adapter = PredictorAdapter::new(Box::new(FixedBackend {
            weights: true,
            gate: None,
        }))
        .with_weights_dir(Some(dir.path().to_path_buf()));
        let err = adapter.set_model("sam2_t").unwrap_err();
        assert!(matches!(err, IapError::ResourceMissing { .. }));
        assert_eq!(adapter.model(), None);

        std::fs::write(dir.path().join("sam2_t.pt"), b"weights").expect("write weights");
        assert_eq!(adapter.set_model("sam2_t").unwrap(), ModelId::Sam2Tiny);
        assert!(adapter.set_model("bogus").is_err());
        assert_eq!(adapter.model(), None);
    }

    #[test]
    fn prediction_is_vectorized() {
        let mut adapter = PredictorAdapter::new(Box::new(FixedBackend {
            weights: false,
            gate: None,
        }));
        adapter.set_model("sam2_s").unwrap();
        let p = adapter
            .predict(&RgbImage::new(50, 50), &prompt())
            .unwrap()
            .unwrap();
        assert_eq!(p.polygon.area(), 400.0);
        assert_eq!(p.label.as_deref(), Some("cell"));

        let mut strict = PredictorAdapter::new(Box::new(FixedBackend {
            weights: false,
            gate: None,
        }))
        .with_min_area(500.0);
        strict.set_model("sam2_s").unwrap();
        assert!(strict.predict(&RgbImage::new(50, 50), &prompt()).unwrap().is_none());
    }

    #[test]
    fn background_predict_blocks_further_predicts() {
        let (release, gate) = mpsc::channel();
        let mut adapter = PredictorAdapter::new(Box::new(FixedBackend {
            weights: false,
            gate: Some(gate),
        }));
        adapter.set_model("sam2_l").unwrap();

        let handle = adapter
            .predict_in_background(RgbImage::new(50, 50), prompt())
            .unwrap();
        assert!(adapter.is_busy());
        assert!(handle.try_result().is_none());
        let err = adapter.predict(&RgbImage::new(50, 50), &prompt()).unwrap_err();
        assert!(err.to_string().contains("busy"));

        release.send(()).unwrap();
        let p = handle.wait().unwrap().unwrap();
        assert_eq!(p.score, 0.9);
        assert!(!adapter.is_busy());
    }
}
