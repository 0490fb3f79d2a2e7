//! Queue-driven sensor: the caller pushes frames, readers hand out the newest.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{
    ColorCameraSettings, CoordinateMapper, FrameDescription, FrameReader, PinholeMapper, RawFrame, ReaderHandle,
    Sensor,
};
use crate::capture::frame::Modality;
use crate::error::SensorError;

type Queues = Arc<Mutex<HashMap<Modality, VecDeque<RawFrame>>>>;

pub struct ScriptedSensor {
    open: Arc<AtomicBool>,
    fail_open: bool,
    missing: HashSet<Modality>,
    queues: Queues,
    descriptions: HashMap<Modality, FrameDescription>,
    mapper: Option<Arc<dyn CoordinateMapper>>,
    settings: Option<Arc<dyn ColorCameraSettings>>,
}

impl Default for ScriptedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(false)),
            fail_open: false,
            missing: HashSet::new(),
            queues: Arc::default(),
            descriptions: HashMap::new(),
            mapper: Some(Arc::new(PinholeMapper::kinect_v2())),
            settings: None,
        }
    }

    /// Refuse to open a reader for `modality`.
    pub fn without_source(mut self, modality: Modality) -> Self {
        self.missing.insert(modality);
        self
    }

    /// Make `open` fail.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Replace the coordinate mapper; `None` makes `coordinate_mapper` fail.
    pub fn with_mapper(mut self, mapper: Option<Arc<dyn CoordinateMapper>>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_camera_settings(mut self, settings: Arc<dyn ColorCameraSettings>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_description(mut self, modality: Modality, description: FrameDescription) -> Self {
        self.descriptions.insert(modality, description);
        self
    }

    /// Queue a frame for the reader of its modality.
    pub fn push(&self, frame: RawFrame) {
        self.queues.lock().entry(frame.modality()).or_default().push_back(frame);
    }

    /// Frames queued and not yet handed out for `modality`
    pub fn pending(&self, modality: Modality) -> usize {
        self.queues.lock().get(&modality).map_or(0, VecDeque::len)
    }
}

impl Sensor for ScriptedSensor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&self) -> Result<(), SensorError> {
        if self.fail_open {
            return Err(SensorError::Backend("scripted open failure".into()));
        }
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn open_reader(&self, modality: Modality) -> Result<ReaderHandle, SensorError> {
        if !self.is_open() {
            return Err(SensorError::NotOpen);
        }
        if self.missing.contains(&modality) {
            return Err(SensorError::SourceUnavailable(modality));
        }

        debug!(%modality, "Scripted reader opened");
        let reader = ScriptedReader {
            modality,
            open: Arc::clone(&self.open),
            queues: Arc::clone(&self.queues),
        };
        Ok(ReaderHandle::new(modality, Box::new(reader)))
    }

    fn frame_description(&self, modality: Modality) -> Option<FrameDescription> {
        self.descriptions.get(&modality).copied()
    }

    fn coordinate_mapper(&self) -> Result<Arc<dyn CoordinateMapper>, SensorError> {
        self.mapper.clone().ok_or(SensorError::MapperUnavailable)
    }

    fn color_camera_settings(&self) -> Option<Arc<dyn ColorCameraSettings>> {
        self.settings.clone()
    }
}

struct ScriptedReader {
    modality: Modality,
    open: Arc<AtomicBool>,
    queues: Queues,
}

impl FrameReader for ScriptedReader {
    fn acquire_latest(&mut self) -> Option<RawFrame> {
        if !self.open.load(Ordering::Acquire) {
            return None;
        }
        // Older frames are dropped, like a real reader that only keeps the latest.
        let mut queues = self.queues.lock();
        queues.get_mut(&self.modality)?.drain(..).last()
    }
}
