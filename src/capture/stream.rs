//! Per-modality acquisition stream
//!
//! Every open stream owns one worker thread that polls its reader and decodes
//! new frames into the back half of a [`DoubleBuffer`]. The owning thread
//! publishes them with [`Stream::update`], which swaps the buffers. Both sides
//! go through the same per-stream lock:
//!
//! ```text
//!   worker thread                         owning thread
//!   ─────────────                         ─────────────
//!   lock ─ acquire_latest ─ decode(back)   Device::update   (timestamps)
//!        └ pending = true ─ unlock         Stream::update   lock ─ swap ─ unlock
//!                                          Stream::pixels   lock ─ read(front)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use super::device::Device;
use super::frame::{Frame, Modality, PixelFormat};
use crate::error::{DecodeError, SensorError, StreamError};
use crate::pipeline::DoubleBuffer;
use crate::sensor::{RawFrame, ReaderHandle, Sensor};
use crate::CONFIG;

/// Modality-specific half of a stream: opens its resources and decodes raw
/// frames into the stream's pixel type.
pub trait StreamKind: Default + Send + 'static {
    const MODALITY: Modality;

    /// Consumer-visible buffer type
    type Pixels: Default + Send + 'static;

    /// Grab modality-specific resources and pre-size the buffers. Runs on the
    /// owning thread before the worker starts.
    fn prepare(
        &mut self,
        _sensor: &dyn Sensor,
        _pixels: &mut DoubleBuffer<Self::Pixels>,
    ) -> Result<(), SensorError> {
        Ok(())
    }

    /// Decode `frame` into `back`.
    ///
    /// Implementations validate the frame before writing, so an `Err` leaves
    /// `back` as it was.
    fn decode(&mut self, frame: &RawFrame, back: &mut Self::Pixels) -> Result<PixelFormat, DecodeError>;

    /// Release what `prepare` acquired.
    fn release(&mut self) {}
}

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unconfigured,
    Configured,
    Open,
    Closed,
}

/// Counters for one setup..close cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub polls: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub swaps: u64,
}

#[derive(Default)]
struct Stats {
    polls: AtomicU64,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
    swaps: AtomicU64,
}

/// Everything guarded by the stream lock
struct Guarded<K: StreamKind> {
    frame: Frame,
    reader: Option<ReaderHandle>,
    kind: K,
    pixels: DoubleBuffer<K::Pixels>,
}

pub(crate) struct Shared<K: StreamKind> {
    guarded: Mutex<Guarded<K>>,
    running: AtomicBool,
    /// Producer side: timestamp of the last decoded frame
    device_timestamp: AtomicU64,
    /// Consumer side: timestamp seen at the last device tick
    consumer_timestamp: AtomicU64,
    frame_new: AtomicBool,
    pending: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: CachePadded<Stats>,
}

/// Hooks the device drives on every registered stream
pub(crate) trait StreamControl: Send + Sync {
    fn modality(&self) -> Modality;
    fn refresh_novelty(&self);
    fn close(&self);
}

impl<K: StreamKind> Shared<K> {
    fn new() -> Self {
        Self {
            guarded: Mutex::new(Guarded {
                frame: Frame::new(K::MODALITY),
                reader: None,
                kind: K::default(),
                pixels: DoubleBuffer::default(),
            }),
            running: AtomicBool::new(false),
            device_timestamp: AtomicU64::new(0),
            consumer_timestamp: AtomicU64::new(0),
            frame_new: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            worker: Mutex::new(None),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn is_open(&self) -> bool {
        self.guarded.lock().reader.is_some()
    }

    /// One poll of the reader. Caller holds the lock.
    fn read_frame(&self, guarded: &mut Guarded<K>) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        let Some(reader) = guarded.reader.as_mut() else {
            warn!(modality = %K::MODALITY, "Stream is not open.");
            return false;
        };

        self.stats.polls.fetch_add(1, Ordering::Relaxed);
        let Some(raw) = reader.acquire_latest() else {
            return false;
        };

        let start = Instant::now();
        let format = match guarded.kind.decode(&raw, guarded.pixels.back_mut()) {
            Ok(format) => format,
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(modality = %K::MODALITY, "Dropping frame: {}", e);
                return false;
            }
        };

        let description = raw.description;
        let frame = &mut guarded.frame;
        frame.timestamp = raw.relative_time;
        frame.frame_index += 1;
        frame.width = description.width;
        frame.height = description.height;
        frame.field_of_view = description.field_of_view;
        frame.stride = description.width * format.bytes_per_pixel();
        frame.data_size = description.pixel_count() * format.bytes_per_pixel() as usize;
        frame.mode.pixel_format = format;
        frame.mode.resolution_x = description.width;
        frame.mode.resolution_y = description.height;

        self.device_timestamp.store(raw.relative_time, Ordering::Release);
        self.pending.store(true, Ordering::Release);
        self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);

        metrics::counter!("kinect2_frames_acquired", "modality" => K::MODALITY.as_str()).increment(1);
        metrics::histogram!("kinect2_decode_time_us", "modality" => K::MODALITY.as_str())
            .record(start.elapsed().as_micros() as f64);

        debug!(
            modality = %K::MODALITY,
            timestamp = raw.relative_time,
            index = frame.frame_index,
            "Decoded frame"
        );
        true
    }
}

impl<K: StreamKind> StreamControl for Shared<K> {
    fn modality(&self) -> Modality {
        K::MODALITY
    }

    fn refresh_novelty(&self) {
        let produced = self.device_timestamp.load(Ordering::Acquire);
        let seen = self.consumer_timestamp.swap(produced, Ordering::AcqRel);
        self.frame_new.store(produced != seen, Ordering::Release);
    }

    fn close(&self) {
        self.running.store(false, Ordering::Release);

        let reader = {
            let mut guarded = self.guarded.lock();
            guarded.frame.clear();
            guarded.kind.release();
            guarded.reader.take()
        };

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!(modality = %K::MODALITY, "Acquisition worker panicked");
            }
        }

        if reader.is_some() {
            info!(modality = %K::MODALITY, "Stream closed");
        }
    }
}

fn acquisition_loop<K: StreamKind>(shared: Arc<Shared<K>>, idle_sleep: Duration) {
    let backoff = Backoff::new();

    while shared.running.load(Ordering::Acquire) {
        let acquired = {
            let mut guarded = shared.guarded.lock();
            shared.read_frame(&mut guarded)
        };

        if acquired {
            backoff.reset();
        } else if backoff.is_completed() {
            thread::sleep(idle_sleep);
        } else {
            backoff.snooze();
        }
    }

    debug!(modality = %K::MODALITY, "Acquisition worker exiting");
}

/// Acquisition stream for one modality.
///
/// `setup` registers the stream with a [`Device`], `open` starts the worker,
/// `close` stops it. Dropping an open stream closes it.
pub struct Stream<K: StreamKind> {
    shared: Arc<Shared<K>>,
    sensor: Option<Weak<dyn Sensor>>,
    state: StreamState,
}

impl<K: StreamKind> Default for Stream<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StreamKind> Stream<K> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            sensor: None,
            state: StreamState::Unconfigured,
        }
    }

    /// Bind the stream to an open device and register it for device ticks.
    /// Counters and frame metadata start from scratch.
    #[instrument(skip_all, fields(modality = %K::MODALITY))]
    pub fn setup(&mut self, device: &mut Device) -> Result<(), StreamError> {
        if self.is_open() {
            return Err(StreamError::AlreadyOpen);
        }
        let Some(sensor) = device.sensor().filter(|_| device.is_open()) else {
            warn!("No ready sensor found.");
            return Err(StreamError::DeviceNotOpen);
        };

        // Drop the previous cycle's shared state; its registry entry dies with it.
        self.shared.close();
        self.shared = Arc::new(Shared::new());
        self.sensor = Some(Arc::downgrade(sensor));

        let control: Arc<dyn StreamControl> = self.shared.clone();
        device.register(Arc::downgrade(&control));

        self.state = StreamState::Configured;
        debug!("Stream configured");
        Ok(())
    }

    /// Open the modality reader and start the acquisition worker.
    #[instrument(skip_all, fields(modality = %K::MODALITY))]
    pub fn open(&mut self) -> Result<(), StreamError> {
        match self.state() {
            StreamState::Configured => {}
            StreamState::Open => return Err(StreamError::AlreadyOpen),
            StreamState::Unconfigured | StreamState::Closed => return Err(StreamError::NotConfigured),
        }

        let sensor = self
            .sensor
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(StreamError::DeviceGone)?;
        if !sensor.is_open() {
            warn!("No ready sensor found.");
            return Err(StreamError::DeviceNotOpen);
        }

        let reader_error = |source: SensorError| {
            warn!("Can't open stream: {}", source);
            StreamError::ReaderOpen {
                modality: K::MODALITY,
                source,
            }
        };

        let reader = sensor.open_reader(K::MODALITY).map_err(reader_error)?;
        if reader.modality() != K::MODALITY {
            return Err(reader_error(SensorError::SourceUnavailable(K::MODALITY)));
        }

        {
            let mut guarded = self.shared.guarded.lock();
            let Guarded { kind, pixels, frame, .. } = &mut *guarded;
            kind.prepare(&*sensor, pixels).map_err(reader_error)?;
            if let Some(description) = sensor.frame_description(K::MODALITY) {
                frame.width = description.width;
                frame.height = description.height;
                frame.field_of_view = description.field_of_view;
                frame.mode.resolution_x = description.width;
                frame.mode.resolution_y = description.height;
            }
            guarded.reader = Some(reader);
        }

        let idle_sleep = Duration::from_micros(CONFIG.load().acquisition.idle_sleep_us);
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("kinect2-{}", K::MODALITY))
            .spawn(move || acquisition_loop(shared, idle_sleep));

        match spawned {
            Ok(handle) => {
                *self.shared.worker.lock() = Some(handle);
            }
            Err(e) => {
                self.shared.close();
                warn!("Failed to start acquisition worker: {}", e);
                return Err(StreamError::Spawn(e));
            }
        }

        self.state = StreamState::Open;
        info!("Stream opened on {}", sensor.name());
        Ok(())
    }

    /// Stop the worker and release the reader. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.shared.close();
        if self.state == StreamState::Open {
            self.state = StreamState::Closed;
        }
    }

    /// Publish the most recently decoded frame to readers. Returns `true` when
    /// the front buffer changed.
    pub fn update(&self) -> bool {
        if !self.shared.pending.load(Ordering::Acquire) {
            return false;
        }

        let mut guarded = self.shared.guarded.lock();
        if !self.shared.pending.swap(false, Ordering::AcqRel) {
            return false;
        }
        guarded.pixels.swap();
        self.shared.stats.swaps.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn state(&self) -> StreamState {
        match self.state {
            // The device may have closed us underneath.
            StreamState::Open if !self.shared.is_open() => StreamState::Closed,
            state => state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    #[inline]
    pub fn modality(&self) -> Modality {
        K::MODALITY
    }

    /// Whether the last device tick saw a new frame
    #[inline]
    pub fn is_frame_new(&self) -> bool {
        self.shared.frame_new.load(Ordering::Acquire)
    }

    /// Device timestamp of the last decoded frame
    #[inline]
    pub fn frame_timestamp(&self) -> u64 {
        self.shared.device_timestamp.load(Ordering::Acquire)
    }

    /// A decoded frame is waiting for `update`
    #[inline]
    pub fn texture_needs_update(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn frame(&self) -> Frame {
        self.shared.guarded.lock().frame.clone()
    }

    pub fn width(&self) -> u32 {
        self.shared.guarded.lock().frame.width
    }

    pub fn height(&self) -> u32 {
        self.shared.guarded.lock().frame.height
    }

    pub fn stats(&self) -> StreamStats {
        let stats = &self.shared.stats;
        StreamStats {
            polls: stats.polls.load(Ordering::Relaxed),
            frames_decoded: stats.frames_decoded.load(Ordering::Relaxed),
            decode_errors: stats.decode_errors.load(Ordering::Relaxed),
            swaps: stats.swaps.load(Ordering::Relaxed),
        }
    }

    /// Front buffer. Holds the stream lock until dropped, so keep it short.
    pub fn pixels(&self) -> MappedMutexGuard<'_, K::Pixels> {
        MutexGuard::map(self.shared.guarded.lock(), |guarded| guarded.pixels.front_mut())
    }

    pub(crate) fn kind(&self) -> MappedMutexGuard<'_, K> {
        MutexGuard::map(self.shared.guarded.lock(), |guarded| &mut guarded.kind)
    }
}

impl<K: StreamKind> Drop for Stream<K> {
    fn drop(&mut self) {
        self.shared.close();
    }
}
