//! Per-layer liveness and bitrate tracking.
//!
//! Each spatial layer gets a [`StreamTracker`] observing packet arrivals.
//! The [`StreamTrackerManager`] evaluates all trackers on a fixed cycle,
//! lights a layer up after sustained arrivals, dims it after an idle gap,
//! and reports distinct availability sets exactly once through a serial
//! callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::StreamTrackerConfig;
use crate::types::{Bitrates, TrackInfo, MAX_SPATIAL_LAYER, MAX_TEMPORAL_LAYER};

pub type AvailableLayersChangedCallback = Box<dyn Fn(&[i32], &[i32]) + Send + Sync>;
pub type BitrateAvailabilityChangedCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerStatus {
    Stopped,
    Active,
}

#[derive(Debug)]
struct TrackerState {
    status: TrackerStatus,
    qualifying_cycles: u32,
    idle_cycles: u32,
    bitrates: [i64; MAX_TEMPORAL_LAYER as usize + 1],
}

/// Arrival observer for one spatial layer.
pub struct StreamTracker {
    layer: i32,
    config: StreamTrackerConfig,
    packets_in_cycle: AtomicU32,
    bytes_in_window: [AtomicU64; MAX_TEMPORAL_LAYER as usize + 1],
    state: Mutex<TrackerState>,
}

impl StreamTracker {
    fn new(layer: i32, config: StreamTrackerConfig) -> Self {
        Self {
            layer,
            config,
            packets_in_cycle: AtomicU32::new(0),
            bytes_in_window: Default::default(),
            state: Mutex::new(TrackerState {
                status: TrackerStatus::Stopped,
                qualifying_cycles: 0,
                idle_cycles: 0,
                bitrates: [0; MAX_TEMPORAL_LAYER as usize + 1],
            }),
        }
    }

    #[must_use]
    pub fn layer(&self) -> i32 {
        self.layer
    }

    /// Record one packet arrival on this layer.
    pub fn observe(
        &self,
        temporal: i32,
        raw_len: usize,
        _payload_len: usize,
        _marker: bool,
        _ts: u32,
    ) {
        self.packets_in_cycle.fetch_add(1, Ordering::Relaxed);
        let t = temporal.clamp(0, MAX_TEMPORAL_LAYER) as usize;
        self.bytes_in_window[t].fetch_add(raw_len as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().status == TrackerStatus::Active
    }

    fn bitrates(&self) -> [i64; MAX_TEMPORAL_LAYER as usize + 1] {
        self.state.lock().bitrates
    }

    /// Close one evaluation cycle. Returns the new status on a transition.
    fn evaluate_cycle(&self, paused: bool) -> Option<TrackerStatus> {
        if paused {
            // transitions are frozen while paused, observations keep piling up
            return None;
        }

        let packets = self.packets_in_cycle.swap(0, Ordering::AcqRel);
        let mut state = self.state.lock();
        if packets >= self.config.samples_required {
            state.qualifying_cycles += 1;
            state.idle_cycles = 0;
        } else {
            state.qualifying_cycles = 0;
            state.idle_cycles += 1;
        }

        match state.status {
            TrackerStatus::Stopped if state.qualifying_cycles >= self.config.cycles_required => {
                state.status = TrackerStatus::Active;
                Some(TrackerStatus::Active)
            }
            TrackerStatus::Active if state.idle_cycles >= self.config.dim_cycles => {
                state.status = TrackerStatus::Stopped;
                Some(TrackerStatus::Stopped)
            }
            _ => None,
        }
    }

    /// Fold the byte window into per-temporal bitrates. Returns true when
    /// the layer flipped between producing and not producing bits.
    fn evaluate_bitrate(&self, elapsed: Duration) -> bool {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let mut state = self.state.lock();
        let had_bits = state.bitrates.iter().any(|&b| b > 0);
        for (t, bytes) in self.bytes_in_window.iter().enumerate() {
            let bits = bytes.swap(0, Ordering::AcqRel) * 8;
            state.bitrates[t] = (bits as f64 / secs) as i64;
        }
        let has_bits = state.bitrates.iter().any(|&b| b > 0);
        had_bits != has_bits
    }
}

struct ManagerCallbacks {
    available_layers_changed: Option<AvailableLayersChangedCallback>,
    bitrate_availability_changed: Option<BitrateAvailabilityChangedCallback>,
}

/// Owns the per-layer trackers for one published track.
pub struct StreamTrackerManager {
    track_info: TrackInfo,
    config: StreamTrackerConfig,
    trackers: RwLock<HashMap<i32, Arc<StreamTracker>>>,
    paused: AtomicBool,
    max_expected_layer: AtomicI32,
    last_reported: Mutex<(Vec<i32>, Vec<i32>)>,
    callbacks: Mutex<ManagerCallbacks>,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamTrackerManager {
    #[must_use]
    pub fn new(track_info: TrackInfo, config: StreamTrackerConfig) -> Arc<Self> {
        let max_declared = track_info
            .layers
            .iter()
            .map(|l| l.quality.spatial_layer())
            .max()
            .unwrap_or(MAX_SPATIAL_LAYER);

        Arc::new(Self {
            track_info,
            config,
            trackers: RwLock::new(HashMap::new()),
            paused: AtomicBool::new(false),
            max_expected_layer: AtomicI32::new(max_declared),
            last_reported: Mutex::new((Vec::new(), Vec::new())),
            callbacks: Mutex::new(ManagerCallbacks {
                available_layers_changed: None,
                bitrate_availability_changed: None,
            }),
            stopped: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn on_available_layers_changed(&self, cb: AvailableLayersChangedCallback) {
        self.callbacks.lock().available_layers_changed = Some(cb);
    }

    pub fn on_bitrate_availability_changed(&self, cb: BitrateAvailabilityChangedCallback) {
        self.callbacks.lock().bitrate_availability_changed = Some(cb);
    }

    /// Spawn the evaluation task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let manager = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            let cycle = manager.config.cycle_duration;
            let bitrate_every = (manager.config.bitrate_report_interval.as_nanos()
                / cycle.as_nanos().max(1))
            .max(1) as u64;
            let mut ticker = tokio::time::interval(cycle);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut ticks: u64 = 0;

            loop {
                ticker.tick().await;
                if manager.stopped.load(Ordering::Acquire) {
                    return;
                }
                manager.evaluate_cycle();
                ticks += 1;
                if ticks % bitrate_every == 0 {
                    manager.evaluate_bitrate(cycle * bitrate_every as u32);
                }
            }
        }));
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }

    pub fn add_tracker(&self, layer: i32) -> Arc<StreamTracker> {
        let mut trackers = self.trackers.write();
        let tracker = trackers
            .entry(layer)
            .or_insert_with(|| {
                debug!(layer, "adding stream tracker");
                Arc::new(StreamTracker::new(layer, self.config))
            })
            .clone();
        tracker
    }

    #[must_use]
    pub fn get_tracker(&self, layer: i32) -> Option<Arc<StreamTracker>> {
        self.trackers.read().get(&layer).cloned()
    }

    pub fn remove_tracker(&self, layer: i32) {
        self.trackers.write().remove(&layer);
    }

    pub fn remove_all_trackers(&self) {
        self.trackers.write().clear();
    }

    /// Freeze layer transitions, e.g. while the publisher is muted.
    /// Observations continue so stats and bitrates stay warm.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_max_expected_spatial_layer(&self, layer: i32) {
        self.max_expected_layer.store(layer, Ordering::Release);
    }

    #[must_use]
    pub fn max_expected_layer(&self) -> i32 {
        self.max_expected_layer.load(Ordering::Acquire)
    }

    /// Layers currently deliverable, and layers expected but excused from
    /// signaling (dimmed while the track is paused).
    #[must_use]
    pub fn available_layers(&self) -> (Vec<i32>, Vec<i32>) {
        let paused = self.is_paused();
        let max_expected = self.max_expected_layer();
        let trackers = self.trackers.read();

        let mut available = Vec::new();
        let mut exempted = Vec::new();
        for (&layer, tracker) in trackers.iter() {
            if tracker.is_active() {
                available.push(layer);
            } else if paused && layer <= max_expected {
                exempted.push(layer);
            }
        }
        available.sort_unstable();
        exempted.sort_unstable();
        (available, exempted)
    }

    /// 0 when the highest available layer matches the expected maximum.
    #[must_use]
    pub fn distance_to_desired(&self) -> i32 {
        let max_expected = self.max_expected_layer();
        let (available, _) = self.available_layers();
        match available.last() {
            Some(&highest) => (max_expected - highest).max(0),
            None => max_expected + 1,
        }
    }

    #[must_use]
    pub fn layered_bitrate(&self) -> Bitrates {
        let mut bitrates = Bitrates::default();
        let trackers = self.trackers.read();
        for (&layer, tracker) in trackers.iter() {
            if (0..=MAX_SPATIAL_LAYER).contains(&layer) {
                bitrates[layer as usize] = tracker.bitrates();
            }
        }
        bitrates
    }

    #[must_use]
    pub fn layer_dimension(&self, layer: i32) -> (u32, u32) {
        self.track_info.layer_dimension(layer)
    }

    /// Run one availability evaluation over all trackers; fires the layer
    /// callback when the (available, exempted) pair differs from the last
    /// reported one. Driven by the worker task; callable directly in tests.
    pub fn evaluate_cycle(&self) {
        let paused = self.is_paused();
        let trackers: Vec<Arc<StreamTracker>> = self.trackers.read().values().cloned().collect();
        let mut any_transition = false;
        for tracker in &trackers {
            if let Some(status) = tracker.evaluate_cycle(paused) {
                debug!(layer = tracker.layer(), ?status, "layer status changed");
                any_transition = true;
            }
        }

        if !any_transition {
            return;
        }

        let current = self.available_layers();
        let mut last = self.last_reported.lock();
        if *last == current {
            return;
        }
        *last = current.clone();
        drop(last);

        let callbacks = self.callbacks.lock();
        if let Some(cb) = callbacks.available_layers_changed.as_ref() {
            cb(&current.0, &current.1);
        }
    }

    /// Fold bitrate windows; fires the bitrate callback when any layer
    /// flipped between producing and not producing bits.
    pub fn evaluate_bitrate(&self, elapsed: Duration) {
        let trackers: Vec<Arc<StreamTracker>> = self.trackers.read().values().cloned().collect();
        let mut changed = false;
        for tracker in &trackers {
            changed |= tracker.evaluate_bitrate(elapsed);
        }

        if !changed {
            return;
        }

        let callbacks = self.callbacks.lock();
        if let Some(cb) = callbacks.bitrate_availability_changed.as_ref() {
            cb();
        }
    }
}

impl Drop for StreamTrackerManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}
