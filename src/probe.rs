//! Memory observation: per-space byte accounting and process RSS sampling
//!
//! [`MemTracker`] counts live/peak bytes in one logical memory space (the
//! host staging area, or a device). It is the signal the loading strategies
//! are judged by, but never a control input.
//!
//! [`RssSampler`] polls resident-set size from `/proc/self/status` on a
//! background thread. It is read-only instrumentation with its own
//! start/stop lifecycle and is joined before its peak is reported.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared current/peak byte counter for one memory space
///
/// Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct MemTracker {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MemTracker {
    /// Create a tracker with zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation of `bytes` in this space
    pub fn record_alloc(&self, bytes: usize) {
        let now = self.current.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    /// Record a release of `bytes` from this space
    pub fn record_free(&self, bytes: usize) {
        self.current.fetch_sub(bytes, Ordering::SeqCst);
    }

    /// Bytes currently live in this space
    #[must_use]
    pub fn current_bytes(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Maximum simultaneous live bytes since the last reset
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Reset the peak to the current live size
    pub fn reset_peak(&self) {
        self.peak
            .store(self.current.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// RAII guard accounting a transient host buffer against a tracker
///
/// Records the allocation on creation and the release on drop, so a staging
/// buffer's accounting window matches its lifetime exactly.
#[derive(Debug)]
pub struct StageGuard {
    tracker: MemTracker,
    bytes: usize,
}

impl StageGuard {
    /// Account `bytes` of staging against `tracker` until dropped
    #[must_use]
    pub fn new(tracker: &MemTracker, bytes: usize) -> Self {
        tracker.record_alloc(bytes);
        Self {
            tracker: tracker.clone(),
            bytes,
        }
    }

    /// Size of the staged buffer
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        self.tracker.record_free(self.bytes);
    }
}

/// Current resident-set size in kilobytes, if the platform exposes it
///
/// Parses `VmRSS` from `/proc/self/status`; returns `None` elsewhere.
#[must_use]
pub fn current_rss_kb() -> Option<u64> {
    read_status_kb("VmRSS:")
}

/// Process high-water resident-set size in kilobytes, if available
///
/// Parses `VmHWM` from `/proc/self/status`. Note this is a whole-process
/// high-water mark the kernel never resets; use [`RssSampler`] to observe a
/// bounded window.
#[must_use]
pub fn peak_rss_kb() -> Option<u64> {
    read_status_kb("VmHWM:")
}

fn read_status_kb(field: &str) -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with(field))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Background RSS poller
///
/// Samples `VmRSS` at a fixed interval on its own thread, keeping the
/// maximum observed value. The thread never touches loader state.
#[derive(Debug)]
pub struct RssSampler {
    stop: Arc<AtomicBool>,
    peak_kb: Arc<AtomicUsize>,
    handle: thread::JoinHandle<()>,
}

impl RssSampler {
    /// Start sampling at `interval`
    ///
    /// Takes one synchronous sample before returning so a zero-length window
    /// still reports a baseline.
    #[must_use]
    pub fn start(interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let peak_kb = Arc::new(AtomicUsize::new(0));

        if let Some(kb) = current_rss_kb() {
            peak_kb.store(kb as usize, Ordering::SeqCst);
        }

        let thread_stop = Arc::clone(&stop);
        let thread_peak = Arc::clone(&peak_kb);
        let handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                if let Some(kb) = current_rss_kb() {
                    thread_peak.fetch_max(kb as usize, Ordering::SeqCst);
                }
                thread::sleep(interval);
            }
        });

        Self {
            stop,
            peak_kb,
            handle,
        }
    }

    /// Stop the sampler, join its thread, and return the peak RSS observed
    /// over the window in kilobytes (`None` if RSS is unavailable)
    #[must_use]
    pub fn stop(self) -> Option<u64> {
        self.stop.store(true, Ordering::SeqCst);
        // Join before reporting so the final sample is included.
        let _ = self.handle.join();
        let kb = self.peak_kb.load(Ordering::SeqCst);
        if kb == 0 {
            None
        } else {
            Some(kb as u64)
        }
    }
}
