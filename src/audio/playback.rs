//! Gapless playback scheduling
//!
//! `PlaybackClock` keeps the "next start" cursor; `SourceRegistry` owns the
//! sources that are still playing so an interruption can silence them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::device::SourceHandle;

/// Cursor of the next free start time on the output device
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    next_start: f64,
}

impl PlaybackClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { next_start: 0.0 }
    }

    /// Reserve `duration` seconds of playback
    ///
    /// Returns the start time, `max(now, cursor)`, and advances the cursor
    /// to the end of the reserved span.
    pub fn reserve(&mut self, now: f64, duration: f64) -> f64 {
        let start = now.max(self.next_start);
        self.next_start = start + duration.max(0.0);
        start
    }

    /// Forget any queued time so the next chunk starts immediately
    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }

    #[must_use]
    pub const fn cursor(&self) -> f64 {
        self.next_start
    }
}

#[derive(Default)]
struct Sources {
    active: HashMap<u64, Box<dyn SourceHandle>>,
    /// Ids that ended before they were registered
    ended_early: Vec<u64>,
}

/// Registry of sources that have not finished or been stopped
#[derive(Clone, Default)]
pub struct SourceRegistry {
    inner: Arc<Mutex<Sources>>,
    next_id: Arc<AtomicU64>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the id for a source about to be started
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a started source
    ///
    /// A source that already completed is dropped instead of registered.
    pub fn add(&self, id: u64, handle: Box<dyn SourceHandle>) {
        let Ok(mut sources) = self.inner.lock() else {
            return;
        };

        if let Some(pos) = sources.ended_early.iter().position(|d| *d == id) {
            sources.ended_early.swap_remove(pos);
            return;
        }

        if handle.is_finished() {
            return;
        }

        sources.active.insert(id, handle);
    }

    /// Callback that removes source `id` once it ends naturally
    #[must_use]
    pub fn remove_on_complete(&self, id: u64) -> Box<dyn FnOnce() + Send> {
        let registry = self.clone();
        Box::new(move || registry.complete(id))
    }

    fn complete(&self, id: u64) {
        if let Ok(mut sources) = self.inner.lock() {
            if sources.active.remove(&id).is_none() {
                sources.ended_early.push(id);
            }
        }
    }

    /// Stop and discard every active source
    ///
    /// Returns how many sources were registered. Stop failures are ignored.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(u64, Box<dyn SourceHandle>)> = self
            .inner
            .lock()
            .map(|mut sources| {
                sources.ended_early.clear();
                sources.active.drain().collect()
            })
            .unwrap_or_default();

        for (id, handle) in &drained {
            if let Err(e) = handle.stop() {
                tracing::trace!(source = id, error = %e, "source already stopped");
            }
        }

        drained.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|s| s.active.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("active", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::{Error, Result};

    struct StubSource {
        stopped: Arc<AtomicBool>,
        finished: bool,
    }

    impl SourceHandle for StubSource {
        fn stop(&self) -> Result<()> {
            if self.stopped.swap(true, Ordering::SeqCst) || self.finished {
                return Err(Error::Audio("already stopped".to_string()));
            }
            Ok(())
        }

        fn is_finished(&self) -> bool {
            self.finished
        }
    }

    fn stub() -> (Box<dyn SourceHandle>, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let source = StubSource {
            stopped: Arc::clone(&stopped),
            finished: false,
        };
        (Box::new(source), stopped)
    }

    #[test]
    fn clock_chains_back_to_back() {
        let mut clock = PlaybackClock::new();

        assert!((clock.reserve(0.5, 1.0) - 0.5).abs() < f64::EPSILON);
        assert!((clock.reserve(0.6, 0.25) - 1.5).abs() < f64::EPSILON);
        assert!((clock.reserve(0.7, 0.25) - 1.75).abs() < f64::EPSILON);
        assert!((clock.cursor() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clock_jumps_to_device_time_after_underrun() {
        let mut clock = PlaybackClock::new();
        clock.reserve(0.0, 0.5);

        // Device clock has run past the queued audio
        assert!((clock.reserve(3.0, 0.5) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clock_starts_are_non_decreasing() {
        let mut clock = PlaybackClock::new();
        let mut previous_end = 0.0;
        let mut now = 0.0;

        for i in 0..50 {
            let duration = f64::from(i % 7) * 0.03 + 0.01;
            now += 0.02;
            let start = clock.reserve(now, duration);
            assert!(start >= previous_end);
            previous_end = start + duration;
        }
    }

    #[test]
    fn clock_reset_returns_to_zero() {
        let mut clock = PlaybackClock::new();
        clock.reserve(1.0, 4.0);
        clock.reset();

        assert!(clock.cursor().abs() < f64::EPSILON);
        assert!((clock.reserve(2.0, 1.0) - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stop_all_stops_every_source() {
        let registry = SourceRegistry::new();
        let mut flags = Vec::new();

        for _ in 0..3 {
            let (source, stopped) = stub();
            registry.add(registry.next_id(), source);
            flags.push(stopped);
        }

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.stop_all(), 3);
        assert!(registry.is_empty());
        assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
    }

    #[test]
    fn stop_all_swallows_stop_errors() {
        let registry = SourceRegistry::new();
        let (source, stopped) = stub();
        stopped.store(true, Ordering::SeqCst);
        registry.add(registry.next_id(), source);

        assert_eq!(registry.stop_all(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.stop_all(), 0);
    }

    #[test]
    fn completion_removes_source() {
        let registry = SourceRegistry::new();
        let id = registry.next_id();
        let (source, _) = stub();
        let on_ended = registry.remove_on_complete(id);

        registry.add(id, source);
        assert_eq!(registry.len(), 1);

        on_ended();
        assert!(registry.is_empty());
    }

    #[test]
    fn completion_before_add_is_not_registered() {
        let registry = SourceRegistry::new();
        let id = registry.next_id();
        let on_ended = registry.remove_on_complete(id);
        on_ended();

        let (source, _) = stub();
        registry.add(id, source);
        assert!(registry.is_empty());
    }

    #[test]
    fn finished_source_is_not_registered() {
        let registry = SourceRegistry::new();
        let source = StubSource {
            stopped: Arc::new(AtomicBool::new(false)),
            finished: true,
        };

        registry.add(registry.next_id(), Box::new(source));
        assert!(registry.is_empty());
    }
}
