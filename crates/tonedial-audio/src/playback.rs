use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::output::OutputBackend;
use crate::pcm::PcmAudio;

/// Shared playback counters, readable from any thread (e.g. the status
/// pane). `current_rate` is 0 while the device is closed.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    pub current_rate: AtomicU32,
    pub reconfigurations: AtomicU64,
    pub clips_played: AtomicU64,
    pub clips_dropped: AtomicU64,
}

impl PlaybackStats {
    pub fn snapshot(&self) -> PlaybackSnapshot {
        let rate = self.current_rate.load(Ordering::Relaxed);
        PlaybackSnapshot {
            rate: (rate != 0).then_some(rate),
            reconfigurations: self.reconfigurations.load(Ordering::Relaxed),
            clips_played: self.clips_played.load(Ordering::Relaxed),
            clips_dropped: self.clips_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub rate: Option<u32>,
    pub reconfigurations: u64,
    pub clips_played: u64,
    pub clips_dropped: u64,
}

/// Keeps the output device configured at the rate of the most recent
/// accepted request. Owns the device exclusively; every open/close goes
/// through here, so `rate` can never go stale while the backend is open.
pub struct PlaybackEngine<B: OutputBackend> {
    backend: B,
    rate: Option<u32>,
    stats: Arc<PlaybackStats>,
}

impl<B: OutputBackend> PlaybackEngine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_stats(backend, Arc::new(PlaybackStats::default()))
    }

    pub fn with_stats(backend: B, stats: Arc<PlaybackStats>) -> Self {
        Self {
            backend,
            rate: None,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<PlaybackStats> {
        Arc::clone(&self.stats)
    }

    pub fn current_rate(&self) -> Option<u32> {
        self.rate
    }

    /// Make the device ready at `rate`. Already open at that rate is the
    /// common case and does nothing. A mismatch releases the old
    /// configuration before the new one is opened; the OS grants only one
    /// at a time. Open failure leaves the device unconfigured and returns
    /// false, never panics.
    pub fn ensure_device(&mut self, rate: u32) -> bool {
        if rate == 0 {
            return false;
        }
        if self.backend.is_open() && self.rate == Some(rate) {
            return true;
        }
        if self.backend.is_open() {
            self.backend.close();
        }
        self.rate = None;
        self.stats.current_rate.store(0, Ordering::Relaxed);

        match self.backend.open(rate) {
            Ok(()) => {
                self.rate = Some(rate);
                self.stats.current_rate.store(rate, Ordering::Relaxed);
                self.stats.reconfigurations.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!(rate, error = %e, "Failed to open output device");
                false
            }
        }
    }

    /// Fire-and-forget playback. Malformed buffers are dropped before any
    /// device work; a device that cannot be configured drops the one
    /// request and the caller's next attempt starts fresh.
    pub fn submit(&mut self, audio: &PcmAudio) {
        if let Err(e) = audio.validate() {
            tracing::debug!(error = %e, "Dropping malformed playback request");
            self.stats.clips_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if !self.ensure_device(audio.sample_rate) {
            tracing::warn!(
                rate = audio.sample_rate,
                "Output device unavailable, playback request dropped"
            );
            self.stats.clips_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.backend.play(audio.to_samples()) {
            Ok(()) => {
                self.stats.clips_played.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Playback failed");
                self.stats.clips_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Release the device. Idempotent; also the shutdown path.
    pub fn close(&mut self) {
        if self.backend.is_open() {
            self.backend.close();
        }
        self.rate = None;
        self.stats.current_rate.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tonedial_foundation::AudioError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Open(u32),
        Close,
        Play(usize),
    }

    /// Records every backend call so tests can assert exact reconfiguration
    /// and playback sequences.
    #[derive(Default)]
    struct FakeBackend {
        open: bool,
        fail_opens_remaining: u32,
        calls: Rc<RefCell<Vec<Call>>>,
    }

    impl FakeBackend {
        fn new() -> (Self, Rc<RefCell<Vec<Call>>>) {
            let backend = Self::default();
            let calls = Rc::clone(&backend.calls);
            (backend, calls)
        }
    }

    impl OutputBackend for FakeBackend {
        fn open(&mut self, rate: u32) -> Result<(), AudioError> {
            assert!(!self.open, "open while already open");
            self.calls.borrow_mut().push(Call::Open(rate));
            if self.fail_opens_remaining > 0 {
                self.fail_opens_remaining -= 1;
                return Err(AudioError::RateNotSupported { rate });
            }
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            assert!(self.open, "close while closed");
            self.open = false;
            self.calls.borrow_mut().push(Call::Close);
        }

        fn play(&mut self, samples: Vec<i16>) -> Result<(), AudioError> {
            if !self.open {
                return Err(AudioError::DeviceClosed);
            }
            self.calls.borrow_mut().push(Call::Play(samples.len()));
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn clip(rate: u32, bytes: usize) -> PcmAudio {
        PcmAudio::new(rate, vec![0; bytes])
    }

    #[test]
    fn first_request_configures_device_and_plays() {
        // Scenario A: start at 8000, one 100-byte clip
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        engine.submit(&clip(8000, 100));

        assert_eq!(*calls.borrow(), vec![Call::Open(8000), Call::Play(50)]);
        assert_eq!(engine.current_rate(), Some(8000));
        let snap = engine.stats().snapshot();
        assert_eq!(snap.reconfigurations, 1);
        assert_eq!(snap.clips_played, 1);
        assert_eq!(snap.rate, Some(8000));
    }

    #[test]
    fn rate_change_closes_then_reopens() {
        // Scenario B: 8000 then 16000
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        engine.submit(&clip(8000, 100));
        engine.submit(&clip(16000, 50));

        assert_eq!(
            *calls.borrow(),
            vec![
                Call::Open(8000),
                Call::Play(50),
                Call::Close,
                Call::Open(16000),
                Call::Play(25),
            ]
        );
        assert_eq!(engine.current_rate(), Some(16000));
        assert_eq!(engine.stats().snapshot().reconfigurations, 2);
    }

    #[test]
    fn malformed_buffers_touch_nothing() {
        // Scenario C plus the rest of the malformed matrix
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        engine.submit(&clip(8000, 5)); // odd length
        engine.submit(&clip(8000, 0)); // empty
        engine.submit(&clip(0, 100)); // zero rate

        assert!(calls.borrow().is_empty());
        assert_eq!(engine.current_rate(), None);
        let snap = engine.stats().snapshot();
        assert_eq!(snap.clips_dropped, 3);
        assert_eq!(snap.reconfigurations, 0);
    }

    #[test]
    fn equal_rate_requests_reconfigure_only_once() {
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        for _ in 0..5 {
            engine.submit(&clip(8000, 20));
        }

        let opens = calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Open(_)))
            .count();
        assert_eq!(opens, 1);
        assert_eq!(engine.stats().snapshot().clips_played, 5);
    }

    #[test]
    fn reconfiguration_happens_exactly_at_rate_changes() {
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        let rates = [8000, 8000, 16000, 16000, 16000, 8000];
        for r in rates {
            engine.submit(&clip(r, 4));
        }

        let opens: Vec<_> = calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Open(r) => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(opens, vec![8000, 16000, 8000]);
    }

    #[test]
    fn ensure_device_is_idempotent() {
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        assert!(engine.ensure_device(8000));
        let after_first = calls.borrow().clone();
        assert!(engine.ensure_device(8000));
        assert_eq!(*calls.borrow(), after_first);
        assert_eq!(engine.current_rate(), Some(8000));
    }

    #[test]
    fn ensure_device_rejects_zero_rate() {
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        assert!(!engine.ensure_device(0));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn open_failure_drops_request_and_recovers() {
        let (mut backend, calls) = FakeBackend::new();
        backend.fail_opens_remaining = 1;
        let mut engine = PlaybackEngine::new(backend);

        engine.submit(&clip(8000, 10));
        assert_eq!(engine.current_rate(), None);
        assert_eq!(engine.stats().snapshot().clips_dropped, 1);

        // Next request retries the open and succeeds
        engine.submit(&clip(8000, 10));
        assert_eq!(engine.current_rate(), Some(8000));
        assert_eq!(
            *calls.borrow(),
            vec![Call::Open(8000), Call::Open(8000), Call::Play(5)]
        );
    }

    #[test]
    fn failed_reconfiguration_does_not_leave_stale_rate() {
        let (backend, _calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        engine.submit(&clip(8000, 10));
        // Force the next open to fail while a rate change is pending
        engine.backend.fail_opens_remaining = 1;
        engine.submit(&clip(16000, 10));

        // Old configuration was released, new one failed: unconfigured
        assert_eq!(engine.current_rate(), None);
        assert!(!engine.backend.is_open());
        assert_eq!(engine.stats().snapshot().rate, None);
    }

    #[test]
    fn close_is_idempotent_and_releases_once() {
        let (backend, calls) = FakeBackend::new();
        let mut engine = PlaybackEngine::new(backend);

        engine.submit(&clip(8000, 10));
        engine.close();
        engine.close();

        let closes = calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Close))
            .count();
        assert_eq!(closes, 1);
        assert_eq!(engine.current_rate(), None);
    }
}
