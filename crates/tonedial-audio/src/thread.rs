use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::device::OutputDeviceSelector;
use crate::output::CpalOutput;
use crate::pcm::PcmAudio;
use crate::playback::{PlaybackEngine, PlaybackSnapshot, PlaybackStats};
use tonedial_foundation::AudioError;

/// Commands drained in order by the playback thread. One consumer means the
/// engine sees a strict sequence: reconciliation and playback never race.
enum PlaybackCmd {
    /// Pre-open the device at a rate (loop startup warm-up; failure is fine,
    /// the first real request retries).
    Ensure(u32),
    Submit(PcmAudio),
    Close,
    Shutdown,
}

/// A handle to the dedicated playback thread. cpal streams are pinned to
/// the thread that created them, so the engine lives there and everyone
/// else talks to it through this.
pub struct PlaybackThread {
    handle: JoinHandle<()>,
    tx: Sender<PlaybackCmd>,
}

impl PlaybackThread {
    pub fn spawn(preferred_device: Option<String>) -> Result<(Self, PlaybackHandle), AudioError> {
        // Validate a named device up front so a bad --device fails start();
        // the backend itself is built on the playback thread because cpal
        // streams must live and die there.
        drop(OutputDeviceSelector::new(preferred_device.clone())?);
        let stats = Arc::new(PlaybackStats::default());
        let engine_stats = Arc::clone(&stats);

        let (tx, rx) = crossbeam_channel::unbounded();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let backend = match CpalOutput::new(preferred_device) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::error!("Failed to create output backend: {}", e);
                        return;
                    }
                };
                run(PlaybackEngine::with_stats(backend, engine_stats), rx)
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn playback thread: {}", e)))?;

        let playback = PlaybackHandle {
            tx: tx.clone(),
            stats,
        };
        Ok((Self { handle, tx }, playback))
    }

    /// Stop the thread and wait for the device to be released.
    pub fn stop(self) {
        let _ = self.tx.send(PlaybackCmd::Shutdown);
        let _ = self.handle.join();
    }
}

fn run(mut engine: PlaybackEngine<CpalOutput>, rx: Receiver<PlaybackCmd>) {
    for cmd in rx {
        match cmd {
            PlaybackCmd::Ensure(rate) => {
                if !engine.ensure_device(rate) {
                    tracing::warn!(rate, "Warm-up open failed; will retry on first playback");
                }
            }
            PlaybackCmd::Submit(audio) => engine.submit(&audio),
            PlaybackCmd::Close => engine.close(),
            PlaybackCmd::Shutdown => break,
        }
    }
    engine.close();
    tracing::info!("Playback thread shutting down");
}

/// Cloneable, non-blocking submission side. `play` queues and returns; a
/// dead thread just drops the request (same contract as a failed device).
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: Sender<PlaybackCmd>,
    stats: Arc<PlaybackStats>,
}

impl PlaybackHandle {
    pub fn play(&self, audio: PcmAudio) {
        if self.tx.send(PlaybackCmd::Submit(audio)).is_err() {
            tracing::warn!("Playback thread is gone; request dropped");
        }
    }

    pub fn warm_up(&self, rate: u32) {
        let _ = self.tx.send(PlaybackCmd::Ensure(rate));
    }

    pub fn close_device(&self) {
        let _ = self.tx.send(PlaybackCmd::Close);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.stats.snapshot()
    }
}
