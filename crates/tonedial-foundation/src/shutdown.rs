use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cooperative stop signal shared between the input/output loop, the
/// playback thread owner, and the Ctrl-C hook. `trigger` is idempotent;
/// observers poll `is_triggered` at their own iteration boundary.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
        }
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Wait until the flag trips. Returns immediately if already tripped.
    pub async fn wait(&self) {
        while !self.is_triggered() {
            self.notify.notified().await;
        }
    }
}

/// Installs a Ctrl-C handler that trips the given flag.
pub struct ShutdownHandler {
    flag: ShutdownFlag,
}

impl ShutdownHandler {
    pub fn new(flag: ShutdownFlag) -> Self {
        Self { flag }
    }

    pub fn install(self) -> ShutdownFlag {
        let flag = self.flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.trigger();
            }
        });
        self.flag
    }
}
