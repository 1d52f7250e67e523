//! Loop pacing and cooperative shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::Notify;

/// Shared stop flag, checked once per tick
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the signal has been triggered
    pub async fn wait(&self) {
        while !self.is_triggered() {
            let notified = self.notify.notified();
            if self.is_triggered() {
                break;
            }
            notified.await;
        }
    }

    /// Spawn a task that trips the signal on Ctrl+C or SIGTERM
    pub fn install_handlers(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            wait_for_os_signal().await;
            info!("Shutdown signal received, finishing current tick");
            signal.trigger();
        });
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!("Ctrl+C handler failed: {}", e);
                    }
                }
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Ctrl+C handler failed: {}", e);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler failed: {}", e);
    }
}

/// Sleep between loop iterations
#[async_trait]
pub trait TickSource: Send {
    async fn sleep(&mut self, duration: Duration);
}

/// Wall-clock ticks; a shutdown request cuts the current sleep short
pub struct IntervalTicks {
    shutdown: ShutdownSignal,
}

impl IntervalTicks {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self { shutdown }
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn sleep(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.wait() => {}
        }
    }
}

pub mod mock {
    use super::*;

    /// Returns immediately and records each requested sleep. Trips the
    /// shutdown signal after `stop_after` sleeps.
    pub struct ManualTicks {
        pub sleeps: Vec<Duration>,
        stop_after: usize,
        shutdown: ShutdownSignal,
    }

    impl ManualTicks {
        pub fn new(stop_after: usize, shutdown: ShutdownSignal) -> Self {
            Self {
                sleeps: Vec::new(),
                stop_after,
                shutdown,
            }
        }
    }

    #[async_trait]
    impl TickSource for ManualTicks {
        async fn sleep(&mut self, duration: Duration) {
            self.sleeps.push(duration);
            if self.sleeps.len() >= self.stop_after {
                self.shutdown.trigger();
            }
        }
    }
}
