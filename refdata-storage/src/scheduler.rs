//! Background refresh loop.
//!
//! Explicit `check_and_refresh()` calls stay the primary mechanism; the
//! refresher just makes them on a timer from its own thread.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use refdata_core::RefDataResult;
use tracing::{debug, info, warn};

use crate::cache::{CacheRegistry, RefreshSummary};
use crate::executor::CancellationToken;

/// Handle to a running refresh thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct PeriodicRefresher {
    token: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl PeriodicRefresher {
    /// Run `tick` every `interval` until stopped.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() -> RefDataResult<RefreshSummary> + Send + 'static,
    {
        let token = CancellationToken::new();
        let stop = token.clone();
        let label = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("refdata-refresh-{name}"))
            .spawn(move || {
                info!(refresher = %label, interval_ms = interval.as_millis() as u64, "Refresher started");
                let mut ticks = 0u64;
                while !stop.wait_timeout(interval) {
                    ticks += 1;
                    match tick() {
                        Ok(summary) => debug!(
                            refresher = %label,
                            refreshed = summary.refreshed,
                            checked = summary.checked,
                            "Refresh tick"
                        ),
                        Err(err) => warn!(refresher = %label, error = %err, "Refresh tick failed"),
                    }
                }
                info!(refresher = %label, ticks, "Refresher stopped");
                ticks
            })?;

        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    /// Refresh a registry shared through `Arc` or a `&'static` global.
    pub fn for_registry<R>(registry: R, interval: Duration) -> std::io::Result<Self>
    where
        R: AsRef<CacheRegistry> + Send + 'static,
    {
        Self::spawn("registry", interval, move || {
            registry.as_ref().check_and_refresh()
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it. Returns the number of ticks run.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.token.cancel();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(ticks)) => ticks,
            Some(Err(_)) => {
                warn!("Refresher thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for PeriodicRefresher {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}
