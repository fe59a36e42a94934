//! Background maintenance thread.
//!
//! Every period the worker re-reads the configuration file (hot reload) and
//! runs one [`Monitor::run_maintenance`] cycle. It waits on a stop channel
//! between cycles, so stopping never has to wait for a full period.

use crate::monitor::Monitor;
use crate::telemetry::unix_now;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to the running maintenance thread.
pub struct MaintenanceWorker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceWorker {
    /// Start the worker thread.
    pub fn spawn(monitor: Arc<Monitor>, period: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("line-monitor-maintenance".to_string())
            .spawn(move || {
                tracing::debug!(period_secs = period.as_secs(), "maintenance worker started");
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => run_cycle(&monitor),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("maintenance worker stopped");
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to finish its current cycle.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("maintenance worker panicked");
            }
        }
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_cycle(monitor: &Monitor) {
    if let Err(e) = monitor.reload_config() {
        tracing::warn!(error = %e, "config reload failed, keeping current settings");
    }
    monitor.run_maintenance(unix_now());
}
