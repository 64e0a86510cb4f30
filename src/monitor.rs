// FILE: src/monitor.rs
use crate::engine::DirectoryScanner;
use crate::error::{IndexerError, Result};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Background worker that runs a scan pass, then waits `interval` before
/// the next one. Stop requests are honored within one sleep step, or at
/// the next entry boundary while a pass is running.
pub struct Monitor {
    scanner: Arc<DirectoryScanner>,
    interval: Duration,
    token: Option<CancellationToken>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl Monitor {
    pub fn new(scanner: Arc<DirectoryScanner>, interval: Duration) -> Self {
        Self { scanner, interval, token: None, thread_handle: None }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::warn!("[Monitor] Already running");
            return Ok(());
        }

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let scanner = Arc::clone(&self.scanner);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("dicom-indexer-monitor".to_string())
            .spawn(move || Self::monitor_loop(scanner, interval, worker_token))
            .map_err(|e| IndexerError::State(format!("Cannot start monitor thread: {}", e)))?;

        tracing::info!("[Monitor] Started for {} folder(s), interval {:?}", self.scanner.roots().len(), interval);
        self.token = Some(token);
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Request a stop and wait for the worker to exit. No-op when idle.
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("[Monitor] Worker thread panicked");
            }
            tracing::info!("[Monitor] Stopped");
        }
    }

    fn monitor_loop(scanner: Arc<DirectoryScanner>, interval: Duration, token: CancellationToken) {
        while !token.is_cancelled() {
            let stats = scanner.scan_pass(&token);
            tracing::debug!("[Monitor] Pass done: {:?}", stats);

            let deadline = Instant::now() + interval;
            while !token.is_cancelled() && Instant::now() < deadline {
                thread::sleep(SLEEP_STEP);
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
