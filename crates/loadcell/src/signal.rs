//! Cooperative stop flag for [`Engine::run`](crate::Engine::run).

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

/// Shared flag that ends a run between two cycles.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.0
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Stop once a line is read from `input`.
    ///
    /// End of input is not a request to stop: a closed or redirected stdin
    /// leaves the flag alone.
    pub fn on_line<R: BufRead + Send + 'static>(&self, mut input: R) -> JoinHandle<()> {
        let signal = self.clone();

        thread::spawn(move || {
            let mut line = String::new();

            match input.read_line(&mut line) {
                Ok(n) if n > 0 => {
                    info!("stop requested");
                    signal.stop();
                }
                Ok(_) => debug!("input closed; run continues"),
                Err(err) => warn!("cannot read stop request: {err}"),
            }
        })
    }

    /// Stop after `duration`.
    pub fn after(&self, duration: Duration) -> JoinHandle<()> {
        let signal = self.clone();

        thread::spawn(move || {
            thread::sleep(duration);
            signal.stop();
        })
    }
}
