//! Cooperative shutdown.
//!
//! The capture loop polls a [`ShutdownSignal`] between iterations. The first request asks
//! for a graceful stop (finish the current frame, then exit). Any further request while
//! that one is pending escalates to a forced stop: the loop abandons the frame in flight
//! at its next checkpoint.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownRequest {
    Graceful,
    Forced,
}

#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    requests: Arc<AtomicU32>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shutdown request and report how it escalates.
    pub fn request(&self) -> ShutdownRequest {
        let previous = self.requests.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            ShutdownRequest::Graceful
        } else {
            ShutdownRequest::Forced
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requests.load(Ordering::SeqCst) > 0
    }

    pub fn is_forced(&self) -> bool {
        self.requests.load(Ordering::SeqCst) > 1
    }

    /// Route SIGINT and SIGTERM into this signal. Only one handler may be installed per
    /// process.
    pub fn install_handler(&self) -> Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || match signal.request() {
            ShutdownRequest::Graceful => {
                log::warn!("termination signal received, stopping after the current frame")
            }
            ShutdownRequest::Forced => {
                log::warn!("second termination signal received, forcing shutdown")
            }
        })
        .context("install termination signal handler")
    }
}
