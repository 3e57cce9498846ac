//! Reachability of the classification endpoint.
//!
//! A background thread TCP-connects to the endpoint's host and port on a
//! fixed interval and reports transitions only. It never touches an
//! in-flight submission; the pipeline uses the last reported value to gate
//! new ticks.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

/// Granularity at which the probe thread notices shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Resolve the endpoint and try each address until one accepts.
pub fn probe_once(endpoint: &Url, timeout: Duration) -> bool {
    let addrs: Vec<SocketAddr> = match endpoint.socket_addrs(|| None) {
        Ok(addrs) => addrs,
        Err(err) => {
            log::debug!("connectivity: cannot resolve {}: {}", endpoint, err);
            return false;
        }
    };
    addrs
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, timeout).is_ok())
}

/// Remembers the last reachability result and reports changes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectivityTracker {
    last: Option<bool>,
}

impl ConnectivityTracker {
    /// Returns `Some(online)` when `online` differs from the previous
    /// observation. The first observation counts as a change.
    pub fn observe(&mut self, online: bool) -> Option<bool> {
        if self.last == Some(online) {
            return None;
        }
        self.last = Some(online);
        Some(online)
    }

    pub fn last(&self) -> Option<bool> {
        self.last
    }
}

/// Handle to the probe thread. Dropping it stops the thread.
pub struct ConnectivityProbe {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ConnectivityProbe {
    /// Start probing `endpoint` every `interval`, calling `on_change` with
    /// each transition (including the first result).
    pub fn spawn<F>(
        endpoint: &str,
        interval: Duration,
        timeout: Duration,
        mut on_change: F,
    ) -> Result<Self>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let url = Url::parse(endpoint).with_context(|| format!("parse endpoint {}", endpoint))?;
        if url.host_str().is_none() {
            return Err(anyhow!("endpoint {} has no host to probe", endpoint));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("hue-watch-probe".to_string())
            .spawn(move || {
                let mut tracker = ConnectivityTracker::default();
                while !shutdown_thread.load(Ordering::SeqCst) {
                    let online = probe_once(&url, timeout);
                    if let Some(online) = tracker.observe(online) {
                        log::info!(
                            "connectivity: {} is {}",
                            url,
                            if online { "reachable" } else { "unreachable" }
                        );
                        on_change(online);
                    }
                    let wake = Instant::now() + interval;
                    while Instant::now() < wake && !shutdown_thread.load(Ordering::SeqCst) {
                        std::thread::sleep(SHUTDOWN_POLL.min(interval));
                    }
                }
            })
            .context("spawn connectivity probe")?;
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("connectivity probe thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ConnectivityProbe {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_and_join() {
            log::warn!("{}", err);
        }
    }
}
