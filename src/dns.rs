use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;

/// How often the whole cache is thrown away.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Reverse (PTR) lookup of an address.
pub trait ReverseLookup: Send + Sync {
    fn lookup(&self, addr: &str) -> io::Result<Vec<String>>;
}

/// Lookups through the operating system resolver.
pub struct SystemLookup;

impl ReverseLookup for SystemLookup {
    fn lookup(&self, addr: &str) -> io::Result<Vec<String>> {
        let ip: IpAddr = addr
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let name = dns_lookup::lookup_addr(&ip)?;
        Ok(vec![name])
    }
}

/// Memoizing reverse resolver shared by all workers.
///
/// The lock only guards the map; lookups themselves run unlocked, so two
/// workers missing on the same address may both query it. Failed or empty
/// lookups cache the address itself.
pub struct Resolver {
    cache: Arc<Mutex<HashMap<String, String>>>,
    lookup: Arc<dyn ReverseLookup>,
    metrics: Arc<Metrics>,
    flusher: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn ReverseLookup>, metrics: Arc<Metrics>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(HashMap::new())),
            lookup,
            metrics,
            flusher: Mutex::new(None),
        }
    }

    /// Starts the background task clearing the cache every `interval`.
    /// Calling it again while running is a no-op.
    pub fn start(&self, interval: Duration) -> io::Result<()> {
        let mut flusher = self.flusher.lock();
        if flusher.is_some() {
            return Ok(());
        }

        let (close_tx, close_rx) = bounded::<()>(1);
        let cache = Arc::clone(&self.cache);
        let handle = thread::Builder::new()
            .name("dns-cache-flush".to_string())
            .spawn(move || loop {
                match close_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let mut cache = cache.lock();
                        debug!(entries = cache.len(), "flushing dns cache");
                        cache.clear();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        *flusher = Some((close_tx, handle));
        info!(interval = ?interval, "dns cache flusher started");
        Ok(())
    }

    /// Resolves `addr` to its first name, falling back to `addr` itself.
    pub fn resolve(&self, addr: &str) -> String {
        if let Some(name) = self.cache.lock().get(addr) {
            return name.clone();
        }

        let start = Instant::now();
        let result = self.lookup.lookup(addr);
        self.metrics.add_dns_duration(start.elapsed());

        let name = match result {
            Ok(names) => names
                .into_iter()
                .find(|name| !name.is_empty())
                .unwrap_or_else(|| addr.to_string()),
            Err(e) => {
                debug!(addr, error = %e, "reverse lookup failed");
                addr.to_string()
            }
        };

        self.cache.lock().insert(addr.to_string(), name.clone());
        name
    }

    /// Drops every cached name.
    pub fn reset(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the flush task and waits for it to exit.
    pub fn shutdown(&self) {
        let Some((close_tx, handle)) = self.flusher.lock().take() else {
            return;
        };
        let _ = close_tx.send(());
        if handle.join().is_err() {
            warn!("dns cache flusher panicked");
        }
        info!("dns cache flusher stopped");
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
