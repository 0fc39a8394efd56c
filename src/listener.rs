use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info, warn};

use crate::dns::Resolver;
use crate::metrics::Metrics;
use crate::models::domain::DecodedPacket;
use crate::worker::{Worker, WorkerConfig};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(200);

/// Sequential feed of decoded packets.
pub trait PacketSource {
    /// Blocks for the next packet. `Ok(None)` means the feed has ended.
    fn next_packet(&mut self) -> Result<Option<DecodedPacket>>;
}

impl<I> PacketSource for I
where
    I: Iterator<Item = DecodedPacket>,
{
    fn next_packet(&mut self) -> Result<Option<DecodedPacket>> {
        Ok(self.next())
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub stop_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Fixed-size worker pool behind one bounded packet queue.
pub struct Listener {
    workers: Vec<Worker>,
    queue: Sender<DecodedPacket>,
    metrics: Arc<Metrics>,
    stop_timeout: Duration,
}

impl Listener {
    /// Allocates the queue and spawns every worker. If any worker fails to
    /// spawn, the ones already running are stopped and an error returned.
    pub fn start(
        config: ListenerConfig,
        worker_config: WorkerConfig,
        resolver: Option<Arc<Resolver>>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let (queue, packets) = bounded(config.queue_capacity);

        let mut listener = Self {
            workers: Vec::with_capacity(config.workers),
            queue,
            metrics: Arc::clone(&metrics),
            stop_timeout: config.stop_timeout,
        };

        for id in 0..config.workers.max(1) {
            let spawned = Worker::spawn(
                id,
                packets.clone(),
                worker_config.clone(),
                resolver.clone(),
                Arc::clone(&metrics),
            );
            match spawned {
                Ok(worker) => listener.workers.push(worker),
                Err(e) => {
                    listener.stop();
                    return Err(e).with_context(|| format!("spawning packet worker {id}"));
                }
            }
        }

        info!(
            workers = listener.workers.len(),
            queue_capacity = config.queue_capacity,
            "started packet workers",
        );
        Ok(listener)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Producer half of the queue, to be driven on the capture thread.
    pub fn feeder(&self) -> Feeder {
        Feeder {
            queue: self.queue.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Stops every worker in turn, returning whether each acknowledged.
    /// Workers that time out are abandoned, never killed.
    pub fn stop(&mut self) -> Vec<bool> {
        let results: Vec<bool> = self
            .workers
            .iter_mut()
            .map(|worker| worker.stop(self.stop_timeout))
            .collect();

        let stopped = results.iter().filter(|ok| **ok).count();
        if stopped == results.len() {
            info!(workers = stopped, "stopped packet workers");
        } else {
            warn!(
                stopped,
                abandoned = results.len() - stopped,
                "some packet workers did not stop cleanly",
            );
        }
        results
    }
}

/// Moves packets from a [`PacketSource`] into the pool's queue.
pub struct Feeder {
    queue: Sender<DecodedPacket>,
    metrics: Arc<Metrics>,
}

impl Feeder {
    /// Runs until the source ends, fails, or every worker is gone. Enqueueing
    /// blocks while the queue is full, so slow workers throttle the source
    /// instead of packets being dropped.
    pub fn run<S: PacketSource>(self, mut source: S) -> Result<()> {
        debug!("started packet feeder");
        loop {
            let packet = match source.next_packet().context("reading from capture")? {
                Some(packet) => packet,
                None => {
                    info!("capture source ended");
                    return Ok(());
                }
            };

            self.metrics.inc_packets_seen();
            if self.queue.send(packet).is_err() {
                debug!("packet queue has no workers left, stopping feeder");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{LabelKey, LabelKeys, LabelSet};
    use crate::models::domain::{Endpoint, Flow};
    use std::time::Instant;

    fn keys() -> LabelKeys {
        LabelKeys::new([LabelKey::DestinationPort])
    }

    fn packet(dst_port: u16, length: usize) -> DecodedPacket {
        DecodedPacket {
            transport_flow: Some(Flow::new(Endpoint::present(5000), Endpoint::present(dst_port))),
            length,
            ..Default::default()
        }
    }

    fn listener(workers: usize, metrics: &Arc<Metrics>) -> Listener {
        Listener::start(
            ListenerConfig {
                workers,
                queue_capacity: 8,
                stop_timeout: DEFAULT_STOP_TIMEOUT,
            },
            WorkerConfig {
                label_keys: keys(),
                resolve_dns: false,
            },
            None,
            Arc::clone(metrics),
        )
        .unwrap()
    }

    fn port_labels(port: &str) -> LabelSet {
        [("DestinationPort".to_string(), port.to_string())].into()
    }

    #[test]
    fn test_default_config() {
        let config = ListenerConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.stop_timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_idle_pool_stops_cleanly() {
        let metrics = Arc::new(Metrics::new(&keys()).unwrap());
        let mut pool = listener(4, &metrics);
        assert_eq!(pool.worker_count(), 4);

        let start = Instant::now();
        let results = pool.stop();
        assert_eq!(results, vec![true; 4]);
        assert!(start.elapsed() < DEFAULT_STOP_TIMEOUT * 4);
    }

    #[test]
    fn test_feeder_counts_and_distributes() {
        let metrics = Arc::new(Metrics::new(&keys()).unwrap());
        let mut pool = listener(3, &metrics);

        let packets: Vec<DecodedPacket> = (0..300)
            .map(|i| if i % 3 == 0 { packet(443, 10) } else { packet(80, 1) })
            .collect();
        pool.feeder().run(packets.into_iter()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while metrics.bytes(&port_labels("443")) + metrics.bytes(&port_labels("80")) < 1200.0
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(metrics.packets_seen.get(), 300.0);
        assert_eq!(metrics.bytes(&port_labels("443")), 1000.0);
        assert_eq!(metrics.bytes(&port_labels("80")), 200.0);
        assert_eq!(pool.stop(), vec![true; 3]);
    }

    #[test]
    fn test_feeder_returns_when_workers_are_gone() {
        let metrics = Arc::new(Metrics::new(&keys()).unwrap());
        let mut pool = listener(2, &metrics);
        let feeder = pool.feeder();
        assert_eq!(pool.stop(), vec![true; 2]);

        // Nothing consumes any more; the feeder must not hang once the
        // queue is disconnected.
        drop(pool);
        let packets = (0..100).map(|_| packet(80, 1));
        feeder.run(packets).unwrap();
    }

    struct FailingSource;

    impl PacketSource for FailingSource {
        fn next_packet(&mut self) -> Result<Option<DecodedPacket>> {
            anyhow::bail!("capture handle closed unexpectedly")
        }
    }

    #[test]
    fn test_feeder_surfaces_source_errors() {
        let metrics = Arc::new(Metrics::new(&keys()).unwrap());
        let mut pool = listener(1, &metrics);

        let err = pool.feeder().run(FailingSource).unwrap_err();
        assert!(format!("{err:#}").contains("capture handle closed"));
        assert_eq!(pool.stop(), vec![true]);
    }
}
