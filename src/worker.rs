use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender};
use tracing::{debug, warn};

use crate::dns::Resolver;
use crate::labels::{extract_labels, LabelKeys};
use crate::metrics::Metrics;
use crate::models::domain::DecodedPacket;

/// Immutable per-worker copy of the labelling configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub label_keys: LabelKeys,
    pub resolve_dns: bool,
}

/// Two-phase stop protocol: a rendezvous request followed by an
/// acknowledgment. The acknowledgment slot is buffered so a worker never
/// blocks on it, even when the pool has already given up waiting.
struct StopSignal {
    request: Sender<()>,
    ack: Receiver<()>,
}

/// Worker side of [`StopSignal`].
struct StopHandle {
    request: Receiver<()>,
    ack: Sender<()>,
}

fn stop_signal() -> (StopSignal, StopHandle) {
    let (request_tx, request_rx) = bounded(0);
    let (ack_tx, ack_rx) = bounded(1);
    (
        StopSignal {
            request: request_tx,
            ack: ack_rx,
        },
        StopHandle {
            request: request_rx,
            ack: ack_tx,
        },
    )
}

/// Handle to one consumer thread of the pool.
pub struct Worker {
    id: usize,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a worker draining `packets`.
    pub fn spawn(
        id: usize,
        packets: Receiver<DecodedPacket>,
        config: WorkerConfig,
        resolver: Option<Arc<Resolver>>,
        metrics: Arc<Metrics>,
    ) -> io::Result<Self> {
        let (stop, stop_handle) = stop_signal();
        let runner = Runner {
            id,
            packets,
            stop: stop_handle,
            config,
            resolver,
            metrics,
        };
        let handle = thread::Builder::new()
            .name(format!("packet-worker-{id}"))
            .spawn(move || runner.run())?;

        Ok(Self {
            id,
            stop,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Asks the worker to stop and waits for its acknowledgment, each phase
    /// bounded by `timeout`. Returns false when either phase times out; the
    /// worker is then left to exit on its own. An acknowledged worker is only
    /// joined if its thread has already finished, otherwise it is detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        match self.stop.request.send_timeout((), timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(())) => {
                warn!(worker = self.id, "abandoning worker, stop request not accepted");
                return false;
            }
            Err(SendTimeoutError::Disconnected(())) => {
                warn!(worker = self.id, "abandoning worker, already exited");
                return false;
            }
        }

        if self.stop.ack.recv_timeout(timeout).is_err() {
            warn!(worker = self.id, "abandoning worker, stop not acknowledged");
            return false;
        }

        if let Some(handle) = self.handle.take() {
            if handle.is_finished() && handle.join().is_err() {
                warn!(worker = self.id, "worker panicked while stopping");
            }
        }
        true
    }
}

struct Runner {
    id: usize,
    packets: Receiver<DecodedPacket>,
    stop: StopHandle,
    config: WorkerConfig,
    resolver: Option<Arc<Resolver>>,
    metrics: Arc<Metrics>,
}

impl Runner {
    fn run(self) {
        debug!(worker = self.id, "worker started");

        loop {
            select! {
                recv(self.stop.request) -> _ => break,
                recv(self.packets) -> msg => match msg {
                    Ok(packet) => self.handle_packet(&packet),
                    Err(_) => {
                        debug!(worker = self.id, "packet queue closed, waiting for stop");
                        let _ = self.stop.request.recv();
                        break;
                    }
                },
            }
            self.metrics.set_buffer_len(self.packets.len());
        }

        let _ = self.stop.ack.try_send(());
        debug!(worker = self.id, "worker stopped");
    }

    fn handle_packet(&self, packet: &DecodedPacket) {
        let resolver = if self.config.resolve_dns {
            self.resolver.as_deref()
        } else {
            None
        };
        let labels = extract_labels(packet, &self.config.label_keys, resolver);
        self.metrics.add_bytes(&labels, packet.length as f64);
    }
}
