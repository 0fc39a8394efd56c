use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use pcap_exporter::config::Cli;
use pcap_exporter::dns::{Resolver, SystemLookup};
use pcap_exporter::listener::{Listener, ListenerConfig};
use pcap_exporter::metrics::Metrics;
use pcap_exporter::server::MetricsServer;
use pcap_exporter::sniff::{self, LiveCapture};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    fmt().with_env_filter(filter).with_target(true).init();

    if cli.list_interfaces {
        eprint!("Available interfaces:\n\n{}", sniff::list_interfaces()?);
        return Ok(());
    }

    let options = cli.options();
    if options.label_keys.is_empty() {
        warn!("no label keys enabled, all traffic is counted under a single series");
    }
    let listen_addr = cli.listen_addr()?;

    // Everything that can fail at startup happens before any worker exists.
    let metrics = Arc::new(Metrics::new(&options.label_keys).context("creating metrics")?);
    let capture = LiveCapture::open(&options.capture())?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let server = rt.block_on(async {
        MetricsServer::start(listen_addr, Arc::clone(&metrics), options.clone())
    })?;

    let resolver = Arc::new(Resolver::new(Arc::new(SystemLookup), Arc::clone(&metrics)));
    resolver
        .start(cli.dns_flush_interval())
        .context("starting dns cache flusher")?;

    let mut listener = Listener::start(
        ListenerConfig::default(),
        options.worker(),
        Some(Arc::clone(&resolver)),
        Arc::clone(&metrics),
    )?;

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("registering signal handler")?;

    let feeder = listener.feeder();
    let (done_tx, done_rx) = bounded::<Result<()>>(1);
    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let _ = done_tx.send(feeder.run(capture));
        })
        .context("spawning capture thread")?;

    info!(device = %options.device, "started pcap listener");

    let outcome = select! {
        recv(shutdown_rx) -> _ => {
            info!("received shutdown signal, quitting now...");
            Ok(())
        },
        recv(done_rx) -> result => match result {
            Ok(Err(e)) => {
                error!(error = %format!("{e:#}"), "capture failed");
                Err(e)
            }
            _ => {
                info!("capture finished");
                Ok(())
            }
        },
    };

    listener.stop();
    resolver.shutdown();
    rt.block_on(server.stop());
    rt.shutdown_timeout(Duration::from_secs(1));

    info!("pcap-exporter stopped");
    outcome
}
