use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use crate::labels::{LabelKey, LabelKeys};
use crate::models::domain::{ESCAPE_ADDRESS, ESCAPE_PORT};
use crate::models::dto::OptionsDTO;
use crate::sniff::CaptureOptions;
use crate::worker::WorkerConfig;

const NOTE: &str = "Note:
- If 'l-sa' or 'l-da' is used but no address can be determined, '-1.-1.-1.-1' is set as label value.
- If 'l-sp' or 'l-dp' is used but no port can be determined, '-1' is set as label value.
- If any protocol label is used but no protocol can be determined, '' is set as label value.";

/// Captures packets on an interface and exports byte counts as Prometheus metrics.
#[derive(Debug, Parser)]
#[command(name = "pcap-exporter", version, about, after_long_help = NOTE)]
pub struct Cli {
    /// Interface name to listen to. 'any' listens to all.
    #[arg(short = 'i', default_value = "any")]
    pub device: String,

    /// pcap filter. See: http://www.tcpdump.org/manpages/pcap-filter.7.html
    #[arg(short = 'f', default_value = "")]
    pub filter: String,

    /// Number of bytes max to read per packet.
    #[arg(short = 's', default_value_t = 65536)]
    pub snaplen: i32,

    /// The address for the exporter.
    #[arg(long, default_value = ":9999")]
    pub listen_address: String,

    /// Use promiscuous mode.
    #[arg(short = 'p')]
    pub promiscuous: bool,

    /// Resolve ip addresses with their DNS names.
    #[arg(short = 'r')]
    pub resolve: bool,

    /// Seconds between full flushes of the DNS cache.
    #[arg(long, default_value_t = 600)]
    pub dns_flush_interval: u64,

    /// Prints available interfaces and quits.
    #[arg(long)]
    pub list_interfaces: bool,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Add SourceAddress to labels.
    #[arg(long = "l-sa", action = ArgAction::Set, default_value_t = true)]
    pub label_source_address: bool,

    /// Add SourcePort to labels.
    #[arg(long = "l-sp")]
    pub label_source_port: bool,

    /// Add DestinationAddress to labels.
    #[arg(long = "l-da", action = ArgAction::Set, default_value_t = true)]
    pub label_destination_address: bool,

    /// Add DestinationPort to labels.
    #[arg(long = "l-dp")]
    pub label_destination_port: bool,

    /// Add LinkProtocol to labels.
    #[arg(long = "l-lp")]
    pub label_link_protocol: bool,

    /// Add NetworkProtocol to labels.
    #[arg(long = "l-np")]
    pub label_network_protocol: bool,

    /// Add TransportProtocol to labels.
    #[arg(long = "l-tp")]
    pub label_transport_protocol: bool,

    /// Add ApplicationProtocol to labels.
    #[arg(long = "l-ap")]
    pub label_application_protocol: bool,
}

impl Cli {
    pub fn label_keys(&self) -> LabelKeys {
        let toggles = [
            (self.label_source_address, LabelKey::SourceAddress),
            (self.label_source_port, LabelKey::SourcePort),
            (self.label_destination_address, LabelKey::DestinationAddress),
            (self.label_destination_port, LabelKey::DestinationPort),
            (self.label_link_protocol, LabelKey::LinkProtocol),
            (self.label_network_protocol, LabelKey::NetworkProtocol),
            (self.label_transport_protocol, LabelKey::TransportProtocol),
            (self.label_application_protocol, LabelKey::ApplicationProtocol),
        ];
        LabelKeys::new(
            toggles
                .into_iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, key)| key),
        )
    }

    pub fn options(&self) -> Options {
        Options {
            label_keys: self.label_keys(),
            resolve_dns: self.resolve,
            device: self.device.clone(),
            filter: self.filter.clone(),
            snaplen: self.snaplen,
            promiscuous: self.promiscuous,
        }
    }

    pub fn dns_flush_interval(&self) -> Duration {
        Duration::from_secs(self.dns_flush_interval.max(1))
    }

    /// Listen address, with the `:port` shorthand meaning all interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_address(&self.listen_address)
    }
}

pub fn parse_listen_address(addr: &str) -> Result<SocketAddr> {
    let bind_addr = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    bind_addr
        .parse()
        .with_context(|| format!("invalid listen address: {addr}"))
}

/// Settings fixed for the lifetime of the capture pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub label_keys: LabelKeys,
    pub resolve_dns: bool,
    pub device: String,
    pub filter: String,
    pub snaplen: i32,
    pub promiscuous: bool,
}

impl Options {
    pub fn capture(&self) -> CaptureOptions {
        CaptureOptions {
            device: self.device.clone(),
            filter: self.filter.clone(),
            snaplen: self.snaplen,
            promiscuous: self.promiscuous,
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            label_keys: self.label_keys.clone(),
            resolve_dns: self.resolve_dns,
        }
    }

    pub fn to_dto(&self) -> OptionsDTO {
        OptionsDTO {
            labels: self
                .label_keys
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
            resolve_dns: self.resolve_dns,
            device: self.device.clone(),
            filter: self.filter.clone(),
            snaplen: self.snaplen,
            promiscuous: self.promiscuous,
        }
    }

    pub fn to_html(&self) -> String {
        format!("<html><body><pre>\n{self}\n</pre></body></html>")
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Labels:")?;
        for key in self.label_keys.iter() {
            writeln!(f, "{key}")?;
        }
        writeln!(f)?;
        writeln!(f, "ResolveDNS: {}", self.resolve_dns)?;
        writeln!(f, "Device: {}", self.device)?;
        writeln!(f, "Filter: {}", self.filter)?;
        writeln!(f, "Snaplen: {}", self.snaplen)?;
        writeln!(f, "Promiscuous: {}", self.promiscuous)?;
        writeln!(f, "EscapeAddress: {ESCAPE_ADDRESS}")?;
        write!(f, "EscapePort: {ESCAPE_PORT}")
    }
}
