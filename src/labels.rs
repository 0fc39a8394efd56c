use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::dns::Resolver;
use crate::models::domain::{DecodedPacket, Endpoint, Layer, ESCAPE_ADDRESS, ESCAPE_PORT};

/// Key -> value mapping a packet's bytes are aggregated under.
pub type LabelSet = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelKey {
    SourceAddress,
    SourcePort,
    DestinationAddress,
    DestinationPort,
    LinkProtocol,
    NetworkProtocol,
    TransportProtocol,
    ApplicationProtocol,
}

impl LabelKey {
    pub const ALL: [LabelKey; 8] = [
        LabelKey::SourceAddress,
        LabelKey::SourcePort,
        LabelKey::DestinationAddress,
        LabelKey::DestinationPort,
        LabelKey::LinkProtocol,
        LabelKey::NetworkProtocol,
        LabelKey::TransportProtocol,
        LabelKey::ApplicationProtocol,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LabelKey::SourceAddress => "SourceAddress",
            LabelKey::SourcePort => "SourcePort",
            LabelKey::DestinationAddress => "DestinationAddress",
            LabelKey::DestinationPort => "DestinationPort",
            LabelKey::LinkProtocol => "LinkProtocol",
            LabelKey::NetworkProtocol => "NetworkProtocol",
            LabelKey::TransportProtocol => "TransportProtocol",
            LabelKey::ApplicationProtocol => "ApplicationProtocol",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The active label keys, fixed for the lifetime of a pool.
///
/// Always sorted by name and free of duplicates, so two configurations that
/// request the same keys in a different order produce the same dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelKeys(Vec<LabelKey>);

impl LabelKeys {
    pub fn new(keys: impl IntoIterator<Item = LabelKey>) -> Self {
        let mut keys: Vec<LabelKey> = keys.into_iter().collect();
        keys.sort_by_key(|key| key.as_str());
        keys.dedup();
        LabelKeys(keys)
    }

    /// Builds the key set from names. Unknown names are logged and dropped.
    pub fn parse<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(names.into_iter().filter_map(|name| {
            let key = LabelKey::from_name(name);
            if key.is_none() {
                warn!(key = name, "got unknown label key, skipping");
            }
            key
        }))
    }

    pub fn iter(&self) -> impl Iterator<Item = LabelKey> + '_ {
        self.0.iter().copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(LabelKey::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Builds the label set for one packet.
///
/// Addresses go through `resolver` when one is given. Ports are never
/// resolved. Missing layers render as the escape values (addresses, ports) or
/// the empty string (protocols).
pub fn extract_labels(
    packet: &DecodedPacket,
    keys: &LabelKeys,
    resolver: Option<&Resolver>,
) -> LabelSet {
    let addresses = packet.addresses();
    let ports = packet.ports();

    let mut labels = LabelSet::with_capacity(keys.len());
    for key in keys.iter() {
        let value = match key {
            LabelKey::SourceAddress => print_address(&addresses.src, resolver),
            LabelKey::DestinationAddress => print_address(&addresses.dst, resolver),
            LabelKey::SourcePort => print_port(&ports.src),
            LabelKey::DestinationPort => print_port(&ports.dst),
            LabelKey::LinkProtocol => print_protocol(packet.link),
            LabelKey::NetworkProtocol => print_protocol(packet.network),
            LabelKey::TransportProtocol => print_protocol(packet.transport),
            LabelKey::ApplicationProtocol => print_protocol(packet.application),
        };
        labels.insert(key.as_str().to_string(), value);
    }
    labels
}

fn print_address(endpoint: &Endpoint, resolver: Option<&Resolver>) -> String {
    match (endpoint, resolver) {
        (Endpoint::Absent, _) => ESCAPE_ADDRESS.to_string(),
        (Endpoint::Present(addr), Some(resolver)) => resolver.resolve(addr),
        (Endpoint::Present(addr), None) => addr.clone(),
    }
}

fn print_port(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Absent => ESCAPE_PORT.to_string(),
        Endpoint::Present(port) => port.clone(),
    }
}

fn print_protocol(layer: Option<Layer>) -> String {
    layer.map(|layer| layer.name.to_string()).unwrap_or_default()
}
