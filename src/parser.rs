// Turns raw captured bytes into the layered view the workers label.
// Only layer identification and flow endpoints are decoded, nothing deeper.

use etherparse::{
    LaxNetSlice, LaxSlicedPacket, LinuxSllProtocolType, LinuxSllSlice, TransportSlice,
};
use tracing::trace;

use crate::models::domain::{DecodedPacket, Endpoint, Flow, Layer};

pub const DLT_EN10MB: i32 = 1;
pub const DLT_RAW: i32 = 12;
pub const LINKTYPE_RAW: i32 = 101;
pub const DLT_LINUX_SLL: i32 = 113;

pub const ETHERNET: Layer = Layer::new("Ethernet");
pub const LINUX_SLL: Layer = Layer::new("Linux SLL");
pub const IPV4: Layer = Layer::new("IPv4");
pub const IPV6: Layer = Layer::new("IPv6");
pub const TCP: Layer = Layer::new("TCP");
pub const UDP: Layer = Layer::new("UDP");
pub const DNS: Layer = Layer::new("DNS");
pub const PAYLOAD: Layer = Layer::new("Payload");

const DNS_PORT: u16 = 53;

/// Link-layer framing of a capture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    LinuxSll,
    RawIp,
    Unknown(i32),
}

impl LinkKind {
    pub fn from_datalink(dlt: i32) -> Self {
        match dlt {
            DLT_EN10MB => LinkKind::Ethernet,
            DLT_LINUX_SLL => LinkKind::LinuxSll,
            DLT_RAW | LINKTYPE_RAW => LinkKind::RawIp,
            other => LinkKind::Unknown(other),
        }
    }

    fn layer(self) -> Option<Layer> {
        match self {
            LinkKind::Ethernet => Some(ETHERNET),
            LinkKind::LinuxSll => Some(LINUX_SLL),
            LinkKind::RawIp | LinkKind::Unknown(_) => None,
        }
    }

    fn header_len(self) -> usize {
        match self {
            LinkKind::Ethernet => 14,
            LinkKind::LinuxSll => 16,
            LinkKind::RawIp | LinkKind::Unknown(_) => 0,
        }
    }
}

/// Decodes one frame. Never fails: bytes that do not parse simply leave the
/// corresponding layers empty, and the byte length is always kept. Frames cut
/// short by the snapshot length still yield every header that was captured.
pub fn decode(link: LinkKind, data: &[u8]) -> DecodedPacket {
    let mut packet = DecodedPacket {
        length: data.len(),
        ..Default::default()
    };

    if let LinkKind::Unknown(_) = link {
        return packet;
    }
    if data.len() < link.header_len() {
        trace!(?link, length = data.len(), "frame shorter than its link header");
        return packet;
    }
    packet.link = link.layer();

    let sliced = match link {
        LinkKind::Ethernet => LaxSlicedPacket::from_ethernet(data).ok(),
        LinkKind::LinuxSll => linux_sll(data),
        LinkKind::RawIp => LaxSlicedPacket::from_ip(data).ok(),
        LinkKind::Unknown(_) => None,
    };
    let Some(sliced) = sliced else {
        trace!(?link, length = data.len(), "no network layer decoded");
        return packet;
    };
    if let Some((err, layer)) = &sliced.stop_err {
        trace!(?err, ?layer, length = data.len(), "frame only partially decoded");
    }

    #[allow(unreachable_patterns)]
    match &sliced.net {
        Some(LaxNetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            packet.network = Some(IPV4);
            packet.network_flow = Some(Flow::new(
                Endpoint::present(header.source_addr()),
                Endpoint::present(header.destination_addr()),
            ));
        }
        Some(LaxNetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            packet.network = Some(IPV6);
            packet.network_flow = Some(Flow::new(
                Endpoint::present(header.source_addr()),
                Endpoint::present(header.destination_addr()),
            ));
        }
        _ => {}
    }

    #[allow(unreachable_patterns)]
    let (transport, ports, payload) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            TCP,
            (tcp.source_port(), tcp.destination_port()),
            tcp.payload(),
        ),
        Some(TransportSlice::Udp(udp)) => (
            UDP,
            (udp.source_port(), udp.destination_port()),
            udp.payload(),
        ),
        _ => return packet,
    };

    packet.transport = Some(transport);
    packet.transport_flow = Some(Flow::new(
        Endpoint::present(ports.0),
        Endpoint::present(ports.1),
    ));
    packet.application = application_layer(ports, payload);

    packet
}

/// Linux cooked capture, sliced leniently past its fixed header.
fn linux_sll(data: &[u8]) -> Option<LaxSlicedPacket<'_>> {
    let sll = LinuxSllSlice::from_slice(data).ok()?;
    match sll.protocol_type() {
        LinuxSllProtocolType::EtherType(ether_type) => Some(LaxSlicedPacket::from_ether_type(
            ether_type,
            sll.payload_slice(),
        )),
        _ => None,
    }
}

fn application_layer((src, dst): (u16, u16), payload: &[u8]) -> Option<Layer> {
    if payload.is_empty() {
        return None;
    }
    if src == DNS_PORT || dst == DNS_PORT {
        Some(DNS)
    } else {
        Some(PAYLOAD)
    }
}
