// src/sniff.rs
use std::fmt::Write as _;

use anyhow::{Context, Result};
use pcap::{Active, Capture, Device};
use tracing::{debug, info, warn};

use crate::listener::PacketSource;
use crate::models::domain::DecodedPacket;
use crate::parser::{decode, LinkKind};

/// Read timeout so the capture loop wakes up even on a silent interface.
const READ_TIMEOUT_MS: i32 = 500;

/// Everything needed to open a live capture handle.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub device: String,
    pub filter: String,
    pub snaplen: i32,
    pub promiscuous: bool,
}

/// A live pcap handle decoding every frame it reads.
pub struct LiveCapture {
    cap: Capture<Active>,
    link: LinkKind,
}

impl LiveCapture {
    /// Opens the device and applies the filter. Any failure here is fatal.
    pub fn open(options: &CaptureOptions) -> Result<Self> {
        let mut cap = create_capture(options)
            .with_context(|| format!("opening capture on {}", options.device))?;
        configure_capture(&mut cap, &options.filter)
            .with_context(|| format!("applying filter {:?}", options.filter))?;

        let datalink = cap.get_datalink();
        let link = LinkKind::from_datalink(datalink.0);
        info!(
            device = %options.device,
            filter = %options.filter,
            snaplen = options.snaplen,
            promiscuous = options.promiscuous,
            datalink = datalink.0,
            "opened capture",
        );
        if let LinkKind::Unknown(dlt) = link {
            warn!(datalink = dlt, "unsupported datalink, only byte counts are decoded");
        }

        Ok(Self { cap, link })
    }
}

impl PacketSource for LiveCapture {
    fn next_packet(&mut self) -> Result<Option<DecodedPacket>> {
        loop {
            match self.cap.next() {
                Ok(packet) => return Ok(Some(decode(self.link, packet.data))),
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return Ok(None),
                Err(e) => return Err(e).context("reading packet"),
            }
        }
    }
}

fn create_capture(options: &CaptureOptions) -> Result<Capture<Active>, pcap::Error> {
    Capture::from_device(options.device.as_str())?
        .promisc(options.promiscuous)
        .snaplen(options.snaplen)
        .timeout(READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()
}

fn configure_capture(cap: &mut Capture<Active>, filter: &str) -> Result<(), pcap::Error> {
    if filter.is_empty() {
        debug!("no capture filter configured");
        return Ok(());
    }
    cap.filter(filter, true)
}

/// Human readable listing of every capture device and its addresses.
pub fn list_interfaces() -> Result<String> {
    let devices = Device::list().context("listing capture devices")?;
    Ok(render_devices(&devices))
}

fn render_devices(devices: &[Device]) -> String {
    let mut out = String::new();
    for device in devices {
        let _ = writeln!(out, "Name: {}", device.name);
        let _ = writeln!(
            out,
            "Description: {}",
            device.desc.as_deref().unwrap_or_default()
        );
        if !device.addresses.is_empty() {
            out.push_str("Devices addresses:\n");
            for address in &device.addresses {
                let netmask = address
                    .netmask
                    .map(|mask| mask.to_string())
                    .unwrap_or_default();
                let _ = writeln!(out, " - IP address: {}", address.addr);
                let _ = writeln!(out, " - Subnet mask: {}", netmask);
            }
        }
        out.push('\n');
    }
    out
}
