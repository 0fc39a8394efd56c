pub mod domain {
    use std::fmt;

    /// Rendered in place of an address when the packet has no network layer.
    pub const ESCAPE_ADDRESS: &str = "-1.-1.-1.-1";
    /// Rendered in place of a port when the packet has no transport layer.
    pub const ESCAPE_PORT: &str = "-1";

    /// One side of a network or transport flow.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub enum Endpoint {
        Present(String),
        Absent,
    }

    impl Endpoint {
        pub fn present(value: impl fmt::Display) -> Self {
            Endpoint::Present(value.to_string())
        }

        pub fn as_str(&self) -> Option<&str> {
            match self {
                Endpoint::Present(value) => Some(value),
                Endpoint::Absent => None,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Flow {
        pub src: Endpoint,
        pub dst: Endpoint,
    }

    impl Flow {
        pub fn new(src: Endpoint, dst: Endpoint) -> Self {
            Flow { src, dst }
        }

        pub fn absent() -> Self {
            Flow {
                src: Endpoint::Absent,
                dst: Endpoint::Absent,
            }
        }

        pub fn endpoints(&self) -> (&Endpoint, &Endpoint) {
            (&self.src, &self.dst)
        }
    }

    /// A decoded protocol layer, identified by its layer-type name.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Layer {
        pub name: &'static str,
    }

    impl Layer {
        pub const fn new(name: &'static str) -> Self {
            Layer { name }
        }
    }

    /// A captured packet after layer decoding. Workers only ever read it.
    #[derive(Debug, Clone, Default)]
    pub struct DecodedPacket {
        pub link: Option<Layer>,
        pub network: Option<Layer>,
        pub transport: Option<Layer>,
        pub application: Option<Layer>,
        pub network_flow: Option<Flow>,
        pub transport_flow: Option<Flow>,
        pub length: usize,
    }

    impl DecodedPacket {
        /// Source and destination addresses, `Absent` without a network layer.
        pub fn addresses(&self) -> Flow {
            self.network_flow.clone().unwrap_or_else(Flow::absent)
        }

        /// Source and destination ports, `Absent` without a transport layer.
        pub fn ports(&self) -> Flow {
            self.transport_flow.clone().unwrap_or_else(Flow::absent)
        }
    }
}

pub mod dto {
    use serde::Serialize;

    #[derive(Debug, Serialize, Clone)]
    pub struct OptionsDTO {
        pub labels: Vec<String>,
        pub resolve_dns: bool,
        pub device: String,
        pub filter: String,
        pub snaplen: i32,
        pub promiscuous: bool,
    }
}
