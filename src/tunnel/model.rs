/// One planned local entry point and the remote endpoint it reaches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardAddress {
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    /// Set when a TLS relay sits in front of the raw tunnel port.
    pub tls_relay_port: Option<u16>,
}

impl ForwardAddress {
    pub fn new(local_port: u16, remote_host: &str, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_host: remote_host.to_string(),
            remote_port,
            tls_relay_port: None,
        }
    }

    pub fn with_tls_relay(mut self, port: u16) -> Self {
        self.tls_relay_port = Some(port);
        self
    }

    pub fn remote_address(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    pub fn local_address(&self) -> String {
        format!("127.0.0.1:{}", self.local_port)
    }

    pub fn tls_relay_address(&self) -> Option<String> {
        self.tls_relay_port.map(|port| format!("127.0.0.1:{port}"))
    }

    /// Address a client program should connect to.
    pub fn connect_address(&self) -> String {
        format!("127.0.0.1:{}", self.connect_port())
    }

    pub fn connect_port(&self) -> u16 {
        self.tls_relay_port.unwrap_or(self.local_port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TunnelState {
    #[default]
    NotStarted,
    Running,
    Stopped,
}
