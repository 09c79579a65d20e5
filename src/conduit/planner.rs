use crate::tunnel::model::ForwardAddress;
use anyhow::{anyhow, Result};

/// Hands out consecutive local ports, starting from a base port.
#[derive(Debug, Clone)]
pub struct ForwardPlanner {
    next_port: Option<u16>,
}

impl ForwardPlanner {
    pub fn new(base_port: u16) -> Self {
        Self {
            next_port: Some(base_port),
        }
    }

    fn take_port(&mut self) -> Result<u16> {
        let port = self
            .next_port
            .ok_or_else(|| anyhow!("ran out of local ports to forward from"))?;
        self.next_port = port.checked_add(1);
        Ok(port)
    }

    /// Plans one tunnel, plus a TLS relay port directly after it when requested.
    pub fn plan(
        &mut self,
        remote_host: &str,
        remote_port: u16,
        with_tls_relay: bool,
    ) -> Result<ForwardAddress> {
        let fwd = ForwardAddress::new(self.take_port()?, remote_host, remote_port);
        if with_tls_relay {
            return Ok(fwd.with_tls_relay(self.take_port()?));
        }
        Ok(fwd)
    }
}
