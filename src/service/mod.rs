mod influxdb;
mod mysql;
mod postgres;
mod redis;

pub use influxdb::InfluxDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use redis::Redis;

use crate::credentials::Credentials;
use crate::platform::model::Binding;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Extra environment handed to the user's program.
pub type RunEnv = BTreeMap<String, String>;

/// Only bindings of this service type ever get a TLS relay.
pub const TLS_RELAY_SERVICE_TYPE: &str = "redis";

/// Per-service-type knowledge about credentials and client programs.
pub trait ServiceAdapter: Send + Sync {
    fn is_tls_enabled(&self, credentials: &Credentials) -> bool {
        credentials.is_tls_enabled()
    }

    /// Clients that cannot speak TLS themselves and need a local relay.
    fn non_tls_client_programs(&self) -> &[&'static str] {
        &[]
    }

    fn known_client_programs(&self) -> &[&'static str];

    fn populate_environment(&self, _credentials: &Credentials, _env: &mut RunEnv) -> Result<()> {
        Ok(())
    }

    fn teardown(&self) -> Result<()> {
        Ok(())
    }

    fn additional_program_arguments(&self, _bindings: &[Binding]) -> Vec<String> {
        Vec::new()
    }

    fn knows_program(&self, program: &str) -> bool {
        self.known_client_programs().iter().any(|p| *p == program)
    }

    fn lacks_tls_support(&self, program: &str) -> bool {
        self.non_tls_client_programs().iter().any(|p| *p == program)
    }
}

/// Adapters keyed by service type, iterated in sorted order.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    adapters: BTreeMap<String, Arc<dyn ServiceAdapter>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("influxdb", Arc::new(InfluxDb));
        registry.register("mysql", Arc::new(MySql::default()));
        registry.register("postgres", Arc::new(Postgres));
        registry.register("redis", Arc::new(Redis));
        registry
    }

    pub fn register(&mut self, service_type: &str, adapter: Arc<dyn ServiceAdapter>) {
        self.adapters.insert(service_type.to_string(), adapter);
    }

    pub fn get(&self, service_type: &str) -> Option<&Arc<dyn ServiceAdapter>> {
        self.adapters.get(service_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn ServiceAdapter>)> {
        self.adapters.iter()
    }

    pub fn service_types_for_program(&self, program: &str) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|(_, adapter)| adapter.knows_program(program))
            .map(|(service_type, _)| service_type.clone())
            .collect()
    }
}

fn first_binding_address(bindings: &[Binding]) -> Option<(String, String, &Credentials)> {
    bindings.first().map(|b| {
        let c = &b.credentials;
        (c.host(), c.port().to_string(), c)
    })
}
