use super::{first_binding_address, ServiceAdapter};
use crate::credentials::Credentials;
use crate::platform::model::Binding;

pub struct Redis;

impl ServiceAdapter for Redis {
    fn is_tls_enabled(&self, credentials: &Credentials) -> bool {
        credentials.is_tls_enabled() || credentials.uri().to_lowercase().starts_with("rediss")
    }

    fn non_tls_client_programs(&self) -> &[&'static str] {
        &["redis-cli"]
    }

    fn known_client_programs(&self) -> &[&'static str] {
        &["redis-cli"]
    }

    fn additional_program_arguments(&self, bindings: &[Binding]) -> Vec<String> {
        match first_binding_address(bindings) {
            Some((host, port, creds)) => {
                vec!["-h".into(), host, "-p".into(), port, "-a".into(), creds.password()]
            }
            None => Vec::new(),
        }
    }
}
