use super::{first_binding_address, RunEnv, ServiceAdapter};
use crate::credentials::Credentials;
use crate::platform::model::Binding;
use anyhow::Result;

pub struct InfluxDb;

impl ServiceAdapter for InfluxDb {
    fn is_tls_enabled(&self, _credentials: &Credentials) -> bool {
        false
    }

    fn known_client_programs(&self) -> &[&'static str] {
        &["influx", "chronograf", "telegraf", "influx_inspect", "inch"]
    }

    fn populate_environment(&self, credentials: &Credentials, env: &mut RunEnv) -> Result<()> {
        env.insert("INFLUX_USERNAME".into(), credentials.username());
        env.insert("INFLUX_PASSWORD".into(), credentials.password());
        Ok(())
    }

    fn additional_program_arguments(&self, bindings: &[Binding]) -> Vec<String> {
        let Some((host, port, creds)) = first_binding_address(bindings) else {
            return Vec::new();
        };
        // the server certificate does not name 127.0.0.1
        vec![
            "-host".into(),
            host,
            "-port".into(),
            port,
            "-database".into(),
            creds.database(),
            "-ssl".into(),
            "-unsafeSsl".into(),
        ]
    }
}
