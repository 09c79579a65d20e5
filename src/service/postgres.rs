use super::{RunEnv, ServiceAdapter};
use crate::credentials::Credentials;
use anyhow::Result;

pub struct Postgres;

impl ServiceAdapter for Postgres {
    fn known_client_programs(&self) -> &[&'static str] {
        &["psql", "pg_dump", "pg_dumpall", "pg_restore"]
    }

    fn populate_environment(&self, credentials: &Credentials, env: &mut RunEnv) -> Result<()> {
        env.insert("PGDATABASE".into(), credentials.database());
        env.insert("PGHOST".into(), credentials.host());
        env.insert("PGPORT".into(), credentials.port().to_string());
        env.insert("PGUSER".into(), credentials.username());
        env.insert("PGPASSWORD".into(), credentials.password());
        Ok(())
    }
}
