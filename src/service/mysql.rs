use super::{RunEnv, ServiceAdapter};
use crate::credentials::Credentials;
use anyhow::{Context, Result};
use log::debug;
use std::fmt::Write as _;
use std::sync::Mutex;
use tempfile::TempDir;

/// Points mysql clients at a generated `my.cnf` through `MYSQL_HOME`.
#[derive(Default)]
pub struct MySql {
    work_dir: Mutex<Option<TempDir>>,
}

fn my_cnf(creds: &Credentials) -> String {
    let mut out = String::new();
    for (section, with_database) in [("mysql", true), ("mysqldump", false)] {
        let _ = writeln!(out, "[{section}]");
        let _ = writeln!(out, "user = {}", creds.username());
        let _ = writeln!(out, "password = {}", creds.password());
        let _ = writeln!(out, "host = {}", creds.host());
        let _ = writeln!(out, "port = {}", creds.port());
        if with_database {
            let _ = writeln!(out, "database = {}", creds.database());
        }
    }
    out
}

impl ServiceAdapter for MySql {
    fn known_client_programs(&self) -> &[&'static str] {
        &["mysql", "mysqldump"]
    }

    fn populate_environment(&self, credentials: &Credentials, env: &mut RunEnv) -> Result<()> {
        let mut work_dir = self.work_dir.lock().unwrap_or_else(|p| p.into_inner());
        if work_dir.is_some() {
            return Ok(());
        }

        let dir = tempfile::Builder::new()
            .prefix("conduit")
            .tempdir()
            .context("failed to create temporary mysql config directory")?;
        std::fs::write(dir.path().join("my.cnf"), my_cnf(credentials))
            .context("failed to create temporary mysql config")?;

        env.insert("MYSQL_HOME".into(), dir.path().to_string_lossy().into_owned());
        *work_dir = Some(dir);
        Ok(())
    }

    fn teardown(&self) -> Result<()> {
        let dir = self.work_dir.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(dir) = dir {
            debug!("deleting {}", dir.path().display());
            dir.close().context("failed to remove temporary mysql config")?;
        }
        Ok(())
    }
}
