use crate::conduit::bindings::select_bindings;
use crate::conduit::command::find_in_path;
use crate::conduit::planner::ForwardPlanner;
use crate::error::{ProgramExit, TeardownErrors};
use crate::platform::model::{CreateAppRequest, Org, Space, VcapServices};
use crate::platform::{PlatformClient, PlatformPasswords};
use crate::retry::{poll_until, wait_for_connection, RetryPolicy};
use crate::service::{RunEnv, ServiceAdapter, ServiceRegistry, TLS_RELAY_SERVICE_TYPE};
use crate::settings::ConduitSettings;
use crate::tunnel::model::ForwardAddress;
use crate::tunnel::ssh::{Tunnel, TunnelConfig};
use crate::tunnel::tls::TlsRelay;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use shell_escape::escape;
use std::borrow::Cow;
use std::io::{self, Write};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const STARTED: &str = "STARTED";

/// Drives one conduit session: proxy app, bindings, tunnels, the user's
/// program and the cleanup afterwards.
pub struct ConduitApp {
    client: Arc<dyn PlatformClient>,
    settings: ConduitSettings,
    service_names: Vec<String>,
    run_args: Vec<String>,
    registry: ServiceRegistry,
    shutdown: CancellationToken,

    org: Option<Org>,
    space: Option<Space>,
    app_guid: Option<String>,
    delete_app: bool,
    vcap_services: VcapServices,
    run_env: RunEnv,
    forward_addresses: Vec<ForwardAddress>,
    tunnel: Option<Tunnel>,
    tls_relays: Vec<TlsRelay>,
}

impl ConduitApp {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        settings: ConduitSettings,
        service_names: Vec<String>,
        run_args: Vec<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            settings,
            service_names,
            run_args,
            registry: ServiceRegistry::with_defaults(),
            shutdown,
            org: None,
            space: None,
            app_guid: None,
            delete_app: false,
            vcap_services: VcapServices::new(),
            run_env: RunEnv::new(),
            forward_addresses: Vec::new(),
            tunnel: None,
            tls_relays: Vec::new(),
        }
    }

    pub fn register(&mut self, service_type: &str, adapter: Arc<dyn ServiceAdapter>) {
        self.registry.register(service_type, adapter);
    }

    pub fn program(&self) -> Option<&str> {
        self.run_args.first().map(String::as_str)
    }

    pub fn org(&self) -> Option<&Org> {
        self.org.as_ref()
    }

    pub fn app_guid(&self) -> Option<&str> {
        self.app_guid.as_deref()
    }

    /// Points the session at an app that already exists, skipping deployment.
    pub fn use_app_guid(&mut self, guid: &str) {
        self.app_guid = Some(guid.to_string());
    }

    pub fn run_env(&self) -> &RunEnv {
        &self.run_env
    }

    pub fn vcap_services(&self) -> &VcapServices {
        &self.vcap_services
    }

    pub fn forward_addresses(&self) -> &[ForwardAddress] {
        &self.forward_addresses
    }

    fn space(&self) -> Result<Space> {
        self.space
            .clone()
            .ok_or_else(|| anyhow!("no space targeted, call init first"))
    }

    fn require_app_guid(&self) -> Result<String> {
        self.app_guid
            .clone()
            .ok_or_else(|| anyhow!("no app to tunnel through"))
    }

    pub async fn init(&mut self) -> Result<()> {
        info!("Targeting org {}", self.settings.org);
        let org = self.client.org_by_name(&self.settings.org).await?;

        info!("Targeting space {}", self.settings.space);
        let space = self.client.space_by_name(&org.guid, &self.settings.space).await?;

        self.org = Some(org);
        self.space = Some(space);
        Ok(())
    }

    pub async fn deploy_app(&mut self) -> Result<()> {
        let space = self.space()?;
        let name = self.settings.app_name.clone();

        info!("Deploying {name}");
        let guid = self
            .client
            .create_app(&CreateAppRequest::proxy(&name, &space.guid))
            .await
            .with_context(|| format!("failed to create app {name}"))?;
        self.app_guid = Some(guid.clone());
        self.delete_app = !self.settings.reuse;

        info!("Uploading {name} bits");
        self.client.upload_static_app_bits(&guid).await?;

        info!("Starting {name}");
        self.client.start_app(&guid).await?;

        info!("Waiting for conduit app to become available");
        let client = &self.client;
        let app_guid = guid.as_str();
        let started = poll_until(self.settings.timings.app_start, move |_| async move {
            Ok(client.app_state(app_guid).await? == STARTED)
        })
        .await?;
        if !started {
            bail!("timeout waiting for app {guid} to reach {STARTED} state");
        }

        self.bind_services(&space, &guid).await
    }

    async fn bind_services(&self, space: &Space, app_guid: &str) -> Result<()> {
        info!("Fetching service information");
        let instances = self.client.service_instances(&space.guid).await?;

        for name in &self.service_names {
            let mut bound = false;
            for instance in instances.iter().filter(|si| &si.name == name) {
                info!("Binding {}", instance.name);
                debug!("binding {} to {app_guid}", instance.guid);
                let creds = self
                    .client
                    .bind_service(app_guid, &instance.guid, &self.settings.bind_parameters)
                    .await?;
                if creds.host().is_empty() || creds.port() == 0 {
                    bail!("{name} service is missing host, hostname or port");
                }
                bound = true;
            }
            if !bound {
                bail!(
                    "failed to bind service: '{name}' was not found in space '{}'",
                    space.name
                );
            }
        }
        Ok(())
    }

    pub async fn prepare_for_existing_app(&mut self) -> Result<()> {
        let space = self.space()?;
        let name = self.settings.app_name.clone();

        info!("Fetching information about app {name}");
        let app = self
            .client
            .app_by_name(&space.guid, &name)
            .await?
            .ok_or_else(|| anyhow!("App '{name}' was not found in space '{}'", space.name))?;
        self.app_guid = Some(app.guid.clone());
        self.delete_app = false;

        info!("Fetching service information");
        let instances = self.client.service_instances(&space.guid).await?;

        info!("Fetching binding information");
        let bindings = self.client.service_bindings(&app.guid).await?;

        for service_name in &self.service_names {
            let instance = instances
                .iter()
                .find(|si| &si.name == service_name)
                .ok_or_else(|| {
                    anyhow!(
                        "Service '{service_name}' was not found in space '{}'",
                        space.name
                    )
                })?;

            if !bindings
                .iter()
                .any(|b| b.service_instance_guid == instance.guid)
            {
                bail!(
                    "App '{name}' doesn't appear to be bound to service '{service_name}'. Using an existing app requires the app to have an existing binding to the desired service(s)."
                );
            }
        }
        Ok(())
    }

    /// Resolves the requested bindings, plans their local ports, rewrites their
    /// credentials to point at those ports and prepares the program's environment.
    pub async fn init_service_bindings(&mut self) -> Result<()> {
        let app_guid = self.require_app_guid()?;

        info!("Fetching environment");
        let env = self.client.app_env(&app_guid).await?;

        let mut selected = select_bindings(
            env.vcap_services,
            &self.service_names,
            &self.registry,
            &self.settings.app_name,
        )?;

        let program = self.run_args.first().cloned();
        let mut planner = ForwardPlanner::new(self.settings.local_port);
        let mut program_satisfied = false;

        for (service_type, bindings) in selected.iter_mut() {
            let Some(adapter) = self.registry.get(service_type) else {
                continue;
            };

            for binding in bindings.iter_mut() {
                let creds = &mut binding.credentials;
                let relay = service_type == TLS_RELAY_SERVICE_TYPE
                    && program.as_deref().is_some_and(|p| adapter.lacks_tls_support(p))
                    && adapter.is_tls_enabled(creds);

                let fwd = planner.plan(&creds.host(), creds.port(), relay)?;
                debug!("remote address for tunnel will be {}", fwd.remote_address());
                creds.set_address("127.0.0.1", fwd.connect_port());

                if let Some(p) = program.as_deref() {
                    if !program_satisfied && adapter.knows_program(p) {
                        adapter.populate_environment(creds, &mut self.run_env)?;
                        program_satisfied = true;
                    }
                }

                self.forward_addresses.push(fwd);
            }
        }

        if let Some(p) = program.as_deref() {
            if !program_satisfied {
                let types = self.registry.service_types_for_program(p);
                if types.is_empty() {
                    bail!("Unknown program {p}: can't determine what service types it expects");
                }
                bail!(
                    "{p} program expects one of the following service types: {}",
                    types.join(", ")
                );
            }
        }

        let vcap = serde_json::to_string(&selected).context("failed to marshal VCAP_SERVICES")?;
        debug!("VCAP_SERVICES {vcap}");
        self.run_env.insert("VCAP_SERVICES".into(), vcap);
        self.vcap_services = selected;
        Ok(())
    }

    pub async fn setup_tunnels(&mut self) -> Result<()> {
        self.init_service_bindings().await?;
        self.start_ssh_tunnel().await?;
        self.start_tls_relays().await
    }

    async fn start_ssh_tunnel(&mut self) -> Result<()> {
        let mut config = TunnelConfig::new(
            &self.client.ssh_endpoint(),
            &self.client.ssh_host_key_fingerprint(),
            &self.require_app_guid()?,
            self.forward_addresses.clone(),
        );
        config.dial_retry = self.settings.timings.tunnel_dial;
        let tunnel = Tunnel::new(config, Arc::new(PlatformPasswords(self.client.clone())));

        info!("Starting port forwarding");
        tunnel.start().await?;
        self.tunnel = Some(tunnel);

        info!("Waiting for port forwarding");
        for fwd in &self.forward_addresses {
            self.wait_until_ready(&fwd.local_address()).await?;
        }
        Ok(())
    }

    async fn start_tls_relays(&mut self) -> Result<()> {
        if self.forward_addresses.iter().all(|f| f.tls_relay_port.is_none()) {
            return Ok(());
        }
        let client_config = self.settings.tls.build_client_config()?;

        for fwd in &self.forward_addresses {
            let Some(relay_address) = fwd.tls_relay_address() else {
                continue;
            };
            let relay = TlsRelay::new(
                &relay_address,
                &fwd.local_address(),
                &fwd.remote_address(),
                client_config.clone(),
            )?;
            relay.start().await?;
            self.tls_relays.push(relay);

            self.wait_until_ready(&relay_address).await?;
        }
        Ok(())
    }

    async fn wait_until_ready(&self, addr: &str) -> Result<()> {
        wait_until_ready(
            addr,
            self.settings.timings.readiness_probe,
            self.tunnel.as_ref(),
            &self.shutdown,
        )
        .await
    }

    pub fn print_connection_info<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "\nThe following services are ready for you to connect to:\n")?;
        for (service_type, bindings) in &self.vcap_services {
            for binding in bindings {
                writeln!(writer, "* service: {} ({service_type})", binding.name)?;
                binding.credentials.write_summary(writer, "  ")?;
                writeln!(writer)?;
            }
        }
        Ok(())
    }

    fn program_specific_args(&self, program: &str) -> Vec<String> {
        self.registry
            .iter()
            .find(|(_, adapter)| adapter.knows_program(program))
            .map(|(service_type, adapter)| {
                let bindings = self
                    .vcap_services
                    .get(service_type.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                adapter.additional_program_arguments(bindings)
            })
            .unwrap_or_default()
    }

    /// Runs the user's program against the tunnels and waits for it to exit.
    pub async fn run_command(&self) -> Result<()> {
        let Some((program, user_args)) = self.run_args.split_first() else {
            return Ok(());
        };
        info!("Preparing command: {}", self.run_args.join(" "));

        let exe = find_in_path(program, std::env::var_os("PATH"))
            .ok_or_else(|| anyhow!("cannot find '{program}' in PATH"))?;

        let mut args = self.program_specific_args(program);
        args.extend(user_args.iter().cloned());
        debug!(
            "running command {} {}",
            exe.display(),
            args.iter()
                .map(|a| escape(Cow::from(a.as_str())))
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = Command::new(&exe)
            .args(&args)
            .envs(&self.run_env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("{}", exe.display()))?;

        let status = tokio::select! {
            status = child.wait() => status,
            _ = self.shutdown.cancelled() => {
                warn!("shutting down, stopping {program}");
                if let Err(e) = child.kill().await {
                    debug!("failed to kill {program}: {e}");
                }
                child.wait().await
            }
        };
        let status = status.with_context(|| format!("failed waiting for {program}"))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ProgramExit { code }.into()),
            None => bail!("{program} was terminated by a signal"),
        }
    }

    /// Keeps the tunnels open until shutdown is requested or the tunnel fails.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        let mut stderr = io::stderr();
        self.print_connection_info(&mut stderr)?;
        writeln!(stderr, "Press Ctrl+C to shutdown.")?;

        match &self.tunnel {
            Some(tunnel) => tokio::select! {
                _ = self.shutdown.cancelled() => Ok(()),
                err = tunnel.wait() => err.map_or(Ok(()), Err),
            },
            None => {
                self.shutdown.cancelled().await;
                Ok(())
            }
        }
    }

    async fn destroy_app(&self, guid: &str) -> Result<()> {
        let name = &self.settings.app_name;
        debug!("destroying {name} {guid}");
        let Err(e) = self.client.destroy_app(guid).await else {
            return Ok(());
        };
        debug!("failed to delete app {name}: {e:#}");

        debug!("refreshing auth token");
        if let Err(e) = self.client.refresh_access_token().await {
            debug!("failed to refresh access token: {e:#}");
            bail!("failed to delete {name} app, please delete it manually");
        }
        if let Err(e) = self.client.destroy_app(guid).await {
            debug!("failed to delete app {name}: {e:#}");
            bail!("failed to delete {name} app, please delete it manually");
        }
        Ok(())
    }

    /// Stops relays and tunnels, cleans up adapters and deletes an owned app.
    /// Every step runs even when an earlier one fails.
    pub async fn teardown(&mut self) -> Result<()> {
        let mut errors = Vec::new();

        for relay in self.tls_relays.drain(..) {
            if let Err(e) = relay.stop().await {
                errors.push(e);
            }
        }

        if let Some(tunnel) = self.tunnel.take() {
            if let Err(e) = tunnel.stop().await {
                errors.push(e);
            }
        }

        for (service_type, adapter) in self.registry.iter() {
            if let Err(e) = adapter.teardown() {
                errors.push(e.context(format!("{service_type} cleanup failed")));
            }
        }

        if self.delete_app {
            if let Some(guid) = self.app_guid.clone() {
                if let Err(e) = self.destroy_app(&guid).await {
                    errors.push(e);
                }
                self.delete_app = false;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TeardownErrors(errors).into())
        }
    }

    async fn session(&mut self) -> Result<()> {
        self.init().await?;

        if self.settings.reuse {
            let space = self.space()?;
            let existing = self
                .client
                .app_by_name(&space.guid, &self.settings.app_name)
                .await?;
            if existing.is_some() {
                self.prepare_for_existing_app().await?;
            } else {
                self.deploy_app().await?;
            }
        } else {
            self.deploy_app().await?;
        }

        self.setup_tunnels().await?;

        if self.program().is_some() {
            self.run_command().await
        } else {
            self.wait_for_shutdown().await
        }
    }

    /// Runs the whole session. Teardown always happens. When both fail, the
    /// teardown errors wrap the session's error.
    pub async fn run(mut self) -> Result<()> {
        let outcome = self.session().await;
        let teardown = self.teardown().await;

        match (outcome, teardown) {
            (Ok(()), teardown) => teardown,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                warn!("{teardown_err:#}");
                Err(e.context(teardown_err))
            }
        }
    }
}

/// Probes `addr` until it accepts connections. Gives up early when the tunnel
/// fails or stops, or when shutdown is requested.
async fn wait_until_ready(
    addr: &str,
    policy: RetryPolicy,
    tunnel: Option<&Tunnel>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let tunnel_down = async {
        match tunnel {
            Some(tunnel) => tunnel.wait().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = wait_for_connection(addr, policy) => res,
        err = tunnel_down => {
            Err(err.unwrap_or_else(|| anyhow!("tunnel stopped before {addr} became ready")))
        }
        _ = shutdown.cancelled() => bail!("interrupted while waiting for {addr}"),
    }
}
