#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use conduit_lib::platform::model::{
    App, AppEnvironment, CreateAppRequest, Org, ServiceBinding, ServiceInstance, Space,
};
use conduit_lib::retry::RetryPolicy;
use conduit_lib::{ConduitApp, ConduitSettings, Credentials, PlatformClient};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const APP_GUID: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
pub const APP_NAME: &str = "my-app-bar";
pub const BASE_PORT: u16 = 9933;

#[derive(Default)]
pub struct FakeState {
    pub env: Value,
    pub instances: Vec<ServiceInstance>,
    pub bindings: Vec<ServiceBinding>,
    pub bind_credentials: Value,
    pub existing_app: Option<App>,
    pub app_states: VecDeque<String>,
    pub destroy_failures: u32,
    pub refresh_fails: bool,
    pub calls: Vec<String>,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn with_env(env: Value) -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().env = json!({ "VCAP_SERVICES": env });
        Arc::new(fake)
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    fn record(&self, call: &str) {
        self.state.lock().unwrap().calls.push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn org_by_name(&self, name: &str) -> Result<Org> {
        self.record("org_by_name");
        Ok(Org {
            guid: "org-guid".into(),
            name: name.into(),
        })
    }

    async fn space_by_name(&self, _org_guid: &str, name: &str) -> Result<Space> {
        self.record("space_by_name");
        Ok(Space {
            guid: "space-guid".into(),
            name: name.into(),
        })
    }

    async fn service_instances(&self, _space_guid: &str) -> Result<Vec<ServiceInstance>> {
        Ok(self.state.lock().unwrap().instances.clone())
    }

    async fn service_bindings(&self, _app_guid: &str) -> Result<Vec<ServiceBinding>> {
        Ok(self.state.lock().unwrap().bindings.clone())
    }

    async fn app_by_name(&self, _space_guid: &str, _name: &str) -> Result<Option<App>> {
        Ok(self.state.lock().unwrap().existing_app.clone())
    }

    async fn create_app(&self, request: &CreateAppRequest) -> Result<String> {
        assert!(request.enable_ssh);
        self.record("create_app");
        Ok(APP_GUID.into())
    }

    async fn upload_static_app_bits(&self, _app_guid: &str) -> Result<()> {
        self.record("upload_static_app_bits");
        Ok(())
    }

    async fn start_app(&self, _app_guid: &str) -> Result<()> {
        self.record("start_app");
        Ok(())
    }

    async fn app_state(&self, _app_guid: &str) -> Result<String> {
        self.record("app_state");
        let mut state = self.state.lock().unwrap();
        Ok(state
            .app_states
            .pop_front()
            .unwrap_or_else(|| "STARTED".into()))
    }

    async fn destroy_app(&self, _app_guid: &str) -> Result<()> {
        self.record("destroy_app");
        let mut state = self.state.lock().unwrap();
        if state.destroy_failures > 0 {
            state.destroy_failures -= 1;
            return Err(anyhow!("token expired"));
        }
        Ok(())
    }

    async fn bind_service(
        &self,
        _app_guid: &str,
        service_instance_guid: &str,
        _parameters: &serde_json::Map<String, Value>,
    ) -> Result<Credentials> {
        self.record(&format!("bind_service {service_instance_guid}"));
        let creds = self.state.lock().unwrap().bind_credentials.clone();
        Ok(serde_json::from_value(creds)?)
    }

    async fn app_env(&self, _app_guid: &str) -> Result<AppEnvironment> {
        let env = self.state.lock().unwrap().env.clone();
        Ok(serde_json::from_value(env)?)
    }

    fn ssh_endpoint(&self) -> String {
        "127.0.0.1:1".into()
    }

    fn ssh_host_key_fingerprint(&self) -> String {
        "fingerprint".into()
    }

    async fn ssh_code(&self) -> Result<String> {
        Ok("code".into())
    }

    async fn refresh_access_token(&self) -> Result<()> {
        self.record("refresh_access_token");
        if self.state.lock().unwrap().refresh_fails {
            return Err(anyhow!("cannot refresh"));
        }
        Ok(())
    }
}

pub fn settings() -> ConduitSettings {
    let mut settings = ConduitSettings {
        org: "org".into(),
        space: "space".into(),
        app_name: APP_NAME.into(),
        local_port: BASE_PORT,
        ..Default::default()
    };
    settings.timings.app_start = RetryPolicy::fixed(Duration::from_millis(1), 3);
    settings
}

pub fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

pub fn app_for(fake: &Arc<FakePlatform>, services: &[&str], run_args: &[&str]) -> ConduitApp {
    let mut app = ConduitApp::new(
        fake.clone(),
        settings(),
        names(services),
        names(run_args),
        CancellationToken::new(),
    );
    app.use_app_guid(APP_GUID);
    app
}

pub fn vcap(app: &ConduitApp) -> Value {
    serde_json::from_str(&app.run_env()["VCAP_SERVICES"]).unwrap()
}

