pub mod model;

use crate::credentials::Credentials;
use crate::tunnel::ssh::PasswordSource;
use anyhow::Result;
use async_trait::async_trait;
use model::{App, AppEnvironment, CreateAppRequest, Org, ServiceBinding, ServiceInstance, Space};
use std::sync::Arc;

/// Everything the orchestrator needs from the platform's control plane.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn org_by_name(&self, name: &str) -> Result<Org>;

    async fn space_by_name(&self, org_guid: &str, name: &str) -> Result<Space>;

    async fn service_instances(&self, space_guid: &str) -> Result<Vec<ServiceInstance>>;

    async fn service_bindings(&self, app_guid: &str) -> Result<Vec<ServiceBinding>>;

    async fn app_by_name(&self, space_guid: &str, name: &str) -> Result<Option<App>>;

    /// Returns the new app's guid.
    async fn create_app(&self, request: &CreateAppRequest) -> Result<String>;

    async fn upload_static_app_bits(&self, app_guid: &str) -> Result<()>;

    async fn start_app(&self, app_guid: &str) -> Result<()>;

    async fn app_state(&self, app_guid: &str) -> Result<String>;

    async fn destroy_app(&self, app_guid: &str) -> Result<()>;

    async fn bind_service(
        &self,
        app_guid: &str,
        service_instance_guid: &str,
        parameters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Credentials>;

    async fn app_env(&self, app_guid: &str) -> Result<AppEnvironment>;

    fn ssh_endpoint(&self) -> String;

    fn ssh_host_key_fingerprint(&self) -> String;

    /// A fresh one-time SSH passcode.
    async fn ssh_code(&self) -> Result<String>;

    async fn refresh_access_token(&self) -> Result<()>;
}

/// Feeds the tunnel with passcodes from the platform.
pub struct PlatformPasswords(pub Arc<dyn PlatformClient>);

#[async_trait]
impl PasswordSource for PlatformPasswords {
    async fn one_time_password(&self) -> Result<String> {
        self.0.ssh_code().await
    }
}
