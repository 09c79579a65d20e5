use crate::credentials::Credentials;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Org {
    pub guid: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub guid: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub guid: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub guid: String,
    pub app_guid: String,
    pub service_instance_guid: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub guid: String,
    pub name: String,
    pub state: String,
}

/// Shape of the throwaway proxy app.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub space_guid: String,
    pub enable_ssh: bool,
    pub instances: u32,
    pub memory_mb: u32,
    pub disk_quota_mb: u32,
    pub buildpack: String,
    pub health_check_type: String,
}

impl CreateAppRequest {
    pub fn proxy(name: &str, space_guid: &str) -> Self {
        Self {
            name: name.to_string(),
            space_guid: space_guid.to_string(),
            enable_ssh: true,
            instances: 1,
            memory_mb: 64,
            disk_quota_mb: 256,
            buildpack: "staticfile_buildpack".to_string(),
            health_check_type: "none".to_string(),
        }
    }
}

/// One entry of `VCAP_SERVICES`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    #[serde(default)]
    pub instance_name: String,
    #[serde(default)]
    pub credentials: Credentials,
    /// label, plan, tags and whatever else the platform sends along.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Binding {
    pub fn new(name: &str, instance_name: &str, credentials: Credentials) -> Self {
        Self {
            name: name.to_string(),
            instance_name: instance_name.to_string(),
            credentials,
            extra: serde_json::Map::new(),
        }
    }
}

/// Bindings keyed by service type, in sorted order.
pub type VcapServices = BTreeMap<String, Vec<Binding>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppEnvironment {
    #[serde(rename = "VCAP_SERVICES", default)]
    pub vcap_services: VcapServices,
}
