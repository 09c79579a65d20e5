use crate::platform::model::{Binding, VcapServices};
use crate::service::ServiceRegistry;
use anyhow::{bail, Result};
use std::collections::BTreeSet;

/// Prunes the app's bindings down to the requested instance names.
///
/// Fails when a requested name has no binding, or when a requested binding
/// belongs to a service type nobody registered an adapter for.
pub fn select_bindings(
    all: VcapServices,
    requested: &[String],
    registry: &ServiceRegistry,
    app_name: &str,
) -> Result<VcapServices> {
    let mut unsatisfied: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
    let mut selected = VcapServices::new();

    for (service_type, bindings) in all {
        let kept: Vec<Binding> = bindings
            .into_iter()
            .filter(|b| unsatisfied.remove(b.instance_name.as_str()))
            .collect();
        let Some(first) = kept.first() else {
            continue;
        };

        if registry.get(&service_type).is_none() {
            bail!(
                "App {app_name}: service instance {} is of unknown type {service_type}, don't know how to handle its credentials",
                first.instance_name
            );
        }
        selected.insert(service_type, kept);
    }

    if !unsatisfied.is_empty() {
        bail!(
            "App {app_name}: can't find binding information for services: {}",
            unsatisfied.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    Ok(selected)
}
