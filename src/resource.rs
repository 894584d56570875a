//! Resource descriptor attached to every exported signal.
//!
//! Carries:
//! - `service.name` (explicit argument)
//! - `service.version` from `SERVICE_VERSION`
//! - `deployment.environment` from `ENV`
//! - `host.name` from the operating system

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};

pub const SERVICE_VERSION: &str = "service.version";
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
pub const HOST_NAME: &str = "host.name";

/// Build the resource for `service_name` using the host's name.
///
/// # Errors
///
/// Returns [`TelemetryError::ResourceBuildFailed`] if the host name cannot
/// be read or is not valid UTF-8.
pub fn build_resource(service_name: &str, config: &TelemetryConfig) -> Result<Resource> {
    let host = hostname::get()
        .map_err(|e| TelemetryError::ResourceBuildFailed(format!("host name lookup: {e}")))?
        .into_string()
        .map_err(|raw| {
            TelemetryError::ResourceBuildFailed(format!("host name is not UTF-8: {raw:?}"))
        })?;

    Ok(resource_for_host(service_name, config, host))
}

/// Build the resource with an explicit host identity.
pub fn resource_for_host(
    service_name: &str,
    config: &TelemetryConfig,
    host: impl Into<String>,
) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attributes([
            KeyValue::new(SERVICE_VERSION, config.service_version.clone()),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT, config.environment.clone()),
            KeyValue::new(HOST_NAME, host.into()),
        ])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribute(resource: &Resource, key: &str) -> Option<String> {
        resource
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_resource_carries_identity() {
        let config = TelemetryConfig {
            service_version: "1.4.2".into(),
            environment: "prod".into(),
            ..TelemetryConfig::default()
        };

        let resource = resource_for_host("auth-service", &config, "node-7");

        assert_eq!(attribute(&resource, "service.name").as_deref(), Some("auth-service"));
        assert_eq!(attribute(&resource, SERVICE_VERSION).as_deref(), Some("1.4.2"));
        assert_eq!(attribute(&resource, DEPLOYMENT_ENVIRONMENT).as_deref(), Some("prod"));
        assert_eq!(attribute(&resource, HOST_NAME).as_deref(), Some("node-7"));
    }

    #[test]
    fn test_build_resource_uses_host_name() {
        let resource = build_resource("svc", &TelemetryConfig::default()).unwrap();
        let host = attribute(&resource, HOST_NAME).unwrap();
        assert!(!host.is_empty());
    }
}
