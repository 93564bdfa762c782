//! Consul agent backend.
//!
//! Registration goes through `PUT /v1/agent/service/register` with a gRPC
//! check and deregistration through `PUT /v1/agent/service/deregister/{id}`.

use super::{Registration, Registry};
use crate::{RegistryError, config::RegistryConfig};
use core::time::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Registry client for a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ConsulRegistry {
    /// Creates a client for the agent at `config.addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url(&config.addr),
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn put(
        &self,
        path: &str,
        body: Option<&AgentServiceRegistration>,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/v1{path}", self.base_url);
        let mut request = self.http.put(&url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[tonic::async_trait]
impl Registry for ConsulRegistry {
    #[tracing::instrument(
        skip_all,
        fields(
            service = %registration.identity.name,
            instance_id = %registration.identity.instance_id
        )
    )]
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        let body = AgentServiceRegistration::from(registration);
        self.put("/agent/service/register", Some(&body)).await?;
        tracing::debug!(target_addr = %registration.check.target, "Consul accepted registration");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn deregister(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.put(&format!("/agent/service/deregister/{instance_id}"), None)
            .await
    }
}

/// Body of `PUT /v1/agent/service/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    pub check: AgentServiceCheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AgentServiceCheck {
    #[serde(rename = "GRPC")]
    pub grpc: String,
    pub interval: String,
    pub timeout: String,
    pub deregister_critical_service_after: String,
}

impl From<&Registration> for AgentServiceRegistration {
    fn from(registration: &Registration) -> Self {
        let identity = &registration.identity;
        let check = &registration.check;
        Self {
            id: identity.instance_id.to_string(),
            name: identity.name.clone(),
            tags: identity.tags.clone(),
            address: identity.host.clone(),
            port: identity.port,
            meta: registration.meta.clone(),
            check: AgentServiceCheck {
                grpc: check.target.clone(),
                interval: go_duration(check.interval),
                timeout: go_duration(check.timeout),
                deregister_critical_service_after: go_duration(check.deregister_after),
            },
        }
    }
}

/// Formats a duration the way Consul parses them (`"5s"`, `"250ms"`).
pub(crate) fn go_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

fn base_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
