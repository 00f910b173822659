//! [`OwnershipOracle`] backed by the workspace master REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;
use url::Url;

use super::{OracleError, OwnershipOracle};
use crate::config::OracleConfig;

/// Workspace statuses during which machines may not be listed yet or anymore.
const TRANSITIONAL_STATUSES: [&str; 2] = ["STARTING", "STOPPING"];

/// The parts of `GET /workspace/{key}` the oracle reads.
#[derive(Debug, Default, Deserialize)]
struct WorkspaceBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    runtime: Option<RuntimeBody>,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimeBody {
    #[serde(default)]
    machines: Option<Value>,
}

impl WorkspaceBody {
    fn status_is(&self, candidates: &[&str]) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| candidates.iter().any(|c| status.eq_ignore_ascii_case(c)))
    }

    fn has_runtime(&self) -> bool {
        self.runtime.is_some() || (self.status.is_some() && !self.status_is(&["STOPPED"]))
    }

    /// Whether `runtime.machines` names `machine_id`, either as a map key or
    /// as the `id` of an entry.
    fn lists_machine(&self, machine_id: &str) -> bool {
        let Some(machines) = self.runtime.as_ref().and_then(|r| r.machines.as_ref()) else {
            return false;
        };
        let has_id = |machine: &Value| machine.get("id").and_then(Value::as_str) == Some(machine_id);
        match machines {
            Value::Object(map) => map.contains_key(machine_id) || map.values().any(has_id),
            Value::Array(list) => list.iter().any(has_id),
            _ => false,
        }
    }
}

/// Queries the workspace master over HTTP.
///
/// - `GET {base}/workspace/{ws}`: 404 means the workspace is gone. Otherwise
///   the body's `status` and `runtime` decide.
/// - `GET {base}/machine/{machine}`: consulted when the workspace runtime
///   does not list the machine. 2xx means known, 404 means not.
#[derive(Debug, Clone)]
pub struct HttpOwnershipOracle {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpOwnershipOracle {
    /// Create an oracle for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let parsed =
            Url::parse(base_url).map_err(|e| OracleError::Unexpected(format!("{base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Build an oracle from configuration.
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        let oracle = Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))?;
        Ok(match &config.token {
            Some(token) => oracle.with_token(token.clone()),
            None => oracle,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn get(&self, path: &str) -> Result<Response, OracleError> {
        let url = format!("{}{path}", self.base_url);
        trace!(url = %url, "Querying ownership oracle");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(format!("GET {url}: {e}")))
    }

    /// Fetch a workspace. `None` when the workspace master does not know it.
    async fn workspace(&self, workspace_id: &str) -> Result<Option<WorkspaceBody>, OracleError> {
        let path = format!("/workspace/{workspace_id}");
        let response = self.get(&path).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(OracleError::Unexpected(format!("GET {path} returned {status}")));
        }
        response
            .json::<WorkspaceBody>()
            .await
            .map(Some)
            .map_err(|e| OracleError::Unexpected(format!("GET {path}: invalid body: {e}")))
    }

    async fn machine_exists(&self, machine_id: &str) -> Result<bool, OracleError> {
        let path = format!("/machine/{machine_id}");
        let status = self.get(&path).await?.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(OracleError::Unexpected(format!("GET {path} returned {status}")))
        }
    }
}

#[async_trait]
impl OwnershipOracle for HttpOwnershipOracle {
    async fn is_known_machine(
        &self,
        workspace_id: &str,
        machine_id: &str,
    ) -> Result<bool, OracleError> {
        let Some(workspace) = self.workspace(workspace_id).await? else {
            return Err(OracleError::NotFound(format!("workspace {workspace_id}")));
        };
        if workspace.lists_machine(machine_id) || workspace.status_is(&TRANSITIONAL_STATUSES) {
            return Ok(true);
        }
        self.machine_exists(machine_id).await
    }

    async fn has_runtime(&self, workspace_id: &str) -> Result<bool, OracleError> {
        Ok(self
            .workspace(workspace_id)
            .await?
            .is_some_and(|workspace| workspace.has_runtime()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle_for(server: &MockServer) -> HttpOwnershipOracle {
        HttpOwnershipOracle::new(&format!("{}/api/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    async fn serve_workspace(server: &MockServer, id: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/api/workspace/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_machine_listed_in_runtime_is_known() {
        let server = MockServer::start().await;
        serve_workspace(
            &server,
            "ws1",
            json!({"id": "ws1", "status": "RUNNING", "runtime": {"machines": {"m1": {"status": "RUNNING"}}}}),
        )
        .await;
        serve_workspace(
            &server,
            "ws2",
            json!({"status": "RUNNING", "runtime": {"machines": [{"id": "m2"}]}}),
        )
        .await;

        let oracle = oracle_for(&server);
        assert!(oracle.is_known_machine("ws1", "m1").await.unwrap());
        assert!(oracle.is_known_machine("ws2", "m2").await.unwrap());
    }

    #[tokio::test]
    async fn test_unlisted_machine_falls_back_to_machine_route() {
        let server = MockServer::start().await;
        serve_workspace(&server, "ws1", json!({"status": "RUNNING", "runtime": {"machines": {}}})).await;
        Mock::given(method("GET"))
            .and(path("/api/machine/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/machine/m2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let oracle = oracle_for(&server);
        assert!(oracle.is_known_machine("ws1", "m1").await.unwrap());
        assert!(!oracle.is_known_machine("ws1", "m2").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_workspace_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let oracle = oracle_for(&server);
        assert!(oracle.is_known_machine("gone", "m1").await.unwrap_err().is_not_found());
        assert!(!oracle.has_runtime("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_starting_workspace_keeps_unlisted_machines() {
        let server = MockServer::start().await;
        serve_workspace(&server, "ws1", json!({"status": "STARTING"})).await;

        let oracle = oracle_for(&server);
        assert!(oracle.is_known_machine("ws1", "m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_runtime_follows_workspace_status() {
        let server = MockServer::start().await;
        serve_workspace(&server, "running", json!({"status": "RUNNING", "runtime": {}})).await;
        serve_workspace(&server, "stopped", json!({"status": "STOPPED"})).await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let oracle = oracle_for(&server);
        assert!(oracle.has_runtime("running").await.unwrap());
        assert!(!oracle.has_runtime("stopped").await.unwrap());
        assert!(matches!(
            oracle.has_runtime("broken").await,
            Err(OracleError::Unexpected(_))
        ));
        assert!(matches!(
            oracle.has_runtime("garbled").await,
            Err(OracleError::Unexpected(_))
        ));
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workspace/ws1"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING"})))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = oracle_for(&server).with_token("secret");
        assert!(oracle.has_runtime("ws1").await.unwrap());
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpOwnershipOracle::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, OracleError::Unexpected(_)));
    }
}
