//! [`ContainerRuntime`] backed by the `docker` command line client.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    ContainerRecord, ContainerRuntime, NetworkFilter, NetworkMember, NetworkRecord, RuntimeError,
};
use crate::config::DockerConfig;

/// Talks to the Docker daemon by running the `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: Option<String>,
    timeout: Duration,
}

impl DockerCli {
    /// Create a client for the given binary with a 60 second command timeout.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            host: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Build a client from configuration.
    pub fn from_config(config: &DockerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            host: config.host.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    /// Daemon socket to pass as `-H`.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Upper bound for a single command.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let command = format!("docker {}", args.join(" "));
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.host {
            cmd.arg("-H").arg(host);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!(command = %command, "Running docker command");
        let Ok(output) = tokio::time::timeout(self.timeout, cmd.output()).await else {
            return Err(RuntimeError::Timeout {
                command,
                seconds: self.timeout.as_secs(),
            });
        };
        let output = output.map_err(|source| RuntimeError::Io {
            command: command.clone(),
            source,
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_not_found(&stderr) {
            Err(RuntimeError::NotFound(stderr))
        } else {
            Err(RuntimeError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr,
            })
        }
    }

    async fn inspect_network(&self, id: &str) -> Result<Option<NetworkRecord>, RuntimeError> {
        let stdout = match self.run(&["network", "inspect", id]).await {
            Ok(stdout) => stdout,
            Err(RuntimeError::NotFound(message)) => {
                debug!(network_id = %id, message = %message, "Network disappeared before inspect");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let mut networks = parse_network_inspect(&stdout).map_err(|reason| RuntimeError::Parse {
            command: format!("docker network inspect {id}"),
            reason,
        })?;
        Ok(networks.pop())
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.to_ascii_lowercase().contains("no such ")
}

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "State", default)]
    state: Option<String>,
}

/// Parse `docker ps --format '{{json .}}'` output, one object per line.
fn parse_containers(stdout: &str) -> Result<Vec<ContainerRecord>, String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let ps: PsLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
            Ok(ContainerRecord {
                id: ps.id,
                names: ps
                    .names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
                status: ps.status,
                state: ps.state.filter(|state| !state.is_empty()),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Containers", default)]
    containers: Option<HashMap<String, InspectMember>>,
}

#[derive(Debug, Deserialize)]
struct InspectMember {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "IPv4Address", default)]
    ipv4_address: Option<String>,
}

/// Parse `docker network inspect` output (a JSON array).
fn parse_network_inspect(stdout: &str) -> Result<Vec<NetworkRecord>, String> {
    let networks: Vec<InspectNetwork> = serde_json::from_str(stdout).map_err(|e| e.to_string())?;
    Ok(networks
        .into_iter()
        .map(|network| NetworkRecord {
            id: network.id,
            name: network.name,
            containers: network
                .containers
                .unwrap_or_default()
                .into_iter()
                .map(|(id, member)| {
                    (
                        id,
                        NetworkMember {
                            name: member.name,
                            ipv4_address: member.ipv4_address.filter(|ip| !ip.is_empty()),
                        },
                    )
                })
                .collect(),
        })
        .collect())
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let args = ["ps", "--all", "--no-trunc", "--format", "{{json .}}"];
        let stdout = self.run(&args).await?;
        parse_containers(&stdout).map_err(|reason| RuntimeError::Parse {
            command: format!("docker {}", args.join(" ")),
            reason,
        })
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["kill", id]).await.map(drop)
    }

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        let mut args = vec!["rm"];
        if force {
            args.push("--force");
        }
        if remove_volumes {
            args.push("--volumes");
        }
        args.push(id);
        self.run(&args).await.map(drop)
    }

    async fn get_networks(&self, filter: &NetworkFilter) -> Result<Vec<NetworkRecord>, RuntimeError> {
        let mut args = vec![
            "network".to_string(),
            "ls".to_string(),
            "--no-trunc".to_string(),
            "--format".to_string(),
            "{{.ID}}".to_string(),
        ];
        if let Some(name) = &filter.name {
            args.push("--filter".to_string());
            args.push(format!("name={name}"));
        }
        if let Some(driver) = &filter.driver {
            args.push("--filter".to_string());
            args.push(format!("driver={driver}"));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&args).await?;

        let mut networks = Vec::new();
        for id in stdout.lines().map(str::trim).filter(|id| !id.is_empty()) {
            if let Some(network) = self.inspect_network(id).await? {
                networks.push(network);
            }
        }
        Ok(networks)
    }

    async fn remove_network(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["network", "rm", id]).await.map(drop)
    }
}
