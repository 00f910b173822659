//! Naming conventions for managed containers and networks.
//!
//! Managed containers are named `workspace<16>_machine<16>_<suffix>` (Docker
//! may report the name with a leading `/`). Managed networks are named
//! `workspace<16>_<16>`. Identifiers are lowercase alphanumerics.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CONTAINER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/?(workspace[0-9a-z]{16})_(machine[0-9a-z]{16})_.+$")
        .expect("container name pattern is valid")
});

static NETWORK_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(workspace[0-9a-z]{16})_[0-9a-z]{16}$").expect("network name pattern is valid")
});

/// Identifiers encoded in a managed container name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerNameInfo {
    /// Owning workspace, e.g. `workspace0123456789abcdef`.
    pub workspace_id: String,
    /// Owning machine, e.g. `machine0123456789abcdef`.
    pub machine_id: String,
}

/// Extracts ownership from container names.
pub trait ContainerNameParser: Send + Sync {
    /// Returns `None` when the name does not follow the managed convention.
    fn parse(&self, name: &str) -> Option<ContainerNameInfo>;
}

/// Parser for the `workspace<16>_machine<16>_<suffix>` convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNameParser;

impl ContainerNameParser for DefaultNameParser {
    fn parse(&self, name: &str) -> Option<ContainerNameInfo> {
        let captures = CONTAINER_NAME.captures(name)?;
        Some(ContainerNameInfo {
            workspace_id: captures[1].to_string(),
            machine_id: captures[2].to_string(),
        })
    }
}

/// Workspace id encoded in a managed network name.
pub fn workspace_id_of_network(name: &str) -> Option<&str> {
    NETWORK_NAME
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WS: &str = "workspace0123456789abcdef";
    const MACHINE: &str = "machinefedcba9876543210";

    #[test]
    fn test_parse_managed_container_name() {
        let name = format!("/{WS}_{MACHINE}_user_dev-machine");
        let info = DefaultNameParser.parse(&name).unwrap();
        assert_eq!(info.workspace_id, WS);
        assert_eq!(info.machine_id, MACHINE);

        let without_slash = format!("{WS}_{MACHINE}_ws");
        assert!(DefaultNameParser.parse(&without_slash).is_some());
    }

    #[test]
    fn test_reject_foreign_container_names() {
        assert!(DefaultNameParser.parse("postgres").is_none());
        assert!(DefaultNameParser.parse(&format!("{WS}_{MACHINE}")).is_none());
        assert!(DefaultNameParser.parse("workspaceshort_machineshort_x").is_none());
        assert!(DefaultNameParser
            .parse("workspace0123456789ABCDEF_machine0123456789abcdef_x")
            .is_none());
    }

    #[test]
    fn test_network_names() {
        let name = format!("{WS}_0123456789abcdef");
        assert_eq!(workspace_id_of_network(&name), Some(WS));

        assert!(workspace_id_of_network("bridge").is_none());
        assert!(workspace_id_of_network(&format!("{WS}_0123456789abcdef_extra")).is_none());
        assert_eq!(workspace_id_of_network(&format!("{WS}_short")), None);
    }
}
