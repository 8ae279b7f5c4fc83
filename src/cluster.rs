//! Cluster topology
//!
//! Static, ordered list of nodes loaded at startup. Every node excludes its own
//! entry to form its address book.

use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, ServerId};

/// One node of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub server_id: ServerId,
    pub ip: String,
    pub port: u16,
    /// Account owned by this node; `None` for the coordinator
    #[serde(default)]
    pub account_id: Option<AccountId>,
}

impl NodeEntry {
    /// Base URL of the node's RPC endpoint
    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}/rpc", self.ip, self.port)
    }

    pub fn owns(&self, account: &str) -> bool {
        self.account_id.as_deref() == Some(account)
    }
}

/// Cluster file contents
///
/// ```yaml
/// coordinator: coordinator
/// nodes:
///   - { server_id: coordinator, ip: 127.0.0.1, port: 8000 }
///   - { server_id: A, ip: 127.0.0.1, port: 8001, account_id: A }
///   - { server_id: B, ip: 127.0.0.1, port: 8002, account_id: B }
/// ```
///
/// A bare list of nodes is accepted too; its coordinator is `coordinator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ClusterFile")]
pub struct ClusterConfig {
    pub coordinator: ServerId,
    pub nodes: Vec<NodeEntry>,
}

/// Accepted on-disk shapes of the cluster file
#[derive(Deserialize)]
#[serde(untagged)]
enum ClusterFile {
    Full {
        #[serde(default = "default_coordinator_id")]
        coordinator: ServerId,
        nodes: Vec<NodeEntry>,
    },
    Bare(Vec<NodeEntry>),
}

impl From<ClusterFile> for ClusterConfig {
    fn from(file: ClusterFile) -> Self {
        match file {
            ClusterFile::Full { coordinator, nodes } => Self { coordinator, nodes },
            ClusterFile::Bare(nodes) => Self {
                coordinator: default_coordinator_id(),
                nodes,
            },
        }
    }
}

fn default_coordinator_id() -> ServerId {
    "coordinator".to_string()
}

impl ClusterConfig {
    /// Load and validate a cluster file (YAML; JSON is accepted as well)
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster file: {}", path.display()))?;
        let cluster: ClusterConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse cluster file: {}", path.display()))?;
        cluster.validate()?;
        Ok(cluster)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.entry(&self.coordinator).is_none() {
            bail!("Coordinator '{}' is not listed in nodes", self.coordinator);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].iter().any(|n| n.server_id == node.server_id) {
                bail!("Duplicate server_id '{}'", node.server_id);
            }
            if let Some(account) = &node.account_id
                && self.nodes[..i].iter().any(|n| n.owns(account))
            {
                bail!("Account '{}' is owned by more than one node", account);
            }
        }
        Ok(())
    }

    pub fn entry(&self, server_id: &str) -> Option<&NodeEntry> {
        self.nodes.iter().find(|n| n.server_id == server_id)
    }

    /// Peers of `server_id`, in cluster order
    pub fn address_book_for(&self, server_id: &str) -> AddressBook {
        AddressBook {
            coordinator: self.coordinator.clone(),
            peers: self
                .nodes
                .iter()
                .filter(|n| n.server_id != server_id)
                .cloned()
                .collect(),
        }
    }
}

/// A node's view of the rest of the cluster
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    coordinator: ServerId,
    peers: Vec<NodeEntry>,
}

impl AddressBook {
    pub fn new(coordinator: impl Into<ServerId>, peers: Vec<NodeEntry>) -> Self {
        Self {
            coordinator: coordinator.into(),
            peers,
        }
    }

    pub fn coordinator(&self) -> Option<&NodeEntry> {
        self.peers.iter().find(|n| n.server_id == self.coordinator)
    }

    /// Account-owning peers, in cluster order
    pub fn participants(&self) -> impl Iterator<Item = &NodeEntry> {
        self.peers.iter().filter(|n| n.account_id.is_some())
    }

    pub fn owner_of(&self, account: &str) -> Option<&NodeEntry> {
        self.peers.iter().find(|n| n.owns(account))
    }

    /// Position of a peer in cluster order
    pub fn position(&self, server_id: &str) -> Option<usize> {
        self.peers.iter().position(|n| n.server_id == server_id)
    }
}
