//! Flow definition model, parsed from the stored JSON wire format.
//!
//! Wire shape:
//! `{"nodes": [{"id", "type", "config": {...}}],
//!   "connections": [{"from", "to", "conditionType", "conditionValue"}]}`

use serde::Deserialize;

use crate::error::FlowError;

/// Node variants the engine understands. Unrecognized type strings
/// deserialize to `Unknown` and are skipped at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    SendMessage,
    SendImage,
    SendAudio,
    SendVideo,
    Delay,
    WaitingReply,
    WaitingTimes,
    Stage,
    Conditions,
    AiPrompt,
    #[serde(other)]
    Unknown,
}

/// A single node in a flow graph.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl FlowNode {
    /// A string config value, if present and non-empty.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// A numeric config value.
    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(|v| v.as_f64())
    }
}

/// A directed edge between two nodes, optionally carrying a condition.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    #[serde(default, rename = "conditionType")]
    pub condition_type: String,
    #[serde(default, rename = "conditionValue")]
    pub condition_value: String,
}

/// A parsed flow graph.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowDefinition {
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub connections: Vec<FlowEdge>,
}

impl FlowDefinition {
    /// Parse a stored `nodes_data` blob.
    pub fn parse(raw: &str) -> Result<Self, FlowError> {
        if raw.trim().is_empty() {
            return Err(FlowError::EmptyDefinition);
        }
        let def: FlowDefinition =
            serde_json::from_str(raw).map_err(|e| FlowError::InvalidDefinition(e.to_string()))?;
        if def.nodes.is_empty() {
            return Err(FlowError::EmptyDefinition);
        }
        Ok(def)
    }

    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All edges leaving `id`, in definition order.
    pub fn outgoing(&self, id: &str) -> Vec<&FlowEdge> {
        self.connections.iter().filter(|e| e.from == id).collect()
    }

    /// Pick the node a fresh execution starts from.
    ///
    /// With no stage hint (or the literal hint "start"): the first
    /// non-start node with no incoming edges, else the first node.
    /// With a hint: the node whose id equals the hint, else the first
    /// node.
    pub fn resolve_start(&self, stage_hint: Option<&str>) -> Option<&FlowNode> {
        let hint = stage_hint.unwrap_or("");
        if hint.is_empty() || hint == "start" {
            for node in &self.nodes {
                if node.node_type == NodeType::Start {
                    continue;
                }
                let has_incoming = self.connections.iter().any(|e| e.to == node.id);
                if !has_incoming {
                    return Some(node);
                }
            }
            return self.nodes.first();
        }

        if let Some(node) = self.node(hint) {
            return Some(node);
        }
        self.nodes.first()
    }
}
