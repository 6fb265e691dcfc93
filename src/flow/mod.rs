//! Flow definitions, condition routing, and the execution engine.

pub mod executor;
pub mod model;
pub mod processors;
pub mod router;
pub mod templates;

pub use executor::FlowExecutor;
pub use model::{FlowDefinition, FlowEdge, FlowNode, NodeType};
