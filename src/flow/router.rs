//! Condition routing — picks the next node after one finishes.

use rand::Rng;
use tracing::{debug, warn};

use crate::flow::model::{FlowDefinition, FlowNode, NodeType};

/// Find the node to execute after `current`, or `None` when the flow ends.
///
/// Routing rules:
/// - no outgoing edges: end.
/// - one edge: follow it unconditionally.
/// - multiple edges from a `conditions` node: first edge whose condition
///   matches the user message, in definition order. Edges with a missing
///   type or value are skipped. If nothing matched, a `default` edge wins;
///   failing that one edge is picked uniformly at random.
/// - multiple edges from any other node: follow the first.
pub fn next_node<'a>(
    flow: &'a FlowDefinition,
    current: &FlowNode,
    user_message: &str,
    rng: &mut impl Rng,
) -> Option<&'a FlowNode> {
    let edges = flow.outgoing(&current.id);

    if edges.is_empty() {
        debug!(node_id = %current.id, "No outgoing edges");
        return None;
    }

    if edges.len() == 1 {
        return flow.node(&edges[0].to);
    }

    if current.node_type == NodeType::Conditions {
        for edge in &edges {
            if edge.condition_type.is_empty() || edge.condition_value.is_empty() {
                continue;
            }
            if condition_matches(&edge.condition_type, &edge.condition_value, user_message) {
                debug!(
                    condition = %edge.condition_type,
                    value = %edge.condition_value,
                    to = %edge.to,
                    "Condition matched"
                );
                return flow.node(&edge.to);
            }
        }

        // Second pass catches default edges with no value set.
        for edge in &edges {
            if edge.condition_type.eq_ignore_ascii_case("default") {
                debug!(to = %edge.to, "Using default edge");
                return flow.node(&edge.to);
            }
        }

        let index = rng.gen_range(0..edges.len());
        debug!(index, total = edges.len(), to = %edges[index].to, "Random edge fallback");
        return flow.node(&edges[index].to);
    }

    warn!(node_id = %current.id, edges = edges.len(), "Multiple edges from non-conditions node, following first");
    flow.node(&edges[0].to)
}

fn condition_matches(condition_type: &str, condition_value: &str, user_message: &str) -> bool {
    let message = user_message.to_lowercase();
    let value = condition_value.to_lowercase();
    match condition_type.to_lowercase().as_str() {
        "equal" => message == value,
        "contains" | "match" => message.contains(&value),
        "default" => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::FlowDefinition;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn branching_flow() -> FlowDefinition {
        FlowDefinition::parse(
            r#"{
                "nodes": [
                    {"id": "cond", "type": "conditions"},
                    {"id": "yes", "type": "send_message"},
                    {"id": "maybe", "type": "send_message"},
                    {"id": "fallback", "type": "send_message"}
                ],
                "connections": [
                    {"from": "cond", "to": "yes", "conditionType": "equal", "conditionValue": "Yes"},
                    {"from": "cond", "to": "maybe", "conditionType": "contains", "conditionValue": "think"},
                    {"from": "cond", "to": "fallback", "conditionType": "default", "conditionValue": "x"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn no_edges_ends_flow() {
        let def = FlowDefinition::parse(
            r#"{"nodes": [{"id": "a", "type": "send_message"}], "connections": []}"#,
        )
        .unwrap();
        assert!(next_node(&def, def.node("a").unwrap(), "hi", &mut rng()).is_none());
    }

    #[test]
    fn single_edge_is_followed_unconditionally() {
        let def = FlowDefinition::parse(
            r#"{
                "nodes": [
                    {"id": "a", "type": "send_message"},
                    {"id": "b", "type": "send_message"}
                ],
                "connections": [{"from": "a", "to": "b"}]
            }"#,
        )
        .unwrap();
        let next = next_node(&def, def.node("a").unwrap(), "anything", &mut rng()).unwrap();
        assert_eq!(next.id, "b");
    }

    #[test]
    fn equal_is_case_insensitive_exact() {
        let def = branching_flow();
        let cond = def.node("cond").unwrap();
        assert_eq!(next_node(&def, cond, "YES", &mut rng()).unwrap().id, "yes");
        // Substring does not satisfy equal; "think" catches it instead.
        assert_eq!(
            next_node(&def, cond, "yes I think so", &mut rng()).unwrap().id,
            "maybe"
        );
    }

    #[test]
    fn first_matching_edge_wins_in_order() {
        let def = FlowDefinition::parse(
            r#"{
                "nodes": [
                    {"id": "cond", "type": "conditions"},
                    {"id": "a", "type": "send_message"},
                    {"id": "b", "type": "send_message"}
                ],
                "connections": [
                    {"from": "cond", "to": "a", "conditionType": "contains", "conditionValue": "ok"},
                    {"from": "cond", "to": "b", "conditionType": "contains", "conditionValue": "ok"}
                ]
            }"#,
        )
        .unwrap();
        let next = next_node(&def, def.node("cond").unwrap(), "ok", &mut rng()).unwrap();
        assert_eq!(next.id, "a");
    }

    #[test]
    fn unmatched_falls_to_default() {
        let def = branching_flow();
        let next = next_node(&def, def.node("cond").unwrap(), "nope", &mut rng()).unwrap();
        assert_eq!(next.id, "fallback");
    }

    #[test]
    fn bare_default_edge_caught_in_second_pass() {
        let def = FlowDefinition::parse(
            r#"{
                "nodes": [
                    {"id": "cond", "type": "conditions"},
                    {"id": "a", "type": "send_message"},
                    {"id": "b", "type": "send_message"}
                ],
                "connections": [
                    {"from": "cond", "to": "a", "conditionType": "equal", "conditionValue": "hi"},
                    {"from": "cond", "to": "b", "conditionType": "default", "conditionValue": ""}
                ]
            }"#,
        )
        .unwrap();
        // Empty value skips edge b in the ordered pass; the default pass takes it.
        let next = next_node(&def, def.node("cond").unwrap(), "nope", &mut rng()).unwrap();
        assert_eq!(next.id, "b");
    }

    #[test]
    fn random_fallback_always_picks_a_real_edge() {
        let def = FlowDefinition::parse(
            r#"{
                "nodes": [
                    {"id": "cond", "type": "conditions"},
                    {"id": "a", "type": "send_message"},
                    {"id": "b", "type": "send_message"}
                ],
                "connections": [
                    {"from": "cond", "to": "a", "conditionType": "equal", "conditionValue": "x"},
                    {"from": "cond", "to": "b", "conditionType": "equal", "conditionValue": "y"}
                ]
            }"#,
        )
        .unwrap();
        let cond = def.node("cond").unwrap();
        let mut seen = std::collections::HashSet::new();
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let next = next_node(&def, cond, "nope", &mut rng).unwrap();
            seen.insert(next.id.clone());
        }
        assert!(seen.contains("a") && seen.contains("b"));
    }

    #[test]
    fn non_conditions_multi_edge_follows_first() {
        let def = FlowDefinition::parse(
            r#"{
                "nodes": [
                    {"id": "msg", "type": "send_message"},
                    {"id": "a", "type": "send_message"},
                    {"id": "b", "type": "send_message"}
                ],
                "connections": [
                    {"from": "msg", "to": "a"},
                    {"from": "msg", "to": "b"}
                ]
            }"#,
        )
        .unwrap();
        let next = next_node(&def, def.node("msg").unwrap(), "hi", &mut rng()).unwrap();
        assert_eq!(next.id, "a");
    }
}
