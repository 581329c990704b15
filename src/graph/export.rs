use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

use crate::graph::entity::Entity;
use crate::graph::error::GraphError;
use crate::graph::traversal::Subgraph;

/// Stored entities as a directed graph, for rendering and inspection
pub struct EntityGraph {
    /// Node weights are entity keys, edge weights relationship types
    graph: DiGraph<String, String>,
    /// Mapping from entity key to node index
    node_map: HashMap<String, NodeIndex>,
}

impl EntityGraph {
    /// Build the graph; edge targets without a record become plain nodes
    pub fn from_entities(entities: &[Entity]) -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        };

        for entity in entities {
            graph.node(&entity.id);
        }
        for entity in entities {
            let from = graph.node(&entity.id);
            for edge in entity.edges() {
                let to = graph.node(edge.target_id);
                graph.graph.add_edge(from, to, edge.relation_type.to_string());
            }
        }
        graph
    }

    /// Build the graph from a traversal result, drawing only the edges it
    /// kept so nothing past the depth bound appears
    pub fn from_subgraph(subgraph: &Subgraph) -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        };

        for entity in &subgraph.entities {
            graph.node(&entity.id);
        }
        for edge in &subgraph.edges {
            let from = graph.node(&edge.source_id);
            let to = graph.node(&edge.target_id);
            graph.graph.add_edge(from, to, edge.relation_type.clone());
        }
        graph
    }

    fn node(&mut self, id: &str) -> NodeIndex {
        if let Some(idx) = self.node_map.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.node_map.insert(id.to_string(), idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Keys with an edge from `id`, in insertion order
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let Some(idx) = self.node_map.get(id) else {
            return Vec::new();
        };
        let mut keys: Vec<&str> = self
            .graph
            .neighbors_directed(*idx, Direction::Outgoing)
            .map(|n| self.graph[n].as_str())
            .collect();
        // petgraph yields the newest edge first
        keys.reverse();
        keys
    }

    /// Graphviz rendering
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.graph))
    }
}

/// One JSON record per line, in the snapshot wire format
pub fn to_jsonl(entities: &[Entity]) -> Result<String, GraphError> {
    let mut out = String::new();
    for entity in entities {
        out.push_str(&serde_json::to_string(entity)?);
        out.push('\n');
    }
    Ok(out)
}
