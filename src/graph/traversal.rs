//! Bounded breadth-first expansion over stored entity records.
//!
//! Expansion proceeds one hop per round, the way a recursive graph lookup
//! does: the frontier's neighbour keys are fetched in one batch, keys seen
//! before are never revisited, and nothing beyond `max_depth` hops is read.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::graph::entity::{Attributes, Entity};
use crate::graph::error::GraphError;
use crate::graph::store::RecordStore;

/// Which edges a traversal follows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Only edges stored on the current record
    Outgoing,
    /// Stored edges plus edges pointing at the current record
    #[default]
    Both,
}

impl FromStr for Direction {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outgoing" | "out" => Ok(Direction::Outgoing),
            "both" => Ok(Direction::Both),
            other => Err(GraphError::InvalidConfig(format!(
                "unknown traversal direction '{}', expected outgoing or both",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outgoing => write!(f, "outgoing"),
            Direction::Both => write!(f, "both"),
        }
    }
}

/// A flattened edge of a retrieved subgraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeRecord {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub attributes: Attributes,
}

/// Entities reached from the start set and the edges between them
#[derive(Debug, Clone, Default, Serialize)]
pub struct Subgraph {
    /// Ordered by hop distance, then key
    pub entities: Vec<Entity>,
    pub edges: Vec<EdgeRecord>,
    /// Hop distance of every reached entity
    pub depths: BTreeMap<String, usize>,
    /// The depth bound stopped expansion while unvisited neighbours remained
    pub depth_limited: bool,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.depths.contains_key(id)
    }

    pub fn edges_of_type<'a>(&'a self, relation_type: &'a str) -> impl Iterator<Item = &'a EdgeRecord> {
        self.edges
            .iter()
            .filter(move |e| e.relation_type.eq_ignore_ascii_case(relation_type))
    }

    pub fn max_depth_reached(&self) -> usize {
        self.depths.values().copied().max().unwrap_or(0)
    }
}

/// Expand outward from `start` for at most `max_depth` hops
pub async fn traverse(
    store: &dyn RecordStore,
    start: &[String],
    max_depth: usize,
    direction: Direction,
) -> Result<Subgraph, GraphError> {
    let start_ids: Vec<String> = start
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut seen: HashSet<String> = start_ids.iter().cloned().collect();
    let mut depths: BTreeMap<String, usize> = BTreeMap::new();
    let mut reached: Vec<Entity> = Vec::new();
    let mut depth_limited = false;

    let mut frontier = store.get_many(&start_ids).await?;
    let mut depth = 0;

    loop {
        for entity in &frontier {
            depths.insert(entity.id.clone(), depth);
        }

        let mut next_ids = BTreeSet::new();
        for entity in &frontier {
            for target in entity.relationships.target_ids() {
                if !seen.contains(target) {
                    next_ids.insert(target.clone());
                }
            }
            if direction == Direction::Both {
                for source in store.referencing(&entity.id).await? {
                    if !seen.contains(&source.id) {
                        next_ids.insert(source.id);
                    }
                }
            }
        }
        reached.append(&mut frontier);

        if next_ids.is_empty() {
            break;
        }
        if depth == max_depth {
            depth_limited = true;
            break;
        }

        seen.extend(next_ids.iter().cloned());
        let next_ids: Vec<String> = next_ids.into_iter().collect();
        frontier = store.get_many(&next_ids).await?;
        depth += 1;

        if frontier.is_empty() {
            break;
        }
    }

    // Keys that were proposed as neighbours but have no record
    let dangling: HashSet<&String> = seen.iter().filter(|id| !depths.contains_key(*id)).collect();

    let edges = reached
        .iter()
        .flat_map(|entity| {
            entity.edges().map(move |edge| EdgeRecord {
                source_id: entity.id.clone(),
                target_id: edge.target_id.to_string(),
                relation_type: edge.relation_type.to_string(),
                attributes: edge.attributes.clone(),
            })
        })
        .filter(|edge| depths.contains_key(&edge.target_id) || dangling.contains(&edge.target_id))
        .collect();

    reached.sort_by(|a, b| depths[&a.id].cmp(&depths[&b.id]).then_with(|| a.id.cmp(&b.id)));

    debug!(
        start = start_ids.len(),
        reached = reached.len(),
        depth_limited,
        "traversal finished"
    );

    Ok(Subgraph {
        entities: reached,
        edges,
        depths,
        depth_limited,
    })
}
