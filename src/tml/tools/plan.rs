use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info};

use crate::tml::tools::error::{Result, ToolError};
use crate::tml::tools::graph::DependencyGraph;
use crate::tml::tools::model::{ContentObject, ObjectId};

/// Objects whose dependencies are all satisfied by earlier batches. Objects
/// inside one batch share no edge and may be deployed in any order.
#[derive(Debug, Clone)]
pub struct DeploymentBatch {
    pub index: usize,
    pub objects: Vec<ContentObject>,
}

impl DeploymentBatch {
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(ContentObject::identifier)
    }
}

/// Ordered deployment batches for one run.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPlan {
    pub batches: Vec<DeploymentBatch>,
}

impl DeploymentPlan {
    /// Index of the batch holding `id`.
    pub fn batch_index(&self, id: &str) -> Option<usize> {
        self.batches
            .iter()
            .find(|batch| batch.identifiers().any(|candidate| candidate == id))
            .map(|batch| batch.index)
    }

    pub fn object_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.objects.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Orders the graph into deployment batches by repeatedly peeling off the
/// frontier of objects with no remaining working-set dependencies.
///
/// Fails with [`ToolError::CycleDetected`] when the frontier empties while
/// objects remain; cycles are reported, never broken.
pub fn plan(graph: DependencyGraph) -> Result<DeploymentPlan> {
    let mut remaining: BTreeMap<ObjectId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<ObjectId, Vec<ObjectId>> = BTreeMap::new();

    for id in graph.identifiers() {
        remaining.insert(id.to_string(), graph.dependencies_of(id).count());
        for dependency in graph.dependencies_of(id) {
            dependents
                .entry(dependency.to_string())
                .or_default()
                .push(id.to_string());
        }
    }

    let mut layers: Vec<BTreeSet<ObjectId>> = Vec::new();
    loop {
        let frontier: BTreeSet<ObjectId> = remaining
            .iter()
            .filter(|(_, pending)| **pending == 0)
            .map(|(id, _)| id.clone())
            .collect();

        if frontier.is_empty() {
            break;
        }

        for id in &frontier {
            remaining.remove(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(pending) = remaining.get_mut(dependent) {
                    *pending -= 1;
                }
            }
        }
        debug!(batch = layers.len(), size = frontier.len(), "frontier computed");
        layers.push(frontier);
    }

    if !remaining.is_empty() {
        let stuck: BTreeSet<&str> = remaining.keys().map(String::as_str).collect();
        return Err(cycle_error(&graph, &stuck));
    }

    let mut objects = graph.into_objects();
    let batches: Vec<DeploymentBatch> = layers
        .into_iter()
        .enumerate()
        .map(|(index, layer)| DeploymentBatch {
            index,
            objects: layer
                .iter()
                .filter_map(|id| objects.remove(id))
                .collect(),
        })
        .collect();

    let plan = DeploymentPlan { batches };
    info!(
        batches = plan.batches.len(),
        objects = plan.object_count(),
        "deployment plan ready"
    );
    Ok(plan)
}

/// Builds the cycle report for the objects left over after batching. Those
/// objects are either on a cycle or downstream of one; strongly connected
/// components separate the two.
fn cycle_error(graph: &DependencyGraph, stuck: &BTreeSet<&str>) -> ToolError {
    let mut digraph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for &id in stuck {
        indices.insert(id, digraph.add_node(id));
    }
    for (from, to) in graph.edges() {
        if let (Some(&a), Some(&b)) = (indices.get(from), indices.get(to)) {
            digraph.add_edge(a, b, ());
        }
    }

    let mut components: Vec<Vec<String>> = tarjan_scc(&digraph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .map(|component| {
            let mut ids: Vec<String> = component
                .into_iter()
                .map(|index| digraph[index].to_string())
                .collect();
            ids.sort();
            ids
        })
        .collect();
    components.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    let cycle = components
        .first()
        .map(|component| shortest_cycle(graph, component))
        .unwrap_or_default();

    ToolError::CycleDetected { cycle, components }
}

/// Shortest cycle through the members of one strongly connected component,
/// found by breadth-first search from each member in turn.
fn shortest_cycle(graph: &DependencyGraph, component: &[String]) -> Vec<String> {
    let members: BTreeSet<&str> = component.iter().map(String::as_str).collect();
    let mut best: Option<Vec<String>> = None;

    for start in &members {
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([*start]);
        let mut closing: Option<&str> = None;

        'search: while let Some(current) = queue.pop_front() {
            for next in graph.dependencies_of(current) {
                if !members.contains(next) {
                    continue;
                }
                if next == *start {
                    closing = Some(current);
                    break 'search;
                }
                if !parents.contains_key(next) {
                    parents.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        let Some(mut cursor) = closing else {
            continue;
        };
        let mut path = vec![cursor.to_string()];
        while cursor != *start {
            cursor = parents[cursor];
            path.push(cursor.to_string());
        }
        path.reverse();

        if best.as_ref().is_none_or(|current| path.len() < current.len()) {
            best = Some(path);
        }
    }

    best.unwrap_or_else(|| component.to_vec())
}
