use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::tml::tools::error::{Result, ToolError, UnresolvedDependency};
use crate::tml::tools::model::{ContentObject, ObjectId};
use crate::tml::tools::remap::IdentifierMapping;

/// Directed graph over the objects of one migration run.
///
/// An edge `A -> B` means A references B, so B must be deployed first. Edges
/// only connect objects of the working set; references to objects that
/// already exist in the target environment are kept separately as external
/// references.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    objects: BTreeMap<ObjectId, ContentObject>,
    input_order: Vec<ObjectId>,
    dependencies: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
    external: BTreeMap<ObjectId, BTreeSet<ObjectId>>,
}

impl DependencyGraph {
    /// Builds the graph for `objects`. `mapping` holds the entries known
    /// before the run starts; a reference outside the working set must be one
    /// of them.
    pub fn build(objects: Vec<ContentObject>, mapping: &IdentifierMapping) -> Result<Self> {
        let mut by_id: BTreeMap<ObjectId, ContentObject> = BTreeMap::new();
        let mut input_order = Vec::with_capacity(objects.len());

        for object in objects {
            let id = object.identifier().to_string();
            if by_id.contains_key(&id) {
                return Err(ToolError::DuplicateIdentifier(id));
            }
            input_order.push(id.clone());
            by_id.insert(id, object);
        }

        let mut dependencies: BTreeMap<ObjectId, BTreeSet<ObjectId>> = BTreeMap::new();
        let mut external: BTreeMap<ObjectId, BTreeSet<ObjectId>> = BTreeMap::new();
        let mut unresolved = Vec::new();

        for id in &input_order {
            let object = &by_id[id];
            let local = dependencies.entry(id.clone()).or_default();
            for reference in object.references() {
                if by_id.contains_key(reference) {
                    local.insert(reference.clone());
                } else if mapping.contains(reference) {
                    external
                        .entry(id.clone())
                        .or_default()
                        .insert(reference.clone());
                } else {
                    unresolved.push(UnresolvedDependency {
                        object: id.clone(),
                        reference: reference.clone(),
                    });
                }
            }
        }

        if !unresolved.is_empty() {
            return Err(ToolError::UnresolvedReference(unresolved));
        }

        debug!(
            objects = by_id.len(),
            edges = dependencies.values().map(BTreeSet::len).sum::<usize>(),
            external = external.values().map(BTreeSet::len).sum::<usize>(),
            "dependency graph built"
        );

        Ok(Self {
            objects: by_id,
            input_order,
            dependencies,
            external,
        })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn object(&self, id: &str) -> Option<&ContentObject> {
        self.objects.get(id)
    }

    /// Identifiers in the order the objects were supplied.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.input_order.iter().map(String::as_str)
    }

    /// Working-set objects that `id` depends on.
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Already-deployed objects that `id` references.
    pub fn external_references_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.external
            .get(id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// All `(from, to)` edges inside the working set.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies.iter().flat_map(|(from, targets)| {
            targets
                .iter()
                .map(move |to| (from.as_str(), to.as_str()))
        })
    }

    pub(crate) fn into_objects(self) -> BTreeMap<ObjectId, ContentObject> {
        self.objects
    }
}
