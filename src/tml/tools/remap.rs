use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::tml::tools::error::{Result, ToolError};
use crate::tml::tools::model::ObjectId;

/// Append-only bidirectional mapping between source-environment and
/// target-environment identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<ObjectId, ObjectId>", into = "BTreeMap<ObjectId, ObjectId>")]
pub struct IdentifierMapping {
    forward: BTreeMap<ObjectId, ObjectId>,
    reverse: BTreeMap<ObjectId, ObjectId>,
}

impl IdentifierMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target identifier recorded for `source`.
    pub fn resolve(&self, source: &str) -> Result<ObjectId> {
        self.get(source)
            .map(str::to_string)
            .ok_or_else(|| ToolError::UnmappedIdentifier(source.to_string()))
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.forward.get(source).map(String::as_str)
    }

    /// Source identifier that was mapped onto `target`.
    pub fn source_of(&self, target: &str) -> Option<&str> {
        self.reverse.get(target).map(String::as_str)
    }

    pub fn contains(&self, source: &str) -> bool {
        self.forward.contains_key(source)
    }

    /// Adds an entry. Existing entries are never replaced: a source that is
    /// already mapped, or a target already claimed by another source, is a
    /// [`ToolError::DuplicateMapping`].
    pub fn record(&mut self, source: impl Into<ObjectId>, target: impl Into<ObjectId>) -> Result<()> {
        let source = source.into();
        let target = target.into();

        if let Some(existing) = self.forward.get(&source) {
            return Err(ToolError::DuplicateMapping {
                source_id: source,
                existing: existing.clone(),
                attempted: target,
            });
        }
        if let Some(owner) = self.reverse.get(&target) {
            return Err(ToolError::DuplicateMapping {
                source_id: source,
                existing: format!("{target} owned by {owner}"),
                attempted: target,
            });
        }

        self.reverse.insert(target.clone(), source.clone());
        self.forward.insert(source, target);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Iterates `(source, target)` pairs ordered by source identifier.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward
            .iter()
            .map(|(source, target)| (source.as_str(), target.as_str()))
    }
}

impl From<BTreeMap<ObjectId, ObjectId>> for IdentifierMapping {
    // Persisted mappings are trusted as written; a target claimed twice keeps
    // its first source in the reverse index.
    fn from(forward: BTreeMap<ObjectId, ObjectId>) -> Self {
        let mut reverse = BTreeMap::new();
        for (source, target) in &forward {
            reverse
                .entry(target.clone())
                .or_insert_with(|| source.clone());
        }
        Self { forward, reverse }
    }
}

impl From<IdentifierMapping> for BTreeMap<ObjectId, ObjectId> {
    fn from(mapping: IdentifierMapping) -> Self {
        mapping.forward
    }
}

/// Identifier mapping shared between the deployment workers of one run.
///
/// Writes are serialised through a mutex. Workers read from a
/// [`Remapper::snapshot`] taken at the batch boundary, which already holds
/// every entry written by earlier batches.
#[derive(Debug, Default)]
pub struct Remapper {
    mapping: Mutex<IdentifierMapping>,
}

impl Remapper {
    pub fn new(seed: IdentifierMapping) -> Self {
        Self {
            mapping: Mutex::new(seed),
        }
    }

    pub fn resolve(&self, source: &str) -> Result<ObjectId> {
        self.lock().resolve(source)
    }

    pub fn record(&self, source: impl Into<ObjectId>, target: impl Into<ObjectId>) -> Result<()> {
        self.lock().record(source, target)
    }

    pub fn snapshot(&self) -> IdentifierMapping {
        self.lock().clone()
    }

    pub fn into_mapping(self) -> IdentifierMapping {
        self.mapping
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdentifierMapping> {
        // Entries are inserted in a single step, so a poisoned guard still
        // holds a consistent mapping.
        self.mapping.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_resolve_both_directions() {
        let mut mapping = IdentifierMapping::new();
        mapping.record("T1", "t-100").expect("entry recorded");

        assert_eq!(mapping.resolve("T1").expect("mapped"), "t-100");
        assert_eq!(mapping.source_of("t-100"), Some("T1"));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn entries_are_never_overwritten() {
        let mut mapping = IdentifierMapping::new();
        mapping.record("T1", "t-100").expect("entry recorded");

        let err = mapping.record("T1", "t-200").expect_err("duplicate rejected");
        assert!(matches!(err, ToolError::DuplicateMapping { ref existing, .. } if existing == "t-100"));
        assert_eq!(mapping.resolve("T1").expect("mapped"), "t-100");
    }

    #[test]
    fn a_target_belongs_to_one_source() {
        let mut mapping = IdentifierMapping::new();
        mapping.record("T1", "t-100").expect("entry recorded");
        assert!(mapping.record("T2", "t-100").is_err());
        assert!(!mapping.contains("T2"));
    }

    #[test]
    fn unknown_source_is_unmapped() {
        let mapping = IdentifierMapping::new();
        assert!(matches!(
            mapping.resolve("W1"),
            Err(ToolError::UnmappedIdentifier(id)) if id == "W1"
        ));
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let remapper = Remapper::new(IdentifierMapping::new());
        remapper.record("T1", "t-1").expect("entry recorded");
        let snapshot = remapper.snapshot();
        remapper.record("W1", "w-1").expect("entry recorded");

        assert!(snapshot.contains("T1"));
        assert!(!snapshot.contains("W1"));
        assert_eq!(remapper.into_mapping().len(), 2);
    }

    #[test]
    fn serialises_as_a_plain_object() {
        let mut mapping = IdentifierMapping::new();
        mapping.record("T1", "t-1").expect("entry recorded");
        let json = serde_json::to_value(&mapping).expect("serialisable");
        assert_eq!(json, serde_json::json!({ "T1": "t-1" }));

        let restored: IdentifierMapping = serde_json::from_value(json).expect("deserialisable");
        assert_eq!(restored.source_of("t-1"), Some("T1"));
    }
}
