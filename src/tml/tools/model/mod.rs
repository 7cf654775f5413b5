use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::tml::tools::error::{Result, ToolError};

/// Identifier of a content object. Identifiers are opaque GUID strings; the
/// source and target environments each have their own identifier space.
pub type ObjectId = String;

/// The closed set of content kinds the migration engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Connection,
    Table,
    View,
    SqlView,
    Worksheet,
    Model,
    Answer,
    Liveboard,
}

impl ContentKind {
    pub const ALL: [ContentKind; 8] = [
        ContentKind::Connection,
        ContentKind::Table,
        ContentKind::View,
        ContentKind::SqlView,
        ContentKind::Worksheet,
        ContentKind::Model,
        ContentKind::Answer,
        ContentKind::Liveboard,
    ];

    /// Top-level key under which the object body is stored in a TML document.
    pub fn tml_key(self) -> &'static str {
        match self {
            ContentKind::Connection => "connection",
            ContentKind::Table => "table",
            ContentKind::View => "view",
            ContentKind::SqlView => "sql_view",
            ContentKind::Worksheet => "worksheet",
            ContentKind::Model => "model",
            ContentKind::Answer => "answer",
            ContentKind::Liveboard => "liveboard",
        }
    }

    /// Resolves a TML top-level key. `pinboard` is the legacy name for
    /// liveboards and is still found in older exports.
    pub fn from_tml_key(key: &str) -> Option<Self> {
        match key {
            "pinboard" => Some(ContentKind::Liveboard),
            other => Self::ALL.into_iter().find(|kind| kind.tml_key() == other),
        }
    }

    /// Metadata type reported by the platform for objects of this kind.
    pub fn metadata_type(self) -> &'static str {
        match self {
            ContentKind::Connection => "DATA_SOURCE",
            ContentKind::Table
            | ContentKind::View
            | ContentKind::SqlView
            | ContentKind::Worksheet
            | ContentKind::Model => "LOGICAL_TABLE",
            ContentKind::Answer => "QUESTION_ANSWER_BOOK",
            ContentKind::Liveboard => "PINBOARD_ANSWER_BOOK",
        }
    }

    /// Paths inside the object body whose `fqn` values name other objects.
    /// A `*` segment fans out over every element of a sequence.
    fn reference_slots(self) -> &'static [&'static [&'static str]] {
        match self {
            ContentKind::Connection => &[],
            ContentKind::Table => &[
                &["connection", "fqn"],
                &["joins_with", "*", "destination", "fqn"],
            ],
            ContentKind::View => &[
                &["tables", "*", "fqn"],
                &["joins_with", "*", "destination", "fqn"],
            ],
            ContentKind::SqlView => &[&["connection", "fqn"]],
            ContentKind::Worksheet | ContentKind::Answer => &[&["tables", "*", "fqn"]],
            ContentKind::Model => &[&["model_tables", "*", "fqn"]],
            ContentKind::Liveboard => &[
                &["visualizations", "*", "answer", "fqn"],
                &["visualizations", "*", "answer", "tables", "*", "fqn"],
            ],
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.tml_key())
    }
}

/// One deployable unit of content together with the identifiers it depends
/// on.
///
/// The fields are private so the no-self-reference invariant established by
/// [`ContentObject::new`] cannot be broken afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentObject {
    identifier: ObjectId,
    kind: ContentKind,
    name: String,
    payload: Value,
    references: Vec<ObjectId>,
}

impl ContentObject {
    /// Builds an object from its parsed body, extracting references from the
    /// kind's reference slots.
    pub fn new(identifier: impl Into<ObjectId>, kind: ContentKind, payload: Value) -> Result<Self> {
        let identifier = identifier.into();
        let references = extract_references(kind, &payload);
        if references.iter().any(|reference| *reference == identifier) {
            return Err(ToolError::SelfReference(identifier));
        }

        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            identifier,
            kind,
            name,
            payload,
            references,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Identifiers this object depends on, in order of first appearance.
    pub fn references(&self) -> &[ObjectId] {
        &self.references
    }

    /// Returns a copy of the object whose reference slots hold the
    /// identifiers produced by `resolve`. The identifier of the object itself
    /// is left untouched; the first failed lookup aborts the substitution.
    pub fn remapped<F>(&self, mut resolve: F) -> Result<ContentObject>
    where
        F: FnMut(&str) -> Result<ObjectId>,
    {
        let mut payload = self.payload.clone();
        for slot in self.kind.reference_slots() {
            rewrite_slot(&mut payload, slot, &mut resolve)?;
        }
        let references = extract_references(self.kind, &payload);

        Ok(ContentObject {
            identifier: self.identifier.clone(),
            kind: self.kind,
            name: self.name.clone(),
            payload,
            references,
        })
    }
}

fn extract_references(kind: ContentKind, payload: &Value) -> Vec<ObjectId> {
    let mut found = Vec::new();
    for slot in kind.reference_slots() {
        collect_slot(payload, slot, &mut found);
    }

    let mut references: Vec<ObjectId> = Vec::with_capacity(found.len());
    for reference in found {
        if !reference.is_empty() && !references.iter().any(|known| known == reference) {
            references.push(reference.to_string());
        }
    }
    references
}

fn collect_slot<'v>(value: &'v Value, path: &[&str], out: &mut Vec<&'v str>) {
    match path.split_first() {
        None => {
            if let Some(reference) = value.as_str() {
                out.push(reference);
            }
        }
        Some((&"*", rest)) => {
            if let Some(items) = value.as_sequence() {
                for item in items {
                    collect_slot(item, rest, out);
                }
            }
        }
        Some((key, rest)) => {
            if let Some(child) = value.get(*key) {
                collect_slot(child, rest, out);
            }
        }
    }
}

fn rewrite_slot<F>(value: &mut Value, path: &[&str], resolve: &mut F) -> Result<()>
where
    F: FnMut(&str) -> Result<ObjectId>,
{
    match path.split_first() {
        None => {
            let replacement = match value.as_str() {
                Some(reference) if !reference.is_empty() => resolve(reference)?,
                _ => return Ok(()),
            };
            *value = Value::String(replacement);
        }
        Some((&"*", rest)) => {
            if let Some(items) = value.as_sequence_mut() {
                for item in items {
                    rewrite_slot(item, rest, resolve)?;
                }
            }
        }
        Some((key, rest)) => {
            if let Some(child) = value.get_mut(*key) {
                rewrite_slot(child, rest, resolve)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).expect("valid yaml")
    }

    #[test]
    fn worksheet_references_follow_table_order() {
        let payload = body(
            r#"
name: Sales
tables:
  - name: orders
    fqn: T2
  - name: customers
    fqn: T1
  - name: orders_again
    fqn: T2
"#,
        );
        let object = ContentObject::new("W1", ContentKind::Worksheet, payload)
            .expect("valid object");
        assert_eq!(object.references(), ["T2", "T1"]);
        assert_eq!(object.name(), "Sales");
    }

    #[test]
    fn liveboard_collects_saved_and_embedded_answers() {
        let payload = body(
            r#"
name: Board
visualizations:
  - id: viz_1
    answer:
      fqn: A1
  - id: viz_2
    answer:
      name: inline
      tables:
        - name: Sales
          fqn: W1
"#,
        );
        let object = ContentObject::new("L1", ContentKind::Liveboard, payload)
            .expect("valid object");
        assert_eq!(object.references(), ["A1", "W1"]);
    }

    #[test]
    fn self_reference_is_rejected() {
        let payload = body("name: loop\ntables:\n  - fqn: W1\n");
        let err = ContentObject::new("W1", ContentKind::Worksheet, payload)
            .expect_err("self reference rejected");
        assert!(matches!(err, ToolError::SelfReference(id) if id == "W1"));
    }

    #[test]
    fn tables_without_fqn_have_no_references() {
        let payload = body("name: t\nconnection:\n  name: warehouse\n");
        let object = ContentObject::new("T1", ContentKind::Table, payload).expect("valid object");
        assert!(object.references().is_empty());
    }

    #[test]
    fn remapping_rewrites_every_slot() {
        let payload = body(
            r#"
name: orders
connection:
  name: warehouse
  fqn: C1
joins_with:
  - name: to_customers
    destination:
      name: customers
      fqn: T9
"#,
        );
        let object = ContentObject::new("T1", ContentKind::Table, payload).expect("valid object");
        let remapped = object
            .remapped(|source| Ok(format!("{source}-target")))
            .expect("remapped");

        assert_eq!(remapped.identifier(), "T1");
        assert_eq!(remapped.references(), ["C1-target", "T9-target"]);
        assert_eq!(
            remapped.payload()["joins_with"][0]["destination"]["fqn"].as_str(),
            Some("T9-target")
        );
        assert_eq!(object.references(), ["C1", "T9"]);
    }

    #[test]
    fn remapping_stops_at_first_unknown_reference() {
        let payload = body("name: a\ntables:\n  - fqn: W1\n");
        let object = ContentObject::new("A1", ContentKind::Answer, payload).expect("valid object");
        let err = object
            .remapped(|source| Err(ToolError::UnmappedIdentifier(source.to_string())))
            .expect_err("unknown reference rejected");
        assert!(matches!(err, ToolError::UnmappedIdentifier(id) if id == "W1"));
    }

    #[test]
    fn legacy_pinboard_key_is_a_liveboard() {
        assert_eq!(ContentKind::from_tml_key("pinboard"), Some(ContentKind::Liveboard));
        assert_eq!(ContentKind::from_tml_key("sql_view"), Some(ContentKind::SqlView));
        assert_eq!(ContentKind::from_tml_key("guid"), None);
    }
}
