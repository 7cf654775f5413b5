use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;
use uuid::Uuid;

use crate::tml::tools::error::{Result, ToolError};
use crate::tml::tools::io::mapping::MAPPING_DIR;
use crate::tml::tools::model::{ContentKind, ContentObject};

/// File extension of TML documents.
pub const TML_EXTENSION: &str = "tml";

/// Parses one TML document. `origin` names the document in error messages.
pub fn parse_tml_document(source: &str, origin: &str) -> Result<ContentObject> {
    let document: Value = serde_yaml::from_str(source)?;
    let Value::Mapping(map) = &document else {
        return Err(invalid(origin, "expected a mapping at the top level"));
    };

    let mut body: Option<(ContentKind, &Value)> = None;
    for (key, value) in map {
        let Some(kind) = key.as_str().and_then(ContentKind::from_tml_key) else {
            continue;
        };
        if body.is_some() {
            return Err(invalid(origin, "more than one content section"));
        }
        body = Some((kind, value));
    }
    let Some((kind, payload)) = body else {
        return Err(invalid(origin, "no recognised content section"));
    };

    let identifier = match map.get("guid") {
        Some(Value::String(guid)) if !guid.is_empty() => guid.clone(),
        Some(Value::String(_)) | None => surrogate_identifier(&document),
        Some(_) => return Err(invalid(origin, "guid must be a string")),
    };

    ContentObject::new(identifier, kind, payload.clone())
}

/// Reads every `*.tml` file below `root`, in path order. The mapping folder
/// is not content and is skipped.
pub fn read_tml_directory(root: &Path) -> Result<Vec<ContentObject>> {
    if !root.is_dir() {
        return Err(ToolError::MissingInput(root.to_path_buf()));
    }

    let mut paths = Vec::new();
    collect_tml_paths(root, &mut paths)?;
    paths.sort();

    let mut objects = Vec::with_capacity(paths.len());
    for path in paths {
        let source = fs::read_to_string(&path)?;
        let object = parse_tml_document(&source, &path.display().to_string())?;
        debug!(path = %path.display(), id = object.identifier(), kind = %object.kind(), "read TML");
        objects.push(object);
    }
    Ok(objects)
}

fn collect_tml_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if path.file_name().and_then(|name| name.to_str()) != Some(MAPPING_DIR) {
                collect_tml_paths(&path, out)?;
            }
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(TML_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

/// Serialises an object back into a TML document, with `guid` as its
/// identifier when given.
pub fn render_tml(object: &ContentObject, guid: Option<&str>) -> Result<String> {
    let mut document = Mapping::new();
    if let Some(guid) = guid {
        document.insert("guid".into(), guid.into());
    }
    document.insert(object.kind().tml_key().into(), object.payload().clone());
    Ok(serde_yaml::to_string(&Value::Mapping(document))?)
}

/// Conventional file name of a TML document, e.g. `<guid>.worksheet.tml`.
pub fn tml_file_name(kind: ContentKind, guid: &str) -> String {
    format!("{guid}.{}.{TML_EXTENSION}", kind.tml_key())
}

fn surrogate_identifier(document: &Value) -> String {
    let canonical = serde_yaml::to_string(document).unwrap_or_default();
    Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical.as_bytes()).to_string()
}

fn invalid(origin: &str, reason: &str) -> ToolError {
    ToolError::Tml {
        origin: origin.to_string(),
        reason: reason.to_string(),
    }
}
