use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::tml::tools::error::Result;
use crate::tml::tools::remap::IdentifierMapping;

/// Folder, relative to the TML root, holding the mapping files.
pub const MAPPING_DIR: &str = "guid-mappings";

/// Persisted identifier mapping between two named environments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingFile {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub mapping: IdentifierMapping,
}

/// One row of the mapping details export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingDetail {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Source GUID")]
    pub source_guid: String,
    #[serde(rename = "Destination GUID")]
    pub destination_guid: String,
    #[serde(rename = "Type")]
    pub kind: String,
}

pub fn mapping_path(root: &Path, source: &str, destination: &str) -> PathBuf {
    root.join(MAPPING_DIR)
        .join(format!("{source}_{destination}.json"))
}

pub fn details_path(root: &Path, source: &str, destination: &str) -> PathBuf {
    root.join(MAPPING_DIR)
        .join(format!("{source}_{destination}_mapping_details.csv"))
}

/// Loads the mapping for an environment pair. A pair that has never been
/// migrated has an empty mapping.
pub fn load_mapping(root: &Path, source: &str, destination: &str) -> Result<IdentifierMapping> {
    let path = mapping_path(root, source, destination);
    if !path.exists() {
        return Ok(IdentifierMapping::new());
    }
    let file: MappingFile = serde_json::from_str(&fs::read_to_string(&path)?)?;
    info!(path = %path.display(), entries = file.mapping.len(), "loaded identifier mapping");
    Ok(file.mapping)
}

/// Writes the mapping for an environment pair, replacing the previous file.
pub fn save_mapping(
    root: &Path,
    source: &str,
    destination: &str,
    mapping: &IdentifierMapping,
) -> Result<PathBuf> {
    let path = mapping_path(root, source, destination);
    fs::create_dir_all(root.join(MAPPING_DIR))?;
    let file = MappingFile {
        source: source.to_string(),
        destination: destination.to_string(),
        mapping: mapping.clone(),
    };
    fs::write(&path, serde_json::to_string_pretty(&file)?)?;
    info!(path = %path.display(), entries = mapping.len(), "saved identifier mapping");
    Ok(path)
}

/// Writes the mapping details CSV next to the mapping file.
pub fn write_mapping_details(
    root: &Path,
    source: &str,
    destination: &str,
    details: &[MappingDetail],
) -> Result<PathBuf> {
    let path = details_path(root, source, destination);
    fs::create_dir_all(root.join(MAPPING_DIR))?;
    info!(path = %path.display(), rows = details.len(), "writing mapping details");

    let mut writer = csv::Writer::from_path(&path)?;
    for detail in details {
        writer.serialize(detail)?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_empty_mapping() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let mapping = load_mapping(dir.path(), "dev", "prod").expect("mapping loaded");
        assert!(mapping.is_empty());
    }

    #[test]
    fn saved_mapping_loads_back() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let mut mapping = IdentifierMapping::new();
        mapping.record("T1", "t-1").expect("entry recorded");
        mapping.record("W1", "w-1").expect("entry recorded");

        let path = save_mapping(dir.path(), "dev", "prod", &mapping).expect("mapping saved");
        assert!(path.ends_with("guid-mappings/dev_prod.json"));

        let loaded = load_mapping(dir.path(), "dev", "prod").expect("mapping loaded");
        assert_eq!(loaded, mapping);
        assert!(load_mapping(dir.path(), "prod", "dev").expect("mapping loaded").is_empty());
    }

    #[test]
    fn details_csv_has_headers() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let details = vec![MappingDetail {
            name: "Retail, Sales".into(),
            source_guid: "W1".into(),
            destination_guid: "w-1".into(),
            kind: "LOGICAL_TABLE".into(),
        }];

        let path = write_mapping_details(dir.path(), "dev", "prod", &details)
            .expect("details written");
        let written = fs::read_to_string(path).expect("file readable");
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("Name,Source GUID,Destination GUID,Type"));
        assert_eq!(lines.next(), Some("\"Retail, Sales\",W1,w-1,LOGICAL_TABLE"));
    }
}
