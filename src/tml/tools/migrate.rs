use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, instrument};

use crate::tml::tools::client::TargetClient;
use crate::tml::tools::config::MigrationConfig;
use crate::tml::tools::deploy::{CancelSignal, Execution, Executor};
use crate::tml::tools::error::{Result, ToolError};
use crate::tml::tools::graph::DependencyGraph;
use crate::tml::tools::io::mapping::{self, MappingDetail};
use crate::tml::tools::io::tml;
use crate::tml::tools::model::ContentObject;
use crate::tml::tools::plan::{self, DeploymentPlan};
use crate::tml::tools::remap::IdentifierMapping;
use crate::tml::tools::report::MigrationReport;

/// Validates the input set and orders it for deployment. Nothing is
/// deployed; every input and graph error surfaces here.
pub fn plan_objects(objects: Vec<ContentObject>, mapping: &IdentifierMapping) -> Result<DeploymentPlan> {
    let graph = DependencyGraph::build(objects, mapping)?;
    plan::plan(graph)
}

/// Runs a complete migration of `objects` into the target behind `client`.
///
/// Only pre-flight problems (configuration, input set, graph) are errors.
/// Once deployment starts the run always completes with a full report.
#[instrument(level = "info", skip_all, fields(objects = objects.len(), seeded = seed.len()))]
pub async fn migrate<C>(
    objects: Vec<ContentObject>,
    seed: IdentifierMapping,
    client: &C,
    config: &MigrationConfig,
    cancel: &CancelSignal,
) -> Result<Execution>
where
    C: TargetClient + ?Sized,
{
    config.validate()?;
    let plan = plan_objects(objects, &seed)?;
    Ok(Executor::new(client, config, seed).run(plan, cancel).await)
}

/// Plans the TML directory at `root` against the mapping stored for the
/// environment pair.
#[instrument(level = "info", skip_all, fields(root = %root.display(), source = %source, destination = %destination))]
pub fn plan_directory(root: &Path, source: &str, destination: &str) -> Result<DeploymentPlan> {
    let objects = tml::read_tml_directory(root)?;
    info!(object_count = objects.len(), "read TML objects");
    let mapping = mapping::load_mapping(root, source, destination)?;
    plan_objects(objects, &mapping)
}

/// A finished directory migration. Saving the mapping happens after objects
/// have been deployed, so its failure is kept next to the execution instead
/// of replacing it.
#[derive(Debug)]
pub struct DirectoryMigration {
    pub execution: Execution,
    /// Path of the saved mapping file, or why it could not be written.
    pub mapping_saved: Result<PathBuf>,
}

/// Migrates the TML directory at `root` and stores the updated mapping next
/// to it, so the next run for the same environment pair resumes from there.
#[instrument(level = "info", skip_all, fields(root = %root.display(), source = %source, destination = %destination))]
pub async fn migrate_directory<C>(
    root: &Path,
    source: &str,
    destination: &str,
    client: &C,
    config: &MigrationConfig,
    cancel: &CancelSignal,
) -> Result<DirectoryMigration>
where
    C: TargetClient + ?Sized,
{
    let objects = tml::read_tml_directory(root)?;
    info!(object_count = objects.len(), "read TML objects");
    let seed = mapping::load_mapping(root, source, destination)?;

    let execution = migrate(objects, seed, client, config, cancel).await?;
    let mapping_saved = mapping::save_mapping(root, source, destination, &execution.mapping);
    if let Err(err) = &mapping_saved {
        error!(error = %err, entries = execution.mapping.len(), "could not save identifier mapping");
    }
    Ok(DirectoryMigration {
        execution,
        mapping_saved,
    })
}

/// Rejects a staging directory at or below the TML root. Documents staged
/// there would be read back as source content by the next run.
pub fn ensure_outside_source(root: &Path, staging: &Path) -> Result<()> {
    let root_resolved = resolve_path(root)?;
    let staging_resolved = resolve_path(staging)?;
    if staging_resolved.starts_with(&root_resolved) {
        return Err(ToolError::InvalidConfig(format!(
            "staging directory {} lies inside the TML root {}",
            staging.display(),
            root.display()
        )));
    }
    Ok(())
}

/// Absolute form of `path` with symlinks resolved for the part that exists.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = fs::canonicalize(existing)?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

/// Writes the report as pretty-printed JSON.
pub fn write_report(path: &Path, report: &MigrationReport) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Lists the stored mapping for an environment pair with names and types
/// taken from the source TML below `root`, and writes the details CSV.
#[instrument(level = "info", skip_all, fields(root = %root.display(), source = %source, destination = %destination))]
pub fn mapping_details(
    root: &Path,
    source: &str,
    destination: &str,
) -> Result<(Vec<MappingDetail>, PathBuf)> {
    let mapping = mapping::load_mapping(root, source, destination)?;
    let objects = tml::read_tml_directory(root)?;
    let known: HashMap<&str, &ContentObject> = objects
        .iter()
        .map(|object| (object.identifier(), object))
        .collect();

    let details: Vec<MappingDetail> = mapping
        .iter()
        .map(|(source_guid, destination_guid)| {
            let object = known.get(source_guid);
            MappingDetail {
                name: object.map(|o| o.name().to_string()).unwrap_or_default(),
                source_guid: source_guid.to_string(),
                destination_guid: destination_guid.to_string(),
                kind: object
                    .map(|o| o.kind().metadata_type().to_string())
                    .unwrap_or_default(),
            }
        })
        .collect();

    let path = mapping::write_mapping_details(root, source, destination, &details)?;
    Ok((details, path))
}
