use std::fs;
use std::path::Path;

use tempfile::tempdir;
use tml_tools::ToolError;
use tml_tools::client::DirectoryTarget;
use tml_tools::config::MigrationConfig;
use tml_tools::deploy::CancelSignal;
use tml_tools::error::ErrorClass;
use tml_tools::io::{mapping, tml};
use tml_tools::migrate;
use tml_tools::report::{DeploymentOutcome, SkipReason};

const TABLE: &str = r#"guid: T1
table:
  name: orders
  db: SALES
"#;

const WORKSHEET: &str = r#"guid: W1
worksheet:
  name: Sales
  tables:
    - name: orders
      fqn: T1
"#;

const ANSWER: &str = r#"guid: A1
answer:
  name: Revenue by month
  tables:
    - name: Sales
      fqn: W1
"#;

fn write_source(root: &Path) {
    fs::create_dir_all(root.join("answers")).expect("answers folder created");
    fs::write(root.join("T1.table.tml"), TABLE).expect("table written");
    fs::write(root.join("W1.worksheet.tml"), WORKSHEET).expect("worksheet written");
    fs::write(root.join("answers").join("A1.answer.tml"), ANSWER).expect("answer written");
    fs::write(root.join("README.md"), "not content").expect("readme written");
}

fn fast_config() -> MigrationConfig {
    let mut config = MigrationConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config
}

#[test]
fn plan_directory_orders_tml_by_dependency() {
    let source = tempdir().expect("temporary directory");
    write_source(source.path());

    let plan = migrate::plan_directory(source.path(), "dev", "prod").expect("plan built");
    let batches: Vec<Vec<&str>> = plan
        .batches
        .iter()
        .map(|batch| batch.identifiers().collect())
        .collect();

    assert_eq!(batches, vec![vec!["T1"], vec!["W1"], vec!["A1"]]);
    assert_eq!(plan.object_count(), 3);
}

#[tokio::test]
async fn directory_migration_stages_remapped_tml_and_saves_mapping() {
    let source = tempdir().expect("temporary directory");
    let staged = tempdir().expect("temporary directory");
    write_source(source.path());

    let target = DirectoryTarget::new(staged.path(), "prod");
    let run = migrate::migrate_directory(
        source.path(),
        "dev",
        "prod",
        &target,
        &fast_config(),
        &CancelSignal::never(),
    )
    .await
    .expect("migration ran");
    let saved_path = run.mapping_saved.expect("mapping saved");
    assert_eq!(saved_path, mapping::mapping_path(source.path(), "dev", "prod"));
    let execution = run.execution;

    assert_eq!(execution.report.summary().deployed, 3);
    assert!(!execution.report.has_failures());

    let saved = mapping::load_mapping(source.path(), "dev", "prod").expect("mapping loaded");
    assert_eq!(saved, execution.mapping);
    let t1 = target.assign_identifier("T1");
    let w1 = target.assign_identifier("W1");
    assert_eq!(saved.get("T1"), Some(t1.as_str()));
    assert_eq!(saved.get("W1"), Some(w1.as_str()));

    let worksheet_file = staged.path().join(format!("{w1}.worksheet.tml"));
    let document = fs::read_to_string(&worksheet_file).expect("worksheet staged");
    let staged_worksheet =
        tml::parse_tml_document(&document, "staged worksheet").expect("staged TML parses");
    assert_eq!(staged_worksheet.identifier(), w1);
    assert_eq!(staged_worksheet.references(), [t1]);
}

#[tokio::test]
async fn second_directory_migration_skips_deployed_objects() {
    let source = tempdir().expect("temporary directory");
    let staged = tempdir().expect("temporary directory");
    write_source(source.path());
    let target = DirectoryTarget::new(staged.path(), "prod");

    let first = migrate::migrate_directory(
        source.path(),
        "dev",
        "prod",
        &target,
        &fast_config(),
        &CancelSignal::never(),
    )
    .await
    .expect("first run")
    .execution;
    let second = migrate::migrate_directory(
        source.path(),
        "dev",
        "prod",
        &target,
        &fast_config(),
        &CancelSignal::never(),
    )
    .await
    .expect("second run")
    .execution;

    assert_eq!(second.mapping, first.mapping);
    assert_eq!(second.report.summary().skipped, 3);
    let expected = target.assign_identifier("A1");
    assert_eq!(
        second.report.outcome("A1"),
        Some(&DeploymentOutcome::Skipped {
            reason: SkipReason::AlreadyDeployed(expected),
        })
    );
}

#[tokio::test]
async fn mapping_details_lists_names_and_types() {
    let source = tempdir().expect("temporary directory");
    let staged = tempdir().expect("temporary directory");
    write_source(source.path());
    let target = DirectoryTarget::new(staged.path(), "prod");

    migrate::migrate_directory(
        source.path(),
        "dev",
        "prod",
        &target,
        &fast_config(),
        &CancelSignal::never(),
    )
    .await
    .expect("migration ran")
    .mapping_saved
    .expect("mapping saved");

    let (details, path) =
        migrate::mapping_details(source.path(), "dev", "prod").expect("details written");
    assert_eq!(details.len(), 3);
    let worksheet = details
        .iter()
        .find(|detail| detail.source_guid == "W1")
        .expect("worksheet listed");
    assert_eq!(worksheet.name, "Sales");
    assert_eq!(worksheet.kind, "LOGICAL_TABLE");

    let csv = fs::read_to_string(path).expect("csv readable");
    assert!(csv.starts_with("Name,Source GUID,Destination GUID,Type"));
    assert!(csv.contains("Revenue by month,A1,"));
}

#[test]
fn missing_tml_root_is_reported_with_its_path() {
    let root = tempdir().expect("temporary directory");
    let missing = root.path().join("nowhere");
    let err = migrate::plan_directory(&missing, "dev", "prod").expect_err("missing root rejected");
    assert!(matches!(err, ToolError::MissingInput(ref path) if *path == missing));
    assert_eq!(err.class(), ErrorClass::Environment);
}

#[tokio::test]
async fn unsaved_mapping_keeps_the_execution() {
    let source = tempdir().expect("temporary directory");
    let staged = tempdir().expect("temporary directory");
    write_source(source.path());
    fs::write(source.path().join(mapping::MAPPING_DIR), "occupied")
        .expect("blocking file written");
    let target = DirectoryTarget::new(staged.path(), "prod");

    let run = migrate::migrate_directory(
        source.path(),
        "dev",
        "prod",
        &target,
        &fast_config(),
        &CancelSignal::never(),
    )
    .await
    .expect("migration ran");

    assert!(matches!(run.mapping_saved, Err(ToolError::Io(_))));
    assert_eq!(run.execution.report.summary().deployed, 3);
    assert_eq!(run.execution.mapping.len(), 3);
    assert_eq!(
        run.execution.mapping.get("T1"),
        Some(target.assign_identifier("T1").as_str())
    );
}

#[test]
fn staging_inside_the_tml_root_is_rejected() {
    let workspace = tempdir().expect("temporary directory");
    let source = workspace.path().join("source");
    write_source(&source);

    let nested = source.join("staged");
    let err = migrate::ensure_outside_source(&source, &nested)
        .expect_err("nested staging rejected");
    assert!(matches!(err, ToolError::InvalidConfig(_)));
    assert!(!nested.exists());
    migrate::ensure_outside_source(&source, &source).expect_err("root itself rejected");

    let sibling = workspace.path().join("staged");
    migrate::ensure_outside_source(&source, &sibling).expect("sibling staging accepted");
    migrate::ensure_outside_source(&source, &source.join("..").join("staged"))
        .expect("sibling through parent accepted");
}
