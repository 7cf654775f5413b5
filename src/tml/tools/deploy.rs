use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::tml::tools::client::{DeployError, DeployRequest, TargetClient};
use crate::tml::tools::config::{ExistingPolicy, MigrationConfig};
use crate::tml::tools::model::{ContentObject, ObjectId};
use crate::tml::tools::plan::DeploymentPlan;
use crate::tml::tools::remap::{IdentifierMapping, Remapper};
use crate::tml::tools::report::{DeploymentOutcome, MigrationReport, ReportEntry, SkipReason};

/// Creates a connected cancellation pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle {
            sender: Arc::new(sender),
        },
        CancelSignal { receiver },
    )
}

/// Requests cancellation of a run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Observed by the executor at every batch boundary.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        cancellation().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Everything a run hands back: the per-object report and the mapping with
/// the entries recorded during the run.
#[derive(Debug, Clone)]
pub struct Execution {
    pub report: MigrationReport,
    pub mapping: IdentifierMapping,
}

/// Replays a deployment plan against a target, batch by batch.
pub struct Executor<'a, C: ?Sized> {
    client: &'a C,
    config: &'a MigrationConfig,
    remapper: Remapper,
}

struct Attempted {
    outcome: DeploymentOutcome,
    attempts: u32,
}

impl<'a, C> Executor<'a, C>
where
    C: TargetClient + ?Sized,
{
    pub fn new(client: &'a C, config: &'a MigrationConfig, seed: IdentifierMapping) -> Self {
        Self {
            client,
            config,
            remapper: Remapper::new(seed),
        }
    }

    /// Deploys every batch in order. A batch starts only once every outcome
    /// of the previous one is final. Object failures never stop the run;
    /// cancellation is honoured between batches.
    #[instrument(level = "info", skip_all, fields(batches = plan.batches.len()))]
    pub async fn run(self, plan: DeploymentPlan, cancel: &CancelSignal) -> Execution {
        let mut outcomes: HashMap<ObjectId, DeploymentOutcome> = HashMap::new();
        let mut report = MigrationReport::default();

        for batch in plan.batches {
            if cancel.is_cancelled() {
                if !report.cancelled {
                    warn!(batch = batch.index, "run cancelled, skipping remaining batches");
                    report.cancelled = true;
                }
                for object in &batch.objects {
                    report.entries.push(entry(object, batch.index, Attempted {
                        outcome: DeploymentOutcome::Skipped {
                            reason: SkipReason::Cancelled,
                        },
                        attempts: 0,
                    }));
                }
                continue;
            }

            let view = self.remapper.snapshot();
            let mut settled: BTreeMap<&str, Attempted> = BTreeMap::new();
            let mut pending: Vec<&ContentObject> = Vec::new();

            for object in &batch.objects {
                match self.precheck(object, &view, &outcomes) {
                    Some(outcome) => {
                        debug!(id = object.identifier(), %outcome, "not submitted");
                        settled.insert(object.identifier(), Attempted {
                            outcome,
                            attempts: 0,
                        });
                    }
                    None => pending.push(object),
                }
            }

            info!(
                batch = batch.index,
                submitting = pending.len(),
                settled = settled.len(),
                "starting batch"
            );

            let this = &self;
            let view = &view;
            let submitted: Vec<(&str, Attempted)> = stream::iter(pending)
                .map(|object| async move {
                    (object.identifier(), this.deploy_one(object, view).await)
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;
            settled.extend(submitted);

            for object in &batch.objects {
                if let Some(attempted) = settled.remove(object.identifier()) {
                    outcomes.insert(object.identifier().to_string(), attempted.outcome.clone());
                    report.entries.push(entry(object, batch.index, attempted));
                }
            }
        }

        let summary = report.summary();
        info!(
            deployed = summary.deployed,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = report.cancelled,
            "run finished"
        );

        Execution {
            report,
            mapping: self.remapper.into_mapping(),
        }
    }

    /// Decides whether an object can be submitted at all.
    fn precheck(
        &self,
        object: &ContentObject,
        view: &IdentifierMapping,
        outcomes: &HashMap<ObjectId, DeploymentOutcome>,
    ) -> Option<DeploymentOutcome> {
        if self.config.existing == ExistingPolicy::Skip {
            if let Some(target) = view.get(object.identifier()) {
                return Some(DeploymentOutcome::Skipped {
                    reason: SkipReason::AlreadyDeployed(target.to_string()),
                });
            }
        }

        for reference in object.references() {
            let reason = match outcomes.get(reference) {
                Some(DeploymentOutcome::Failed { .. }) => {
                    SkipReason::DependencyFailed(reference.clone())
                }
                Some(outcome) if !outcome.satisfies_dependents() => {
                    SkipReason::DependencySkipped(reference.clone())
                }
                _ => continue,
            };
            return Some(DeploymentOutcome::Skipped { reason });
        }
        None
    }

    async fn deploy_one(&self, object: &ContentObject, view: &IdentifierMapping) -> Attempted {
        let remapped = match object.remapped(|reference| view.resolve(reference)) {
            Ok(remapped) => remapped,
            Err(err) => {
                return Attempted {
                    outcome: DeploymentOutcome::Failed {
                        error: err.to_string(),
                    },
                    attempts: 0,
                };
            }
        };
        let request = DeployRequest {
            source_identifier: object.identifier().to_string(),
            object: remapped,
            existing_target: view.get(object.identifier()).map(str::to_string),
        };

        let policy = &self.config.retry;
        let timeout = self.config.call_timeout();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(timeout, self.client.deploy(&request)).await {
                Ok(result) => result,
                Err(_) => Err(DeployError::Transport(format!(
                    "no response within {} ms",
                    timeout.as_millis()
                ))),
            };

            match result {
                Ok(target) => {
                    return Attempted {
                        outcome: self.accept(&request, target),
                        attempts,
                    };
                }
                Err(err) if err.is_retryable() && policy.allows_retry_after(attempts) => {
                    let delay = policy.delay(attempts);
                    warn!(
                        id = %request.source_identifier,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying deployment"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(id = %request.source_identifier, attempts, error = %err, "deployment failed");
                    return Attempted {
                        outcome: DeploymentOutcome::Failed {
                            error: err.to_string(),
                        },
                        attempts,
                    };
                }
            }
        }
    }

    /// Turns a successful submission into an outcome, recording the new
    /// identifier exactly once.
    fn accept(&self, request: &DeployRequest, target: ObjectId) -> DeploymentOutcome {
        if let Some(known) = &request.existing_target {
            if *known != target {
                return DeploymentOutcome::Failed {
                    error: format!("target answered with {target}, expected {known}"),
                };
            }
            return DeploymentOutcome::Deployed { target };
        }

        match self
            .remapper
            .record(request.source_identifier.clone(), target.clone())
        {
            Ok(()) => {
                debug!(id = %request.source_identifier, %target, "deployed");
                DeploymentOutcome::Deployed { target }
            }
            Err(err) => DeploymentOutcome::Failed {
                error: err.to_string(),
            },
        }
    }
}

fn entry(object: &ContentObject, batch: usize, attempted: Attempted) -> ReportEntry {
    ReportEntry {
        identifier: object.identifier().to_string(),
        name: object.name().to_string(),
        kind: object.kind(),
        batch,
        attempts: attempted.attempts,
        outcome: attempted.outcome,
    }
}
