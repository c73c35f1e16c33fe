//! Public types shared across the registry, pipeline, and ledger.

use serde::{Deserialize, Serialize};

/// Identity of the person submitting an archival request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub name: String,
    /// Location of the submitter's record in the experiment registry.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
}

/// Reference to an experiment (or parent study) in the external registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRef {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub project: Option<String>,
}

/// Where the captured data should be registered. `Experiment` binds an
/// already-resolved experiment; `CreateUnder` has the pipeline provision a
/// fresh experiment under the given parent during its registering stage.
#[derive(Clone, Debug)]
pub enum Target {
    Experiment(ExperimentRef),
    CreateUnder(ExperimentRef),
}

impl Target {
    /// The experiment bound at creation time, if any.
    pub fn resolved(&self) -> Option<&ExperimentRef> {
        match self {
            Target::Experiment(e) => Some(e),
            Target::CreateUnder(_) => None,
        }
    }
}

/// Locators handed back by the external ingestion system once it has taken
/// ownership of a copied directory.
#[derive(Clone, Debug)]
pub struct IngestionOutcome {
    pub dataset_id: String,
    pub dataset_url: String,
    pub experiment_id: String,
    pub experiment_url: String,
}

/// Read-only snapshot of one task, as handed to callers of
/// [`TaskRegistry::describe`](crate::registry::TaskRegistry::describe).
#[derive(Clone, Debug)]
pub struct TaskDescription {
    pub id: String,
    /// Current stage label ("listing", "copying", ...) or "done".
    pub status: String,
    /// `None` until the listing stage has fixed the file count.
    pub progress: Option<f64>,
    pub submitter: Submitter,
    pub target: Option<ExperimentRef>,
    pub directories: Vec<String>,
    /// ISO-8601 UTC, set once a worker picks the task up.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    /// Registry location of the uploaded manifest, when registration worked.
    pub created_asset: Option<String>,
}

impl TaskDescription {
    pub fn is_done(&self) -> bool {
        self.status == "done"
    }
}
