use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use crate::client::ArchiveClient;
use crate::domain::{Dataset, ReferenceDate};
use crate::error::MirrorError;
use crate::mirror::{DatasetMirror, MirrorOptions, MirrorReport};
use crate::store::Storage;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop at the first failed dataset and return its error.
    pub strict: bool,
    pub checkpoint: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub status: DatasetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<MirrorReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub date: String,
    pub datasets: Vec<DatasetOutcome>,
    pub has_errors: bool,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.datasets
            .iter()
            .filter(|outcome| outcome.status == DatasetStatus::Aborted)
            .count()
    }
}

/// Mirrors every configured dataset in order against one storage backend.
pub struct App<C: ArchiveClient> {
    storage: Box<dyn Storage>,
    client: C,
}

impl<C: ArchiveClient> App<C> {
    pub fn new(storage: Box<dyn Storage>, client: C) -> Self {
        Self { storage, client }
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn run(
        &self,
        datasets: &[Dataset],
        date: ReferenceDate,
        options: RunOptions,
    ) -> Result<RunSummary, MirrorError> {
        self.run_at(datasets, date, options, Utc::now())
    }

    pub fn run_at(
        &self,
        datasets: &[Dataset],
        date: ReferenceDate,
        options: RunOptions,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, MirrorError> {
        let mirror_options = MirrorOptions {
            checkpoint: options.checkpoint,
        };
        let mut outcomes = Vec::with_capacity(datasets.len());
        let mut has_errors = false;

        for dataset in datasets {
            debug!(dataset = %dataset.name, "starting dataset");
            let result = DatasetMirror::new(dataset, date, &self.client, self.storage.as_ref())
                .with_options(mirror_options)
                .run_at(now);
            match result {
                Ok(report) => outcomes.push(DatasetOutcome {
                    dataset: dataset.name.clone(),
                    status: DatasetStatus::Completed,
                    error: None,
                    report: Some(report),
                }),
                Err(err) => {
                    error!(dataset = %dataset.name, "failed to mirror dataset: {err}");
                    has_errors = true;
                    if options.strict {
                        return Err(err);
                    }
                    outcomes.push(DatasetOutcome {
                        dataset: dataset.name.clone(),
                        status: DatasetStatus::Aborted,
                        error: Some(err.to_string()),
                        report: None,
                    });
                }
            }
        }

        Ok(RunSummary {
            date: date.marker(),
            datasets: outcomes,
            has_errors,
        })
    }
}
