use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::client::ArchiveClient;
use crate::domain::{Dataset, ReferenceDate};
use crate::error::MirrorError;
use crate::listing;
use crate::state::IncrementalState;
use crate::store::Storage;
use crate::transfer::{TransferEngine, TransferOutcome};

#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorOptions {
    /// Persist incremental state after every stored file instead of once at
    /// the end of the pass.
    pub checkpoint: bool,
}

/// What one dataset pass did. Counters are per (run, variable, step) candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    pub dataset: String,
    pub date: String,
    pub downloaded: Vec<String>,
    pub already_done: usize,
    pub missing_upstream: usize,
    pub unavailable: usize,
    pub failed: Vec<String>,
    pub skipped_runs: Vec<String>,
    pub skipped_partitions: Vec<String>,
    pub state_saved: bool,
}

/// Drives one dataset for one reference date: expand runs x variables x
/// steps, filter by state and the remote listing, transfer the rest.
pub struct DatasetMirror<'a> {
    dataset: &'a Dataset,
    date: ReferenceDate,
    client: &'a dyn ArchiveClient,
    storage: &'a dyn Storage,
    options: MirrorOptions,
}

impl<'a> DatasetMirror<'a> {
    pub fn new(
        dataset: &'a Dataset,
        date: ReferenceDate,
        client: &'a dyn ArchiveClient,
        storage: &'a dyn Storage,
    ) -> Self {
        Self {
            dataset,
            date,
            client,
            storage,
            options: MirrorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MirrorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run(&self) -> Result<MirrorReport, MirrorError> {
        self.run_at(Utc::now())
    }

    /// Like [`run`](Self::run) with an explicit "current instant", which
    /// decides which runs are still in the future.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<MirrorReport, MirrorError> {
        let span = info_span!("mirror", dataset = %self.dataset.name, date = %self.date);
        let _guard = span.enter();

        let state_key = self.dataset.state_key();
        let mut state = IncrementalState::load(self.storage, &state_key)?;
        info!(
            storage = %self.storage.describe(),
            known_files = state.len(),
            "starting mirror"
        );

        let mut report = MirrorReport {
            dataset: self.dataset.name.clone(),
            date: self.date.marker(),
            ..MirrorReport::default()
        };
        let engine = TransferEngine::new(self.client, self.storage);
        let marker = self.date.marker();

        for run in &self.dataset.runs {
            if self.date.run_start(run) > now {
                debug!(run = %run, "skipping future run");
                report.skipped_runs.push(run.to_string());
                continue;
            }

            for var in &self.dataset.variables {
                state.touch_variable(var);

                let available = listing::list_available(
                    self.client,
                    &self.dataset.base_url,
                    run.as_str(),
                    var,
                    &marker,
                    &self.dataset.listing_suffix,
                );
                if available.is_empty() {
                    warn!(
                        run = %run,
                        variable = %var,
                        "directory index empty or unavailable, skipping"
                    );
                    report.skipped_partitions.push(format!("{run}/{var}"));
                    continue;
                }

                for &step in &self.dataset.forecast_steps {
                    let filename = self.dataset.filename(&self.date, run, var, step);
                    if state.already_done(var, &filename) {
                        report.already_done += 1;
                        continue;
                    }
                    if !available.contains(&filename) {
                        warn!(%filename, "file not found on server, skipping");
                        report.missing_upstream += 1;
                        continue;
                    }

                    let url = self.dataset.file_url(run, var, &filename);
                    let data_key = self.dataset.data_key(&self.date, run, var, &filename);
                    let meta_key = self.dataset.meta_key(&self.date, run, var, &filename);
                    let codec = self.dataset.codec_for(&filename);

                    match engine.transfer(&url, &data_key, Some(&meta_key), codec) {
                        Ok(TransferOutcome::Stored(_)) => {
                            state.mark_done(var, &filename, Utc::now());
                            info!(%filename, key = %data_key, "downloaded");
                            report.downloaded.push(data_key);
                            if self.options.checkpoint {
                                self.persist(&state, &state_key);
                            }
                        }
                        Ok(TransferOutcome::Unavailable { .. }) => {
                            report.unavailable += 1;
                        }
                        Err(err) => {
                            error!(%filename, %url, "failed downloading: {err}");
                            report.failed.push(filename);
                        }
                    }
                }
            }
        }

        report.state_saved = self.persist(&state, &state_key);
        info!(
            downloaded = report.downloaded.len(),
            failed = report.failed.len(),
            "completed mirror"
        );
        Ok(report)
    }

    fn persist(&self, state: &IncrementalState, key: &str) -> bool {
        match state.save(self.storage, key) {
            Ok(()) => true,
            Err(err) => {
                error!(%key, "failed to write incremental state: {err}");
                false
            }
        }
    }
}
