use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;

use crate::calculator::EnergyCalculator;
use crate::config::ComputeSettings;
use crate::discovery::discover_batches;
use crate::domain::{BatchName, CategoryKey};
use crate::energies;
use crate::error::FlavourError;
use crate::sidecar::{self, BatchInfo, Sidecars};
use crate::store::{PendingAction, PendingMarker, Store, StoreState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeAction {
    Created,
    Merged,
    Recovered,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeItem {
    pub batch: String,
    pub category: String,
    pub action: FinalizeAction,
    pub molecules: u64,
    pub total_molecules: u64,
    pub store_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeReport {
    pub items: Vec<FinalizeItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedBatch {
    pub batch: String,
    pub category: String,
    pub action: PendingAction,
    pub store_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub items: Vec<PlannedBatch>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn note(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// Moves every pending batch under the staging root into its flavour's
/// results store, one batch at a time.
pub struct Finalizer<C: EnergyCalculator> {
    store: Store,
    settings: ComputeSettings,
    workers: NonZeroUsize,
    calculator: C,
}

impl<C: EnergyCalculator> Finalizer<C> {
    pub fn new(
        store: Store,
        settings: ComputeSettings,
        workers: NonZeroUsize,
        calculator: C,
    ) -> Self {
        Self {
            store,
            settings,
            workers,
            calculator,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn run(&self, sink: &dyn ProgressSink) -> Result<FinalizeReport, FlavourError> {
        self.store.ensure_results_root()?;
        let batches = self.pending_batches(sink)?;

        let mut items = Vec::with_capacity(batches.len());
        for batch in &batches {
            items.push(self.finalize_batch(batch, sink)?);
        }
        Ok(FinalizeReport { items })
    }

    /// Reports what [`run`](Self::run) would do without computing or writing.
    pub fn plan(&self, sink: &dyn ProgressSink) -> Result<PlanReport, FlavourError> {
        let batches = self.pending_batches(sink)?;
        let items = batches
            .iter()
            .map(|batch| {
                let store_dir = self.store.store_dir(batch);
                let array_path = store_dir.join(batch.category().array_file_name());
                let action = if array_path.as_std_path().exists() {
                    PendingAction::Merge
                } else {
                    PendingAction::Create
                };
                note(sink, format!("plan: {} {batch} -> {store_dir}", action.as_str()));
                PlannedBatch {
                    batch: batch.to_string(),
                    category: batch.category().to_string(),
                    action,
                    store_path: store_dir.to_string(),
                }
            })
            .collect();
        Ok(PlanReport { items })
    }

    fn pending_batches(&self, sink: &dyn ProgressSink) -> Result<Vec<BatchName>, FlavourError> {
        let batches = discover_batches(self.store.staging_root())?;
        let names = batches.iter().map(BatchName::as_str).collect::<Vec<_>>();
        note(sink, format!("batches to be finalized: {names:?}"));
        ensure_unique_categories(&batches)?;
        ensure_one_store_per_category(&batches, &self.finalized_stores()?)?;
        Ok(batches)
    }

    fn finalized_stores(&self) -> Result<Vec<BatchName>, FlavourError> {
        if !self.store.results_root().as_std_path().exists() {
            return Ok(Vec::new());
        }
        discover_batches(self.store.results_root())
    }

    pub fn finalize_batch(
        &self,
        batch: &BatchName,
        sink: &dyn ProgressSink,
    ) -> Result<FinalizeItem, FlavourError> {
        note(sink, format!("finalizing batch {batch}"));
        if let Some(item) = self.recover(batch, sink)? {
            return Ok(item);
        }

        let array_name = batch.category().array_file_name();
        let array_path = self.store.store_dir(batch).join(&array_name);
        if array_path.as_std_path().exists() {
            note(
                sink,
                format!("{array_name} found in {}, appending results", self.store.store_dir(batch)),
            );
            self.merge(batch, sink)
        } else {
            note(sink, format!("{array_name} not found, creating a new store"));
            self.create(batch, sink)
        }
    }

    fn compute(
        &self,
        batch: &BatchName,
        expected: u64,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<f64>, FlavourError> {
        let batch_dir = self.store.batch_dir(batch);
        let start = Instant::now();
        let values = self
            .calculator
            .compute(&batch_dir, &self.settings, self.workers)?;
        sink.event(ProgressEvent {
            message: format!("computed {} energies for {batch}", values.len()),
            elapsed: Some(start.elapsed()),
        });
        energies::ensure_length(&values, expected, &batch_dir)?;
        Ok(values)
    }

    fn create(
        &self,
        batch: &BatchName,
        sink: &dyn ProgressSink,
    ) -> Result<FinalizeItem, FlavourError> {
        let batch_dir = self.store.batch_dir(batch);
        let store_dir = self.store.store_dir(batch);
        if store_dir.as_std_path().exists() {
            return Err(FlavourError::FilesystemConflict(store_dir));
        }

        let sidecars = Sidecars::locate(&batch_dir)?;
        let info = BatchInfo::load(&sidecars.metadata.path)?;
        let array_path = batch_dir.join(batch.category().array_file_name());
        let resuming = matches!(
            PendingMarker::load(&batch_dir)?,
            Some(PendingMarker {
                action: PendingAction::Create,
                ..
            })
        );
        if array_path.as_std_path().exists() && !resuming {
            return Err(FlavourError::FilesystemConflict(array_path));
        }

        let computed = self.compute(batch, info.num_molecules, sink)?;

        PendingMarker {
            action: PendingAction::Create,
            generation: 1,
        }
        .save(&batch_dir)?;
        energies::save(&array_path, &computed)?;
        StoreState::new(1, info.num_molecules).save(&batch_dir)?;
        Store::rename_no_clobber(&batch_dir, &store_dir)?;
        PendingMarker::clear(&store_dir)?;
        note(sink, format!("moved {batch_dir} to {store_dir}"));
        tracing::info!(batch = %batch, molecules = info.num_molecules, "created store");

        Ok(FinalizeItem {
            batch: batch.to_string(),
            category: batch.category().to_string(),
            action: FinalizeAction::Created,
            molecules: info.num_molecules,
            total_molecules: info.num_molecules,
            store_path: store_dir.to_string(),
        })
    }

    fn merge(
        &self,
        batch: &BatchName,
        sink: &dyn ProgressSink,
    ) -> Result<FinalizeItem, FlavourError> {
        let batch_dir = self.store.batch_dir(batch);
        let store_dir = self.store.store_dir(batch);
        let array_name = batch.category().array_file_name();

        let batch_sidecars = Sidecars::locate(&batch_dir)?;
        let store_sidecars = Sidecars::locate(&store_dir)?;
        let batch_info = BatchInfo::load(&batch_sidecars.metadata.path)?;
        let store_info = BatchInfo::load(&store_sidecars.metadata.path)?;
        sidecar::check_consistency(
            &batch_info,
            &batch_sidecars.metadata.path,
            &store_info,
            &store_sidecars.metadata.path,
        )?;
        let existing = energies::load(&store_dir.join(&array_name))?;
        energies::ensure_length(
            &existing,
            store_info.num_molecules,
            &store_dir.join(&array_name),
        )?;

        let computed = self.compute(batch, batch_info.num_molecules, sink)?;

        let generation = StoreState::generation_of(&store_dir)? + 1;
        PendingMarker {
            action: PendingAction::Merge,
            generation,
        }
        .save(&batch_dir)?;

        let work_dir = self.store.work_dir(batch);
        Store::remove_dir_all(&work_dir)?;
        let staged = work_dir.join("store");
        let incoming = work_dir.join("incoming");
        Store::copy_dir_recursive(&store_dir, &staged)?;
        Store::copy_dir_recursive(&batch_dir, &incoming)?;
        PendingMarker::clear(&incoming)?;

        let staged_array = staged.join(&array_name);
        let combined = energies::combine(&existing, &computed);
        energies::save(&staged_array, &combined)?;

        let staged_sidecars = Sidecars::locate(&staged)?;
        let incoming_sidecars = Sidecars::locate(&incoming)?;
        sidecar::append_geometry(&incoming_sidecars.geometry, &staged_sidecars.geometry)?;
        let merged =
            sidecar::merge_metadata(&incoming_sidecars.metadata, &staged_sidecars.metadata)?;
        energies::ensure_length(&combined, merged.num_molecules, &staged_array)?;

        for name in Store::list_entries(&incoming)? {
            note(sink, format!("moving {name} to {store_dir}"));
            Store::rename_no_clobber(&incoming.join(&name), &staged.join(&name))?;
        }
        Store::remove_empty_dir(&incoming)?;
        StoreState::new(generation, merged.num_molecules).save(&staged)?;

        self.swap_in(batch, &staged)?;
        note(sink, format!("removing batch {batch_dir}"));
        Store::remove_dir_all(&batch_dir)?;
        tracing::info!(
            batch = %batch,
            generation,
            added = batch_info.num_molecules,
            total = merged.num_molecules,
            "merged batch into store"
        );

        Ok(FinalizeItem {
            batch: batch.to_string(),
            category: batch.category().to_string(),
            action: FinalizeAction::Merged,
            molecules: batch_info.num_molecules,
            total_molecules: merged.num_molecules,
            store_path: store_dir.to_string(),
        })
    }

    /// Replaces the store with the staged copy. Between the two renames the
    /// old store is parked in the previous dir, which `recover` uses to
    /// finish an interrupted swap.
    fn swap_in(&self, batch: &BatchName, staged: &Utf8Path) -> Result<(), FlavourError> {
        let store_dir = self.store.store_dir(batch);
        let previous = self.store.previous_dir(batch);
        Store::rename_no_clobber(&store_dir, &previous)?;
        Store::rename_no_clobber(staged, &store_dir)?;
        Store::remove_dir_all(&previous)?;
        Store::remove_dir_all(&self.store.work_dir(batch))
    }

    /// Brings a batch/store pair left behind by an interrupted run back to a
    /// consistent state. Returns an item when the batch had already been
    /// merged and only its cleanup was missing.
    fn recover(
        &self,
        batch: &BatchName,
        sink: &dyn ProgressSink,
    ) -> Result<Option<FinalizeItem>, FlavourError> {
        let batch_dir = self.store.batch_dir(batch);
        let store_dir = self.store.store_dir(batch);
        let work_dir = self.store.work_dir(batch);
        let previous = self.store.previous_dir(batch);

        if previous.as_std_path().exists() {
            if !store_dir.as_std_path().exists() {
                let staged = work_dir.join("store");
                if !staged.as_std_path().exists() {
                    return Err(FlavourError::Filesystem(format!(
                        "interrupted swap for {batch}: neither {store_dir} nor {staged} exists, \
                         restore from {previous}"
                    )));
                }
                tracing::warn!(batch = %batch, "completing interrupted store swap");
                Store::rename_no_clobber(&staged, &store_dir)?;
            }
            Store::remove_dir_all(&previous)?;
        }
        if work_dir.as_std_path().exists() {
            tracing::warn!(batch = %batch, path = %work_dir, "discarding stale merge work dir");
            Store::remove_dir_all(&work_dir)?;
        }
        if !store_dir.as_std_path().exists() {
            return Ok(None);
        }
        PendingMarker::clear(&store_dir)?;

        let Some(marker) = PendingMarker::load(&batch_dir)? else {
            return Ok(None);
        };
        let state = StoreState::load(&store_dir)?;
        let landed = marker.action == PendingAction::Merge
            && state
                .as_ref()
                .is_some_and(|state| state.generation >= marker.generation);
        if !landed {
            return Ok(None);
        }

        let molecules = match Sidecars::locate(&batch_dir)
            .and_then(|found| BatchInfo::load(&found.metadata.path))
        {
            Ok(info) => info.num_molecules,
            Err(err) => {
                tracing::warn!(batch = %batch, %err, "cannot read metadata of merged batch");
                0
            }
        };
        note(
            sink,
            format!(
                "{batch} was already merged (generation {}), removing batch {batch_dir}",
                marker.generation
            ),
        );
        Store::remove_dir_all(&batch_dir)?;
        tracing::warn!(
            batch = %batch,
            generation = marker.generation,
            "cleaned up already merged batch"
        );

        Ok(Some(FinalizeItem {
            batch: batch.to_string(),
            category: batch.category().to_string(),
            action: FinalizeAction::Recovered,
            molecules,
            total_molecules: state.map(|state| state.num_molecules).unwrap_or(0),
            store_path: store_dir.to_string(),
        }))
    }
}

fn ensure_unique_categories(batches: &[BatchName]) -> Result<(), FlavourError> {
    let mut seen = HashMap::<CategoryKey, &BatchName>::new();
    for batch in batches {
        if let Some(first) = seen.insert(batch.category(), batch) {
            return Err(FlavourError::DuplicateCategory {
                key: batch.category().to_string(),
                first: first.to_string(),
                second: batch.to_string(),
            });
        }
    }
    Ok(())
}

/// A batch may only feed the store that carries its own name; a store of
/// the same category under another name would make a second store.
fn ensure_one_store_per_category(
    batches: &[BatchName],
    stores: &[BatchName],
) -> Result<(), FlavourError> {
    for batch in batches {
        let other = stores
            .iter()
            .find(|store| store.category() == batch.category() && *store != batch);
        if let Some(store) = other {
            return Err(FlavourError::DuplicateCategory {
                key: batch.category().to_string(),
                first: store.to_string(),
                second: batch.to_string(),
            });
        }
    }
    Ok(())
}
