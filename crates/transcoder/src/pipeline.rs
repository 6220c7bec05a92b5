use std::path::Path;
use anyhow::Result;
use log::{error, info, warn};
use crate::encoder::{delete_file, ConversionOutcome, Encoder};
use crate::guard::InstanceGuard;
use crate::queue::QueueStore;
use crate::reconcile::{RecordStore, Reconciler};
use crate::translate::PathTranslator;

/// Result of processing a single queued file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The file no longer exists
    Missing,
    /// The encoder did not produce a usable output; nothing was reconciled or deleted
    ConversionFailed(ConversionOutcome),
    /// The output was produced but the database could not be updated; the original is kept
    ReconcileFailed(String),
    /// Unexpected I/O error while handling the file
    Failed(String),
    Completed {
        record_updated: bool,
        original_removed: bool,
    },
}

/// Counts for one drain of the queue
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    pub processed: usize,
    pub converted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DrainSummary {
    fn record(&mut self, outcome: &ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Missing => self.skipped += 1,
            ItemOutcome::Completed { .. } => self.converted += 1,
            ItemOutcome::ConversionFailed(_) | ItemOutcome::ReconcileFailed(_) | ItemOutcome::Failed(_) => {
                self.failed += 1
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another instance owns the queue; the submitted file stays queued
    Deferred,
    Drained(DrainSummary),
}

/// Queue-driven conversion: enqueue, check exclusivity, then convert and
/// reconcile one file at a time until the queue is empty.
pub struct Pipeline<Q, G, S> {
    queue: Q,
    guard: G,
    encoder: Encoder,
    translator: PathTranslator,
    reconciler: Reconciler<S>,
}

impl<Q, G, S> Pipeline<Q, G, S>
where
    Q: QueueStore,
    G: InstanceGuard,
    S: RecordStore,
{
    pub fn new(queue: Q, guard: G, encoder: Encoder, translator: PathTranslator, reconciler: Reconciler<S>) -> Self {
        Self {
            queue,
            guard,
            encoder,
            translator,
            reconciler,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Queue `input`, then drain the queue unless another instance is running
    pub async fn run(&self, input: &Path) -> Result<RunOutcome> {
        self.queue.append(input)?;

        let Some(_token) = self.guard.try_acquire()? else {
            info!("Another transcoder is running, exiting; item added to queue for later processing");
            return Ok(RunOutcome::Deferred);
        };

        let summary = self.drain().await?;
        Ok(RunOutcome::Drained(summary))
    }

    /// Process queued files until the queue is empty. Per-file failures are
    /// logged and the file is dropped from the queue; queue I/O errors abort.
    pub async fn drain(&self) -> Result<DrainSummary> {
        let mut summary = DrainSummary::default();

        while let Some(path) = self.queue.pop_front()? {
            let outcome = match self.process_one(&path).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Failed to process {}: {:#}", path.display(), e);
                    ItemOutcome::Failed(format!("{:#}", e))
                }
            };
            summary.record(&outcome);
        }

        info!(
            "Queue drained: {} processed, {} converted, {} failed, {} skipped",
            summary.processed, summary.converted, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    /// Convert one file, point its database record at the output and delete the original
    pub async fn process_one(&self, input: &Path) -> Result<ItemOutcome> {
        info!("Processing file: {}", input.display());

        if !input.exists() {
            warn!("File no longer exists, skipping: {}", input.display());
            return Ok(ItemOutcome::Missing);
        }

        let conversion = self.encoder.convert(input).await?;
        if !conversion.is_success() {
            error!("Conversion failed for {}: {:?}", input.display(), conversion.outcome);
            return Ok(ItemOutcome::ConversionFailed(conversion.outcome));
        }

        let old_name = self.translator.translate(&input.to_string_lossy());
        let new_name = self.translator.translate(&conversion.output.to_string_lossy());

        let record_updated = match self.reconciler.reconcile(&old_name, &new_name) {
            Ok(updated) => updated,
            Err(e) => {
                error!("Failed to update database for {}: {:#}", input.display(), e);
                return Ok(ItemOutcome::ReconcileFailed(format!("{:#}", e)));
            }
        };

        let original_removed = delete_file(input);
        info!("Finished {} -> {}", input.display(), conversion.output.display());
        Ok(ItemOutcome::Completed {
            record_updated,
            original_removed,
        })
    }
}
