//! Chunked deduplication run.
//!
//! Records are pulled from a [`RecordSource`] one chunk at a time. Each chunk
//! is admitted to the [`ClusterIndex`] on the control thread, its fuzzy work
//! is fanned out as block tasks to a bounded rayon pool, and the accepted
//! pairs are applied back on the control thread. Canonical records are
//! produced only after the last chunk.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cluster::{Absorption, BlockOutcome, BlockTask, ClusterIndex, RecordKeys, compare_block};
use crate::config::SkumergeConfig;
use crate::error::{DedupError, Result};
use crate::merge::PartialRecord;
use crate::models::{FieldKind, ProductRecord, RecordIndex, RecordSchema};
use crate::similarity::SimilarityScorer;

// ─── Sources & sinks ───────────────────────────────────────

/// Chunked supplier of input records.
pub trait RecordSource {
    /// Column names and kinds, in record order.
    fn columns(&self) -> &[(String, FieldKind)];

    /// Next chunk of records, `None` once the input is exhausted.
    fn next_chunk(&mut self) -> Result<Option<Vec<ProductRecord>>>;
}

/// Consumer of canonical records.
pub trait RecordSink {
    fn write_batch(&mut self, batch: Vec<ProductRecord>) -> Result<()>;

    /// Make the output visible. Nothing written before this call is.
    fn finish(&mut self) -> Result<()>;
}

/// In-memory source, split into chunks of a fixed size.
#[derive(Debug)]
pub struct MemorySource {
    columns: Vec<(String, FieldKind)>,
    records: std::vec::IntoIter<ProductRecord>,
    chunk_size: usize,
}

impl MemorySource {
    pub fn new(columns: Vec<(String, FieldKind)>, records: Vec<ProductRecord>, chunk_size: usize) -> Self {
        Self {
            columns,
            records: records.into_iter(),
            chunk_size: chunk_size.max(1),
        }
    }
}

impl RecordSource for MemorySource {
    fn columns(&self) -> &[(String, FieldKind)] {
        &self.columns
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<ProductRecord>>> {
        let chunk: Vec<ProductRecord> = self.records.by_ref().take(self.chunk_size).collect();
        Ok((!chunk.is_empty()).then_some(chunk))
    }
}

/// Collects canonical records in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<ProductRecord>,
    pub batches: usize,
    pub finished: bool,
}

impl RecordSink for VecSink {
    fn write_batch(&mut self, batch: Vec<ProductRecord>) -> Result<()> {
        self.batches += 1;
        self.records.extend(batch);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

// ─── Block matching ────────────────────────────────────────

/// Fuzzy matcher for one block. Runs on pool threads and must not depend on
/// anything but the task.
pub trait BlockMatcher: Send + Sync {
    fn compare(&self, task: &BlockTask<'_>) -> Result<BlockOutcome>;
}

/// Title-similarity matcher.
#[derive(Debug, Clone, Copy)]
pub struct TitleMatcher {
    scorer: SimilarityScorer,
}

impl TitleMatcher {
    pub fn new(scorer: SimilarityScorer) -> Self {
        Self { scorer }
    }
}

impl BlockMatcher for TitleMatcher {
    fn compare(&self, task: &BlockTask<'_>) -> Result<BlockOutcome> {
        Ok(compare_block(task, &self.scorer))
    }
}

// ─── Summary ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub input_records: usize,
    pub output_records: usize,
    pub chunks: usize,
    pub distinct_ids: usize,
    pub blocks: usize,
    pub blocks_dispatched: usize,
    pub comparisons: u64,
    pub fuzzy_pairs_accepted: usize,
    pub block_retries: u32,
}

impl RunSummary {
    pub fn duplicates_removed(&self) -> usize {
        self.input_records.saturating_sub(self.output_records)
    }
}

// ─── Run state ─────────────────────────────────────────────

/// Everything one run accumulates. Created by [`Deduplicator::run`] and
/// dropped when it returns.
struct RunState<'s> {
    schema: &'s RecordSchema,
    index: ClusterIndex,
    /// Keyed by the current union-find root of each cluster.
    partials: HashMap<RecordIndex, PartialRecord>,
    summary: RunSummary,
}

impl<'s> RunState<'s> {
    fn new(schema: &'s RecordSchema) -> Self {
        Self {
            schema,
            index: ClusterIndex::new(),
            partials: HashMap::new(),
            summary: RunSummary::default(),
        }
    }

    fn admit(&mut self, chunk: usize, offset: usize, record: ProductRecord, prefix_len: usize) -> Result<()> {
        self.schema.check_arity(&record, chunk, offset)?;
        let keys = RecordKeys::derive(self.schema, &record, prefix_len);
        let has_id = keys.canonical_id.is_some();
        let admission = self.index.admit(keys);
        let partial = PartialRecord::from_record(self.schema, admission.index, record, has_id);
        self.partials.insert(admission.index, partial);
        if let Some(absorption) = admission.absorption {
            self.absorb(absorption);
        }
        self.summary.input_records += 1;
        Ok(())
    }

    fn absorb(&mut self, absorption: Absorption) {
        if let Some(absorbed) = self.partials.remove(&absorption.absorbed) {
            match self.partials.get_mut(&absorption.kept) {
                Some(kept) => kept.absorb(absorbed),
                None => {
                    self.partials.insert(absorption.kept, absorbed);
                }
            }
        }
    }

    /// Canonical records ordered by their smallest member index.
    fn into_records(self) -> Vec<ProductRecord> {
        let mut partials: Vec<PartialRecord> = self.partials.into_values().collect();
        partials.sort_by_key(PartialRecord::anchor);
        partials.into_iter().map(PartialRecord::finish).collect()
    }
}

struct BlockRun {
    outcome: BlockOutcome,
    retries: u32,
}

// ─── Deduplicator ──────────────────────────────────────────

pub struct Deduplicator {
    config: SkumergeConfig,
    matcher: Arc<dyn BlockMatcher>,
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("config", &self.config)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl Deduplicator {
    pub fn new(config: SkumergeConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.pipeline.worker_count)
            .thread_name(|i| format!("skumerge-block-{i}"))
            .build()?;
        let matcher = Arc::new(TitleMatcher::new(config.matching.scorer()));
        Ok(Self {
            config,
            matcher,
            pool,
        })
    }

    /// Replace the block matcher.
    pub fn with_matcher(mut self, matcher: impl BlockMatcher + 'static) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn config(&self) -> &SkumergeConfig {
        &self.config
    }

    /// Deduplicate everything `source` yields into `sink`.
    ///
    /// On error the sink is left unfinished.
    pub fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<RunSummary>
    where
        S: RecordSource + ?Sized,
        K: RecordSink + ?Sized,
    {
        let started = Instant::now();
        let schema = RecordSchema::resolve(source.columns().to_vec(), &self.config.columns)?;
        let mut state = RunState::new(&schema);

        let mut chunk = 0;
        while let Some(records) = source.next_chunk()? {
            self.process_chunk(&mut state, chunk, records)?;
            chunk += 1;
        }

        state.summary.chunks = chunk;
        state.summary.distinct_ids = state.index.distinct_ids();
        state.summary.blocks = state.index.block_count();
        let mut summary = std::mem::take(&mut state.summary);

        let records = state.into_records();
        summary.output_records = records.len();

        let batch_size = self.config.pipeline.chunk_size;
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            sink.write_batch(records.by_ref().take(batch_size).collect())?;
        }
        sink.finish()?;

        info!(
            input = summary.input_records,
            unique = summary.output_records,
            removed = summary.duplicates_removed(),
            chunks = summary.chunks,
            comparisons = summary.comparisons,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "deduplication finished: {} unique products",
            summary.output_records
        );
        Ok(summary)
    }

    /// Deduplicate an in-memory batch.
    pub fn dedupe(
        &self,
        columns: Vec<(String, FieldKind)>,
        records: Vec<ProductRecord>,
    ) -> Result<Vec<ProductRecord>> {
        let mut source = MemorySource::new(columns, records, self.config.pipeline.chunk_size);
        let mut sink = VecSink::default();
        self.run(&mut source, &mut sink)?;
        Ok(sink.records)
    }

    fn process_chunk(&self, state: &mut RunState<'_>, chunk: usize, records: Vec<ProductRecord>) -> Result<()> {
        let started = Instant::now();
        let rows = records.len();
        let prefix_len = self.config.matching.blocking_prefix_length;

        for (offset, record) in records.into_iter().enumerate() {
            state.admit(chunk, offset, record, prefix_len)?;
        }

        let runs = {
            let tasks = state.index.pending_tasks();
            for task in &tasks {
                debug!(chunk, block = task.key, comparisons = task.comparisons(), "dispatching block");
            }
            state.summary.blocks_dispatched += tasks.len();
            let results: Vec<Result<BlockRun>> = self
                .pool
                .install(|| tasks.par_iter().map(|task| self.match_block(chunk, task)).collect());
            // First failure in key order, independent of scheduling.
            results.into_iter().collect::<Result<Vec<BlockRun>>>()?
        };

        let mut pairs = Vec::new();
        for run in runs {
            state.summary.comparisons += run.outcome.comparisons;
            state.summary.block_retries += run.retries;
            pairs.extend(run.outcome.pairs);
        }
        state.summary.fuzzy_pairs_accepted += pairs.len();

        for absorption in state.index.commit_chunk(pairs) {
            state.absorb(absorption);
        }

        info!(
            chunk,
            rows,
            clusters = state.partials.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chunk processed"
        );
        Ok(())
    }

    fn match_block(&self, chunk: usize, task: &BlockTask<'_>) -> Result<BlockRun> {
        let attempts = self.config.pipeline.block_retries.saturating_add(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.matcher.compare(task)));
            match result {
                Ok(Ok(outcome)) => {
                    return Ok(BlockRun {
                        outcome,
                        retries: attempt - 1,
                    });
                }
                Ok(Err(err)) => reason = err.to_string(),
                Err(payload) => reason = panic_message(payload.as_ref()),
            }
            if attempt < attempts {
                warn!(chunk, block = task.key, attempt, error = %reason, "block matching failed, retrying");
            }
        }

        Err(DedupError::BlockFailed {
            chunk,
            block: task.key.to_string(),
            attempts,
            reason,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
