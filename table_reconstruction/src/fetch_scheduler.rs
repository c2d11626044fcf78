use std::collections::BTreeMap;
use std::sync::Arc;

use cube_config::FetchConfig;
use cube_types::FetchedPage;
use derivative::Derivative;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::{Result, TableReconstructionError};
use crate::grid_decoder::{DecodedChunk, GridDecoder};
use crate::instance_session::PageFetcher;
use crate::progress::{NoOpProgressUpdater, ProgressUpdater};
use crate::table_assembler::TableAssembler;

/// The pages still to fetch after the first page of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub total: usize,
    pub initial_limit: usize,
    pub chunk_size: usize,
    pub offsets: Vec<usize>,
}

impl FetchPlan {
    /// Offsets `initial_limit, initial_limit + chunk_size, ...` below `total`.
    pub fn new(total: usize, initial_limit: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let offsets = (initial_limit..total).step_by(chunk_size).collect();
        Self {
            total,
            initial_limit,
            chunk_size,
            offsets,
        }
    }

    /// Pages of the instance, the first one included.
    pub fn total_pages(&self) -> usize {
        self.offsets.len() + 1
    }

    /// Rows worth reserving up front: the first page plus one page per worker, never more than
    /// `total`. The reported total alone does not bound an allocation.
    pub fn rows_to_reserve(&self, workers: usize) -> usize {
        self.chunk_size
            .saturating_mul(workers)
            .saturating_add(self.initial_limit)
            .min(self.total)
    }

    fn expected_rows(&self, offset: usize) -> usize {
        let limit = if offset == 0 { self.initial_limit } else { self.chunk_size };
        limit.min(self.total.saturating_sub(offset))
    }

    /// Fails with `MalformedGrid` unless the chunk holds every row its page should.
    pub fn check_rows(&self, chunk: &DecodedChunk) -> Result<()> {
        let expected = self.expected_rows(chunk.offset);
        if chunk.num_rows() != expected {
            return Err(TableReconstructionError::malformed(format!(
                "Page at offset {} has {} rows, expected {expected}",
                chunk.offset,
                chunk.num_rows()
            )));
        }
        Ok(())
    }
}

/// `min(max_workers, host_concurrency + extra_workers)`, capped at `chunk_count`.
/// A single chunk, or `parallel == false`, always gets one worker.
pub fn worker_count(
    chunk_count: usize,
    host_concurrency: usize,
    max_workers: usize,
    extra_workers: usize,
    parallel: bool,
) -> usize {
    if !parallel || chunk_count <= 1 {
        return 1;
    }
    max_workers
        .min(host_concurrency.saturating_add(extra_workers))
        .min(chunk_count)
        .max(1)
}

pub fn host_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Fetches the remaining pages of an instance and feeds them, in offset order, through
/// the decoder into the assembler.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FetchScheduler {
    max_workers: usize,
    extra_workers: usize,
    parallel: bool,
    host_concurrency: usize,
    cancellation_token: CancellationToken,
    #[derivative(Debug = "ignore")]
    progress_updater: Arc<dyn ProgressUpdater>,
}

impl FetchScheduler {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            max_workers: config.max_concurrent_page_fetches,
            extra_workers: config.extra_workers_over_cpus,
            parallel: config.parallel,
            host_concurrency: host_concurrency(),
            cancellation_token: CancellationToken::new(),
            progress_updater: Arc::new(NoOpProgressUpdater),
        }
    }

    pub fn parallel(self, parallel: bool) -> Self {
        Self { parallel, ..self }
    }

    pub fn with_host_concurrency(self, host_concurrency: usize) -> Self {
        Self {
            host_concurrency,
            ..self
        }
    }

    pub fn with_cancellation_token(self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self
        }
    }

    pub fn with_progress_updater(self, progress_updater: Arc<dyn ProgressUpdater>) -> Self {
        Self {
            progress_updater,
            ..self
        }
    }

    pub fn workers_for(&self, plan: &FetchPlan) -> usize {
        worker_count(plan.offsets.len(), self.host_concurrency, self.max_workers, self.extra_workers, self.parallel)
    }

    /// Reports the first page, which the caller has already fetched and appended.
    pub async fn report_first_page(&self, plan: &FetchPlan) {
        self.progress_updater.update(1, plan.total_pages()).await;
    }

    #[instrument(skip_all, name = "FetchScheduler::execute", fields(instance_id = %fetcher.instance_id(), pages = plan.offsets.len(), chunk_size = plan.chunk_size))]
    pub async fn execute(
        &self,
        fetcher: &PageFetcher,
        plan: &FetchPlan,
        decoder: &GridDecoder,
        assembler: &mut TableAssembler,
    ) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(TableReconstructionError::Cancelled);
        }
        if plan.offsets.is_empty() {
            return Ok(());
        }

        let workers = self.workers_for(plan);
        info!(workers, total = plan.total, "Fetching remaining pages");

        if workers == 1 {
            self.execute_sequential(fetcher, plan, decoder, assembler).await
        } else {
            self.execute_parallel(fetcher, plan, decoder, assembler, workers).await
        }
    }

    async fn execute_sequential(
        &self,
        fetcher: &PageFetcher,
        plan: &FetchPlan,
        decoder: &GridDecoder,
        assembler: &mut TableAssembler,
    ) -> Result<()> {
        for (i, &offset) in plan.offsets.iter().enumerate() {
            let page = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return Err(TableReconstructionError::Cancelled),
                page = fetcher.fetch(offset, plan.chunk_size) => page?,
            };
            debug!(offset, byte_size = page.byte_size, "Received page");

            let chunk = decoder.decode(&page.payload, offset)?;
            plan.check_rows(&chunk)?;
            assembler.append(chunk)?;

            self.progress_updater.update(i + 2, plan.total_pages()).await;
        }
        Ok(())
    }

    async fn execute_parallel(
        &self,
        fetcher: &PageFetcher,
        plan: &FetchPlan,
        decoder: &GridDecoder,
        assembler: &mut TableAssembler,
        workers: usize,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut running_fetches = JoinSet::<Result<(usize, FetchedPage)>>::new();
        let mut slots = BTreeMap::new();

        let result: Result<()> = async {
            for &offset in &plan.offsets {
                // first collect whatever has already finished
                while let Some(result) = running_fetches.try_join_next() {
                    self.store(result, &mut slots, plan).await?;
                }

                let permit = tokio::select! {
                    biased;
                    _ = self.cancellation_token.cancelled() => return Err(TableReconstructionError::Cancelled),
                    permit = semaphore.clone().acquire_owned() => permit.map_err(|e| {
                        TableReconstructionError::InternalError(format!("Error acquiring fetch permit: {e}"))
                    })?,
                };

                let fetcher = fetcher.clone();
                let chunk_size = plan.chunk_size;
                debug!(offset, "Spawning page fetch");
                running_fetches.spawn(async move {
                    let page = fetcher.fetch(offset, chunk_size).await?;
                    drop(permit);
                    Ok((offset, page))
                });
            }

            loop {
                let result = tokio::select! {
                    biased;
                    _ = self.cancellation_token.cancelled() => return Err(TableReconstructionError::Cancelled),
                    result = running_fetches.join_next() => result,
                };
                let Some(result) = result else { break };
                self.store(result, &mut slots, plan).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            running_fetches.abort_all();
            debug!(error = %e, "Aborted outstanding page fetches");
            return Err(e);
        }

        for (offset, page) in slots {
            let chunk = decoder.decode(&page.payload, offset)?;
            plan.check_rows(&chunk)?;
            assembler.append(chunk)?;
        }
        Ok(())
    }

    async fn store(
        &self,
        result: std::result::Result<Result<(usize, FetchedPage)>, JoinError>,
        slots: &mut BTreeMap<usize, FetchedPage>,
        plan: &FetchPlan,
    ) -> Result<()> {
        let (offset, page) = result??;
        debug!(offset, byte_size = page.byte_size, "Received page");

        if slots.insert(offset, page).is_some() {
            return Err(TableReconstructionError::InternalError(format!("Page at offset {offset} fetched twice")));
        }
        self.progress_updater.update(slots.len() + 1, plan.total_pages()).await;
        Ok(())
    }
}
