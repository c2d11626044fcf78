use std::sync::Arc;

use cube_config::FetchConfig;
use derivative::Derivative;
use tokio_util::sync::CancellationToken;
use tracing::info;
use utils::errors::ErrorPrinter;

use crate::chunk_size::ChunkSizeEstimator;
use crate::error::{Result, TableReconstructionError};
use crate::fetch_scheduler::{FetchPlan, FetchScheduler};
use crate::filter::Selection;
use crate::grid_decoder::GridDecoder;
use crate::instance_session::InstanceSession;
use crate::progress::ProgressUpdater;
use crate::table_assembler::{Table, TableAssembler};

/// Reconstructs the table of a selection: creates (or reuses) the server-side instance,
/// sizes the remaining pages from the first one, fetches them and assembles the rows.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TableReconstructor {
    config: Arc<FetchConfig>,
    initial_limit: Option<usize>,
    chunk_size: Option<usize>,
    parallel: Option<bool>,
    #[derivative(Debug = "ignore")]
    progress_updater: Option<Arc<dyn ProgressUpdater>>,
    cancellation_token: CancellationToken,
}

impl Default for TableReconstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl TableReconstructor {
    pub fn new() -> Self {
        Self {
            config: Arc::new(cube_config::cube_config().fetch.clone()),
            initial_limit: None,
            chunk_size: None,
            parallel: None,
            progress_updater: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_config(self, config: impl AsRef<FetchConfig>) -> Self {
        Self {
            config: Arc::new(config.as_ref().clone()),
            ..self
        }
    }

    /// Rows requested with the first page, instead of the configured `initial_limit`.
    pub fn with_initial_limit(self, initial_limit: usize) -> Self {
        Self {
            initial_limit: Some(initial_limit),
            ..self
        }
    }

    /// Rows per later page; bypasses the estimate from the first page's size.
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self {
            chunk_size: Some(chunk_size),
            ..self
        }
    }

    pub fn parallel(self, parallel: bool) -> Self {
        Self {
            parallel: Some(parallel),
            ..self
        }
    }

    pub fn with_progress_updater(self, progress_updater: Arc<dyn ProgressUpdater>) -> Self {
        Self {
            progress_updater: Some(progress_updater),
            ..self
        }
    }

    pub fn with_cancellation_token(self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self
        }
    }

    pub async fn run(self, session: &mut InstanceSession, selection: &Selection) -> Result<Table> {
        info!(
            dataset = %session.dataset(),
            selection_revision = selection.revision(),
            initial_limit = ?self.initial_limit,
            chunk_size = ?self.chunk_size,
            "Starting table reconstruction"
        );

        let result = self.run_impl(session, selection).await;

        match &result {
            Ok(table) => info!(rows = table.num_rows(), columns = table.num_columns(), "Table reconstruction completed"),
            Err(e) => {
                info!(error = %e, "Table reconstruction failed");
                // The instance may be gone on the server; the next run starts over.
                if let TableReconstructionError::FetchFailed { source, .. } = e
                    && source.is_stale_instance()
                {
                    session.invalidate();
                }
            },
        }

        result
    }

    async fn run_impl(self, session: &mut InstanceSession, selection: &Selection) -> Result<Table> {
        let Self {
            config,
            initial_limit,
            chunk_size,
            parallel,
            progress_updater,
            cancellation_token,
        } = self;

        if cancellation_token.is_cancelled() {
            return Err(TableReconstructionError::Cancelled);
        }

        let initial_limit = initial_limit.unwrap_or(config.initial_limit);
        if initial_limit == 0 || chunk_size == Some(0) {
            return Err(TableReconstructionError::ConfigurationError(
                "Page limits must be greater than zero".to_owned(),
            ));
        }

        let body = selection.build_request_body().to_json()?;
        let (handle, first_page) = session.first_page(&body, selection.revision(), initial_limit).await?;

        let decoder = GridDecoder::from_first_page(&first_page.payload)?;

        let chunk_size = ChunkSizeEstimator::from_config(&config).resolve(
            chunk_size,
            handle.first_page_byte_size,
            initial_limit,
        );
        let plan = FetchPlan::new(handle.total, initial_limit, chunk_size);

        let mut scheduler = FetchScheduler::new(&config)
            .parallel(parallel.unwrap_or(config.parallel))
            .with_cancellation_token(cancellation_token);
        if let Some(updater) = progress_updater {
            scheduler = scheduler.with_progress_updater(updater);
        }

        let reserved_rows = plan.rows_to_reserve(scheduler.workers_for(&plan));
        let mut assembler = TableAssembler::with_capacity(decoder.columns().to_vec(), reserved_rows);

        let first_chunk = decoder.decode(&first_page.payload, 0)?;
        plan.check_rows(&first_chunk)?;
        assembler.append(first_chunk)?;
        session.advance(assembler.num_rows());

        info!(
            instance_id = %handle.instance_id,
            total = handle.total,
            chunk_size,
            pages = plan.total_pages(),
            "Received first page"
        );
        scheduler.report_first_page(&plan).await;

        let fetcher = session.page_fetcher()?;
        scheduler
            .execute(&fetcher, &plan, &decoder, &mut assembler)
            .await
            .info_error_fn(|| format!("Fetching pages of instance {} failed", handle.instance_id))?;
        session.advance(handle.total);

        assembler.finalize(handle.total)
    }
}

#[cfg(test)]
mod tests {
    use cube_client::{Client, CubeClientError, LocalClient, LocalDataset, LocalRequest};
    use cube_types::DatasetRef;
    use serde_json::json;

    use super::*;
    use crate::filter::FilterUniverse;
    use crate::instance_session::SessionState;

    const NUMBER: &str = "A0000000000000000000000000000001";
    const VALUE: &str = "M0000000000000000000000000000001";

    fn setup(rows: usize) -> (Arc<LocalClient>, InstanceSession) {
        let client = LocalClient::new();
        let dataset = DatasetRef::cube("CUBE");
        let mut data = LocalDataset::new("CUBE", "Numbers")
            .with_attribute(NUMBER, "Number", &[("F1", "ID")])
            .with_metric(VALUE, "Value");
        for i in 0..rows {
            data = data.with_row(vec![vec![&i.to_string()]], vec![json!(i)]);
        }
        client.add_dataset(dataset.clone(), data);
        let session = InstanceSession::new(client.clone(), dataset);
        (client, session)
    }

    fn page_offsets(client: &LocalClient) -> Vec<usize> {
        client
            .requests()
            .into_iter()
            .filter_map(|r| match r {
                LocalRequest::GetPage { offset, .. } => Some(offset),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_small_instance_needs_one_extra_page() {
        let (client, mut session) = setup(5);
        let table = TableReconstructor::new()
            .with_initial_limit(3)
            .with_chunk_size(3)
            .run(&mut session, &Selection::new())
            .await
            .unwrap();

        assert_eq!(table.num_rows(), 5);
        assert_eq!(page_offsets(&client), vec![3]);
        assert!(matches!(session.state(), SessionState::Drained { .. }));
    }

    #[tokio::test]
    async fn test_estimated_chunk_size() {
        let (client, mut session) = setup(2500);
        let config = FetchConfig {
            target_chunk_bytes: utils::ByteSize::new(1),
            min_chunk_rows: 700,
            ..Default::default()
        };

        let table = TableReconstructor::new()
            .with_config(&config)
            .with_initial_limit(1000)
            .run(&mut session, &Selection::new())
            .await
            .unwrap();

        assert_eq!(table.num_rows(), 2500);
        let mut offsets = page_offsets(&client);
        offsets.sort();
        assert_eq!(offsets, vec![1000, 1700, 2400]);
    }

    #[tokio::test]
    async fn test_second_run_reuses_instance() {
        let (client, mut session) = setup(10);
        let selection = Selection::new();
        let first = TableReconstructor::new().run(&mut session, &selection).await.unwrap();
        let second = TableReconstructor::new().run(&mut session, &selection).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.instance_count(), 1);
    }

    #[tokio::test]
    async fn test_selection_change_creates_instance() {
        let (client, mut session) = setup(10);
        let definition = client.get_definition(session.dataset()).await.unwrap();
        let universe = FilterUniverse::from_definition(&definition, &[]);

        let mut selection = Selection::new();
        TableReconstructor::new().run(&mut session, &selection).await.unwrap();
        selection.select(&universe, &[VALUE]).unwrap();
        let table = TableReconstructor::new().run(&mut session, &selection).await.unwrap();

        assert_eq!(table.num_rows(), 10);
        assert_eq!(client.instance_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_later_page_invalidates_session() {
        let (client, mut session) = setup(10);
        client.fail_page_at_offset(4, CubeClientError::StaleInstance {
            instance_id: "gone".into(),
        });

        let err = TableReconstructor::new()
            .with_initial_limit(4)
            .with_chunk_size(4)
            .run(&mut session, &Selection::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TableReconstructionError::FetchFailed { offset: 4, .. }));
        assert!(session.handle().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (client, mut session) = setup(10);
        let token = CancellationToken::new();
        token.cancel();

        let err = TableReconstructor::new()
            .with_cancellation_token(token)
            .run(&mut session, &Selection::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TableReconstructionError::Cancelled));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let (_client, mut session) = setup(10);
        let err = TableReconstructor::new()
            .with_initial_limit(0)
            .run(&mut session, &Selection::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TableReconstructionError::ConfigurationError(_)));
    }
}
