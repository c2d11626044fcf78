use std::sync::Arc;

use cube_client::Client;
use cube_types::{DatasetRef, FetchedPage};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::error::{Result, TableReconstructionError};

/// A server-side instance created from one request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub instance_id: String,
    /// Rows in the instance, as reported with the first page.
    pub total: usize,
    /// Row limit of the first page.
    pub limit: usize,
    /// Serialized size of the first page.
    pub first_page_byte_size: usize,
    /// `Selection::revision` the instance was built from.
    pub selection_revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoInstance,
    Active { handle: InstanceHandle, next_offset: usize },
    Drained { handle: InstanceHandle },
}

/// Owns the lifecycle of the server-side instance of one dataset.
///
/// `create` always starts over; `first_page` reuses the current instance when it was
/// built from the same selection, and recreates it once if the server no longer holds it.
pub struct InstanceSession {
    client: Arc<dyn Client>,
    dataset: DatasetRef,
    state: SessionState,
}

impl InstanceSession {
    pub fn new(client: Arc<dyn Client>, dataset: DatasetRef) -> Self {
        Self {
            client,
            dataset,
            state: SessionState::NoInstance,
        }
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn handle(&self) -> Option<&InstanceHandle> {
        match &self.state {
            SessionState::NoInstance => None,
            SessionState::Active { handle, .. } | SessionState::Drained { handle } => Some(handle),
        }
    }

    pub fn invalidate(&mut self) {
        if let Some(handle) = self.handle() {
            debug!(instance_id = %handle.instance_id, "Invalidating instance");
        }
        self.state = SessionState::NoInstance;
    }

    fn activate(&mut self, page: &FetchedPage, selection_revision: u64, limit: usize) -> InstanceHandle {
        let handle = InstanceHandle {
            instance_id: page.instance_id().to_owned(),
            total: page.paging().total,
            limit,
            first_page_byte_size: page.byte_size,
            selection_revision,
        };

        let next_offset = page.payload.data.headers.rows.len();
        self.state = if next_offset >= handle.total {
            SessionState::Drained { handle: handle.clone() }
        } else {
            SessionState::Active {
                handle: handle.clone(),
                next_offset,
            }
        };
        handle
    }

    /// Creates a new instance for `body` and returns it with its first page.
    #[instrument(skip_all, name = "InstanceSession::create", fields(dataset = %self.dataset, initial_limit = initial_limit))]
    pub async fn create(
        &mut self,
        body: &Value,
        selection_revision: u64,
        initial_limit: usize,
    ) -> Result<(InstanceHandle, FetchedPage)> {
        self.state = SessionState::NoInstance;

        let page = self
            .client
            .create_instance(&self.dataset, body, 0, initial_limit)
            .await
            .map_err(|e| TableReconstructionError::fetch_failed(0, e))?;

        let handle = self.activate(&page, selection_revision, initial_limit);
        info!(
            instance_id = %handle.instance_id,
            total = handle.total,
            first_page_byte_size = handle.first_page_byte_size,
            "Created instance"
        );
        Ok((handle, page))
    }

    /// Returns the first page of an instance for `body`, reusing the current instance when possible.
    #[instrument(skip_all, name = "InstanceSession::first_page", fields(dataset = %self.dataset, initial_limit = initial_limit))]
    pub async fn first_page(
        &mut self,
        body: &Value,
        selection_revision: u64,
        initial_limit: usize,
    ) -> Result<(InstanceHandle, FetchedPage)> {
        let reusable = self
            .handle()
            .filter(|h| h.selection_revision == selection_revision && h.limit == initial_limit)
            .map(|h| h.instance_id.clone());

        let Some(instance_id) = reusable else {
            return self.create(body, selection_revision, initial_limit).await;
        };

        match self.client.get_page(&self.dataset, &instance_id, 0, initial_limit).await {
            Ok(page) => {
                let handle = self.activate(&page, selection_revision, initial_limit);
                debug!(instance_id = %handle.instance_id, total = handle.total, "Reusing instance");
                Ok((handle, page))
            },
            Err(e) if e.is_stale_instance() => {
                info!(%instance_id, "Instance is stale; recreating it");
                self.invalidate();
                self.create(body, selection_revision, initial_limit).await
            },
            Err(e) => Err(TableReconstructionError::fetch_failed(0, e)),
        }
    }

    /// Records that rows up to `offset` have been received.
    pub fn advance(&mut self, offset: usize) {
        if let SessionState::Active { handle, next_offset } = &mut self.state {
            *next_offset = offset.max(*next_offset);
            if *next_offset >= handle.total {
                self.state = SessionState::Drained { handle: handle.clone() };
            }
        }
    }

    /// A fetcher for the remaining pages of the active instance.
    pub fn page_fetcher(&self) -> Result<PageFetcher> {
        match &self.state {
            SessionState::Active { handle, .. } | SessionState::Drained { handle } => Ok(PageFetcher {
                client: self.client.clone(),
                dataset: self.dataset.clone(),
                instance_id: handle.instance_id.clone(),
            }),
            SessionState::NoInstance => Err(TableReconstructionError::InternalError(
                "Page fetcher requested without an instance".to_owned(),
            )),
        }
    }
}

/// Fetches pages of one instance; cheap to clone into concurrent tasks.
#[derive(Clone)]
pub struct PageFetcher {
    client: Arc<dyn Client>,
    dataset: DatasetRef,
    instance_id: String,
}

impl PageFetcher {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Any failure, including a stale instance, fails with `FetchFailed` at `offset`.
    pub async fn fetch(&self, offset: usize, limit: usize) -> Result<FetchedPage> {
        self.client
            .get_page(&self.dataset, &self.instance_id, offset, limit)
            .await
            .map_err(|e| TableReconstructionError::fetch_failed(offset, e))
    }
}

#[cfg(test)]
mod tests {
    use cube_client::{LocalClient, LocalDataset, LocalRequest};
    use serde_json::json;

    use super::*;

    fn setup(rows: usize) -> (Arc<LocalClient>, InstanceSession) {
        let client = LocalClient::new();
        let dataset = DatasetRef::cube("CUBE");
        let mut data = LocalDataset::new("CUBE", "Numbers")
            .with_attribute("A0000000000000000000000000000001", "Number", &[("F1", "ID")])
            .with_metric("M0000000000000000000000000000001", "Value");
        for i in 0..rows {
            data = data.with_row(vec![vec![&i.to_string()]], vec![json!(i)]);
        }
        client.add_dataset(dataset.clone(), data);
        let session = InstanceSession::new(client.clone(), dataset);
        (client, session)
    }

    #[tokio::test]
    async fn test_create_transitions() {
        let (_client, mut session) = setup(5);
        assert_eq!(session.state(), &SessionState::NoInstance);

        let (handle, page) = session.create(&json!({}), 0, 3).await.unwrap();
        assert_eq!(handle.total, 5);
        assert_eq!(page.payload.data.headers.rows.len(), 3);
        assert!(matches!(session.state(), SessionState::Active { next_offset: 3, .. }));

        session.advance(5);
        assert!(matches!(session.state(), SessionState::Drained { .. }));

        session.invalidate();
        assert!(session.handle().is_none());
    }

    #[tokio::test]
    async fn test_single_page_instance_is_drained() {
        let (_client, mut session) = setup(2);
        session.create(&json!({}), 0, 10).await.unwrap();
        assert!(matches!(session.state(), SessionState::Drained { .. }));
    }

    #[tokio::test]
    async fn test_first_page_reuses_instance() {
        let (client, mut session) = setup(5);
        let (first, _) = session.first_page(&json!({}), 1, 3).await.unwrap();
        let (second, _) = session.first_page(&json!({}), 1, 3).await.unwrap();

        assert_eq!(first.instance_id, second.instance_id);
        assert_eq!(client.instance_count(), 1);
        assert!(matches!(client.requests()[1], LocalRequest::GetPage { offset: 0, .. }));
    }

    #[tokio::test]
    async fn test_first_page_with_new_revision_recreates() {
        let (client, mut session) = setup(5);
        let (first, _) = session.first_page(&json!({}), 1, 3).await.unwrap();
        let (second, _) = session.first_page(&json!({}), 2, 3).await.unwrap();

        assert_ne!(first.instance_id, second.instance_id);
        assert_eq!(client.instance_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_first_page_recreates_once() {
        let (client, mut session) = setup(5);
        let (first, _) = session.first_page(&json!({}), 1, 3).await.unwrap();
        client.expire_all_instances();
        client.clear_requests();

        let (second, page) = session.first_page(&json!({}), 1, 3).await.unwrap();
        assert_ne!(first.instance_id, second.instance_id);
        assert_eq!(page.paging().total, 5);

        let creates = client
            .requests()
            .iter()
            .filter(|r| matches!(r, LocalRequest::CreateInstance { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_stale_later_page_fails_fetch() {
        let (client, mut session) = setup(5);
        session.create(&json!({}), 0, 3).await.unwrap();
        let fetcher = session.page_fetcher().unwrap();
        client.expire_all_instances();

        let err = fetcher.fetch(3, 3).await.unwrap_err();
        match err {
            TableReconstructionError::FetchFailed { offset, source } => {
                assert_eq!(offset, 3);
                assert!(source.is_stale_instance());
            },
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[tokio::test]
    async fn test_page_fetcher_requires_instance() {
        let (_client, session) = setup(1);
        assert!(session.page_fetcher().is_err());
    }
}
