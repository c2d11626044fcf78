use std::future::Future;
use std::sync::Arc;

use cube_client::{Client, CubeClientError};
use cube_config::FetchConfig;
use cube_types::DatasetRef;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::fetch_scheduler::{host_concurrency, worker_count};
use crate::filter::{AttributeElements, FilterUniverse};

/// Runs `op(limit)`. While it fails with a server-side request timeout, halves the limit
/// and tries again, as long as the halved limit is at least `min_limit`.
///
/// Returns the result together with the limit that worked.
pub async fn fetch_with_limit_fallback<T, F, Fut>(
    limit: usize,
    min_limit: usize,
    op: F,
) -> std::result::Result<(T, usize), CubeClientError>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = std::result::Result<T, CubeClientError>>,
{
    let mut limit = limit;
    loop {
        match op(limit).await {
            Ok(v) => return Ok((v, limit)),
            Err(e) if e.is_request_timeout() => {
                let halved = limit / 2;
                if halved == 0 || halved < min_limit {
                    return Err(e);
                }
                warn!(limit, halved, "Request timed out; retrying with a smaller limit");
                limit = halved;
            },
            Err(e) => return Err(e),
        }
    }
}

/// Loads the elements of attributes page by page.
pub struct ElementLoader {
    client: Arc<dyn Client>,
    dataset: DatasetRef,
    limit: usize,
    min_limit: usize,
    parallel: bool,
    max_workers: usize,
    extra_workers: usize,
}

impl ElementLoader {
    pub fn new(client: Arc<dyn Client>, dataset: DatasetRef, config: &FetchConfig) -> Self {
        Self {
            client,
            dataset,
            limit: config.element_fetch_limit,
            min_limit: config.element_fetch_min_limit,
            parallel: config.parallel,
            max_workers: config.max_concurrent_page_fetches,
            extra_workers: config.extra_workers_over_cpus,
        }
    }

    pub fn with_limit(self, limit: usize) -> Self {
        Self { limit, ..self }
    }

    pub fn with_min_limit(self, min_limit: usize) -> Self {
        Self { min_limit, ..self }
    }

    pub fn parallel(self, parallel: bool) -> Self {
        Self { parallel, ..self }
    }

    /// All elements of one attribute. The limit that survived a timeout is kept for later pages.
    #[instrument(skip_all, name = "ElementLoader::load_attribute", fields(attribute_id = attribute_id))]
    pub async fn load_attribute(&self, attribute_id: &str) -> Result<AttributeElements> {
        let mut elements = Vec::new();
        let mut limit = self.limit.max(1);

        loop {
            let offset = elements.len();
            let (page, working_limit) = fetch_with_limit_fallback(limit, self.min_limit, |limit| {
                self.client.get_attribute_elements(&self.dataset, attribute_id, offset, limit)
            })
            .await?;
            limit = working_limit;

            let received = page.elements.len();
            elements.extend(page.elements);
            debug!(offset, received, total = page.total, "Received attribute elements");

            if elements.len() >= page.total {
                break;
            }
            if received == 0 {
                warn!(loaded = elements.len(), total = page.total, "Element paging ended before the reported total");
                break;
            }
        }

        Ok(AttributeElements {
            attribute_id: attribute_id.to_owned(),
            elements,
        })
    }

    /// Elements of every attribute in `attribute_ids`, in that order.
    pub async fn load<S: AsRef<str>>(&self, attribute_ids: &[S]) -> Result<Vec<AttributeElements>> {
        let workers = worker_count(
            attribute_ids.len(),
            host_concurrency(),
            self.max_workers,
            self.extra_workers,
            self.parallel,
        );
        info!(dataset = %self.dataset, attributes = attribute_ids.len(), workers, "Loading attribute elements");

        futures::stream::iter(attribute_ids.iter().map(|id| self.load_attribute(id.as_ref())))
            .buffered(workers)
            .try_collect()
            .await
    }

    /// Loads the elements of every attribute of `universe` and attaches them, unless the
    /// universe already has them.
    pub async fn load_into<'a>(&self, universe: &'a FilterUniverse) -> Result<&'a [AttributeElements]> {
        if let Some(elements) = universe.elements() {
            return Ok(elements);
        }

        let ids: Vec<&str> = universe.attributes().iter().map(|a| a.id.as_str()).collect();
        let elements = self.load(&ids).await?;
        if !universe.set_elements(elements) {
            debug!("Attribute elements were attached concurrently; keeping the first set");
        }
        Ok(universe.elements().unwrap_or_default())
    }
}
