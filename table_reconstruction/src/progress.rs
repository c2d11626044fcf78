use async_trait::async_trait;

/// Receives page counts while a table is fetched. The first page counts as page 1.
#[async_trait]
pub trait ProgressUpdater: Send + Sync {
    async fn update(&self, pages_fetched: usize, total_pages: usize);
}

#[async_trait]
impl<F> ProgressUpdater for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    async fn update(&self, pages_fetched: usize, total_pages: usize) {
        self(pages_fetched, total_pages)
    }
}

pub struct NoOpProgressUpdater;

#[async_trait]
impl ProgressUpdater for NoOpProgressUpdater {
    async fn update(&self, _pages_fetched: usize, _total_pages: usize) {}
}
