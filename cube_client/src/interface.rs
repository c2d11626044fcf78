use cube_types::{AttributeElementsPage, DatasetDefinition, DatasetRef, FetchedPage, TableMembershipResponse};
use serde_json::Value;

use crate::error::Result;

/// A client to the library REST server's dataset API. It provides
/// 1. the definition of a cube or report (available attributes and metrics)
/// 2. creation of a filtered, paged instance and retrieval of its pages
/// 3. the source-table membership of a dataset's columns
/// 4. paged attribute elements
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    async fn get_definition(&self, dataset: &DatasetRef) -> Result<DatasetDefinition>;

    /// Create a new instance for the request `body` and return its first page,
    /// starting at `offset` and holding at most `limit` rows.
    async fn create_instance(&self, dataset: &DatasetRef, body: &Value, offset: usize, limit: usize)
    -> Result<FetchedPage>;

    /// Retrieve a page of an existing instance. Fails with `StaleInstance` if the
    /// server no longer holds the instance.
    async fn get_page(&self, dataset: &DatasetRef, instance_id: &str, offset: usize, limit: usize)
    -> Result<FetchedPage>;

    async fn get_table_membership(&self, dataset: &DatasetRef) -> Result<TableMembershipResponse>;

    async fn get_attribute_elements(
        &self,
        dataset: &DatasetRef,
        attribute_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<AttributeElementsPage>;
}
