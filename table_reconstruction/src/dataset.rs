use std::sync::Arc;

use cube_client::Client;
use cube_config::FetchConfig;
use cube_types::{DatasetDefinition, DatasetKind, DatasetRef};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::element_loader::ElementLoader;
use crate::error::{Result, TableReconstructionError};
use crate::filter::{AttributeElements, ElementOperator, FilterUniverse, Selection, SelectionWarning};
use crate::instance_session::{InstanceHandle, InstanceSession};
use crate::progress::ProgressUpdater;
use crate::table_assembler::{Table, TableMembership};
use crate::table_reconstructor::TableReconstructor;

/// A cube or report: what can be selected from it, what is selected, and the server-side
/// instance holding the selected rows.
pub struct Dataset {
    client: Arc<dyn Client>,
    definition: DatasetDefinition,
    membership: TableMembership,
    universe: FilterUniverse,
    selection: Selection,
    session: InstanceSession,
    config: FetchConfig,
    progress_updater: Option<Arc<dyn ProgressUpdater>>,
    cancellation_token: CancellationToken,
}

impl Dataset {
    /// Loads the definition, and for cubes the source-table membership of its columns.
    #[instrument(skip_all, name = "Dataset::open", fields(dataset = %dataset))]
    pub async fn open(client: Arc<dyn Client>, dataset: DatasetRef) -> Result<Self> {
        let definition = client.get_definition(&dataset).await?;

        let membership = match dataset.kind {
            DatasetKind::Cube => TableMembership::from_response(&client.get_table_membership(&dataset).await?),
            DatasetKind::Report => TableMembership::default(),
        };

        let universe = FilterUniverse::from_definition(&definition, &membership.table_names());
        info!(
            name = %definition.name,
            attributes = universe.attributes().len(),
            metrics = universe.metrics().len(),
            tables = membership.tables().len(),
            "Opened dataset"
        );

        Ok(Self {
            session: InstanceSession::new(client.clone(), dataset),
            client,
            definition,
            membership,
            universe,
            selection: Selection::new(),
            config: cube_config::cube_config().fetch.clone(),
            progress_updater: None,
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn with_config(self, config: impl AsRef<FetchConfig>) -> Self {
        Self {
            config: config.as_ref().clone(),
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

    pub fn dataset_ref(&self) -> &DatasetRef {
        self.session.dataset()
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &DatasetDefinition {
        &self.definition
    }

    pub fn universe(&self) -> &FilterUniverse {
        &self.universe
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn membership(&self) -> &TableMembership {
        &self.membership
    }

    pub fn table_names(&self) -> Vec<String> {
        self.membership.table_names()
    }

    /// The current server-side instance, if any.
    pub fn instance(&self) -> Option<&InstanceHandle> {
        self.session.handle()
    }

    /// Selects attributes (`attributeId` or `attributeId;formId`) and metrics.
    pub fn select<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<Vec<SelectionWarning>> {
        self.selection.select(&self.universe, ids)
    }

    /// Selects attribute elements (`attributeId:value`) that filter the rows.
    pub fn select_elements<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<Vec<SelectionWarning>> {
        self.selection.select_elements(&self.universe, ids)
    }

    pub fn clear(&mut self, attributes: bool, metrics: bool, elements: bool) {
        self.selection.clear(attributes, metrics, elements);
    }

    pub fn clear_all(&mut self) {
        self.clear(true, true, true);
    }

    pub fn set_element_operator(&mut self, operator: ElementOperator) {
        self.selection.set_element_operator(operator);
    }

    /// Loads, once, the elements of every attribute.
    pub async fn load_attribute_elements(&self) -> Result<&[AttributeElements]> {
        ElementLoader::new(self.client.clone(), self.dataset_ref().clone(), &self.config)
            .load_into(&self.universe)
            .await
    }

    /// The selected rows as one table.
    ///
    /// With an explicit `limit`, every page holds `limit` rows and a new instance is created.
    pub async fn to_table(&mut self, limit: Option<usize>) -> Result<Table> {
        let mut reconstructor = TableReconstructor::new()
            .with_config(&self.config)
            .with_cancellation_token(self.cancellation_token.clone());

        if let Some(updater) = &self.progress_updater {
            reconstructor = reconstructor.with_progress_updater(updater.clone());
        }

        if let Some(limit) = limit {
            if limit == 0 {
                return Err(TableReconstructionError::ConfigurationError(
                    "The row limit must be greater than zero".to_owned(),
                ));
            }
            self.session.invalidate();
            reconstructor = reconstructor.with_initial_limit(limit).with_chunk_size(limit);
        }

        reconstructor.run(&mut self.session, &self.selection).await
    }

    /// The selected rows split into one table per source table.
    pub async fn to_tables(&mut self, limit: Option<usize>) -> Result<Vec<(String, Table)>> {
        if self.membership.is_empty() {
            return Err(TableReconstructionError::NotSupported(format!(
                "{} has no source-table membership to split by",
                self.dataset_ref()
            )));
        }
        let table = self.to_table(limit).await?;
        table.split_by_source_table(&self.membership)
    }
}

#[cfg(test)]
mod tests {
    use cube_client::{LocalClient, LocalDataset, LocalRequest};
    use serde_json::json;

    use super::*;

    const REGION: &str = "8D679D3711D3E4981000E787EC6DE8A4";
    const REVENUE: &str = "4C05177011D3E877C000B3B2D86C964F";
    const ROWS_SALES: &str = "7E3B6F1C4A2D4E8F9B0C1D2E3F405162";

    fn dataset() -> LocalDataset {
        LocalDataset::new("CUBE", "Sales")
            .with_attribute(REGION, "Region", &[("45C11FA478E745FEA08D781CEA190FE5", "DESC")])
            .with_metric(REVENUE, "Revenue")
            .with_metric(ROWS_SALES, "Row Count - sales")
            .with_row(vec![vec!["North"]], vec![json!(10.0), json!(1)])
            .with_row(vec![vec!["South"]], vec![json!(20.0), json!(1)])
            .with_row(vec![vec!["West"]], vec![json!(30.0), json!(1)])
            .with_table("sales", &["Region", "Revenue"])
    }

    async fn open(kind: DatasetKind) -> (Arc<LocalClient>, Dataset) {
        let client = LocalClient::new();
        let dataset_ref = DatasetRef { kind, id: "CUBE".into() };
        client.add_dataset(dataset_ref.clone(), dataset());
        let dataset = Dataset::open(client.clone(), dataset_ref).await.unwrap();
        (client, dataset)
    }

    #[tokio::test]
    async fn test_open_separates_row_count_metrics() {
        let (_client, dataset) = open(DatasetKind::Cube).await;
        assert_eq!(dataset.name(), "Sales");
        assert_eq!(dataset.table_names(), vec!["sales"]);
        assert_eq!(dataset.universe().metrics().len(), 1);
        assert_eq!(dataset.universe().row_count_metrics()[0].id, ROWS_SALES);
    }

    #[tokio::test]
    async fn test_report_skips_membership() {
        let (client, mut dataset) = open(DatasetKind::Report).await;
        assert!(dataset.membership().is_empty());
        assert!(!client.requests().contains(&LocalRequest::GetTableMembership));
        assert!(matches!(dataset.to_tables(None).await, Err(TableReconstructionError::NotSupported(_))));
    }

    #[tokio::test]
    async fn test_explicit_limit_recreates_instance() {
        let (client, mut dataset) = open(DatasetKind::Cube).await;
        dataset.select(&[REGION, REVENUE]).unwrap();

        let table = dataset.to_table(Some(1)).await.unwrap();
        assert_eq!(table.num_rows(), 3);
        let first_instance = dataset.instance().unwrap().instance_id.clone();

        dataset.to_table(Some(1)).await.unwrap();
        assert_ne!(dataset.instance().unwrap().instance_id, first_instance);
        assert_eq!(client.instance_count(), 2);

        let limits: Vec<_> = client
            .requests()
            .into_iter()
            .filter_map(|r| match r {
                LocalRequest::GetPage { offset, limit, .. } => Some((offset, limit)),
                _ => None,
            })
            .collect();
        assert!(limits.iter().all(|&(_, limit)| limit == 1));
    }

    #[tokio::test]
    async fn test_to_tables() {
        let (_client, mut dataset) = open(DatasetKind::Cube).await;
        dataset.select(&[REGION, REVENUE]).unwrap();

        let tables = dataset.to_tables(None).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].0, "sales");
        assert_eq!(tables[0].1.column_names(), vec!["Region", "Revenue"]);
        assert_eq!(tables[0].1.num_rows(), 3);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let (_client, mut dataset) = open(DatasetKind::Cube).await;
        assert!(matches!(
            dataset.to_table(Some(0)).await,
            Err(TableReconstructionError::ConfigurationError(_))
        ));
    }
}
