use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use cube_types::{
    AttributeDefinition, AttributeElement, AttributeElementsPage, AvailableObjects, DatasetDefinition, DatasetRef,
    FetchedPage, Grid, GridAttribute, GridColumn, GridColumnElement, GridElement, Headers, InstanceDefinition,
    InstancePayload, MetricValues, MetricsPosition, ObjectInfo, PageData, Paging, TableColumnInfo, TableInfo,
    TableMembershipResponse,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::Client;
use crate::error::{CubeClientError, Result};

/// One row of a local dataset: the form values of every attribute, then the metric values.
#[derive(Debug, Clone)]
pub struct LocalRow {
    /// Indexed by attribute, then by form. A single value for a multi-form attribute
    /// is served as a short form-value list, like the server does for subtotal rows.
    pub attribute_values: Vec<Vec<String>>,
    pub metric_values: Vec<Value>,
}

impl LocalRow {
    fn attribute_values(&self, attribute_idx: usize) -> Result<&[String]> {
        self.attribute_values.get(attribute_idx).map(Vec::as_slice).ok_or_else(|| {
            CubeClientError::InvalidArguments(format!(
                "Row holds {} attribute values; attribute {attribute_idx} has none",
                self.attribute_values.len()
            ))
        })
    }
}

/// A dataset held in memory by a `LocalClient`.
///
/// Unselected attributes are projected away without aggregating metrics, so an instance
/// always holds one row per matching dataset row.
#[derive(Debug, Clone)]
pub struct LocalDataset {
    id: String,
    name: String,
    attributes: Vec<AttributeDefinition>,
    metrics: Vec<ObjectInfo>,
    rows: Vec<LocalRow>,
    tables: Vec<(String, Vec<String>)>,
}

impl LocalDataset {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attributes: Vec::new(),
            metrics: Vec::new(),
            rows: Vec::new(),
            tables: Vec::new(),
        }
    }

    /// Adds an attribute; `forms` are `(form_id, form_name)` pairs.
    pub fn with_attribute(mut self, id: &str, name: &str, forms: &[(&str, &str)]) -> Self {
        self.attributes.push(AttributeDefinition {
            id: id.to_owned(),
            name: name.to_owned(),
            forms: forms
                .iter()
                .map(|(id, name)| ObjectInfo {
                    id: (*id).to_owned(),
                    name: (*name).to_owned(),
                })
                .collect(),
        });
        self
    }

    pub fn with_metric(mut self, id: &str, name: &str) -> Self {
        self.metrics.push(ObjectInfo {
            id: id.to_owned(),
            name: name.to_owned(),
        });
        self
    }

    pub fn with_row(mut self, attribute_values: Vec<Vec<&str>>, metric_values: Vec<Value>) -> Self {
        self.rows.push(LocalRow {
            attribute_values: attribute_values
                .into_iter()
                .map(|forms| forms.into_iter().map(str::to_owned).collect())
                .collect(),
            metric_values,
        });
        self
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = LocalRow>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Declares a source table holding the named columns.
    pub fn with_table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables
            .push((name.to_owned(), columns.iter().map(|c| (*c).to_owned()).collect()));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn definition(&self) -> DatasetDefinition {
        DatasetDefinition {
            id: self.id.clone(),
            name: self.name.clone(),
            available_objects: AvailableObjects {
                attributes: self.attributes.clone(),
                metrics: self.metrics.clone(),
            },
        }
    }

    fn element_id(&self, attribute_idx: usize, row: &LocalRow) -> Result<String> {
        let value = row.attribute_values(attribute_idx)?.first().map(String::as_str).unwrap_or("");
        Ok(format!("{}:{value}", self.attributes[attribute_idx].id))
    }
}

/// A request received by a `LocalClient`, recorded for inspection by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRequest {
    GetDefinition,
    CreateInstance { offset: usize, limit: usize },
    GetPage { instance_id: String, offset: usize, limit: usize },
    GetTableMembership,
    GetAttributeElements { attribute_id: String, offset: usize, limit: usize },
}

#[derive(Debug, Clone)]
struct LocalInstance {
    dataset: DatasetRef,
    row_indices: Vec<usize>,
    attribute_columns: Vec<(usize, Vec<usize>)>,
    metric_columns: Vec<usize>,
}

/// An in-memory stand-in for the library REST server.
///
/// Pages are encoded exactly like the server's: each page carries its own element lists,
/// and header rows index into them. Hooks allow expiring instances, failing or delaying
/// specific page offsets, and timing out large element requests.
pub struct LocalClient {
    datasets: RwLock<HashMap<DatasetRef, LocalDataset>>,
    instances: Mutex<HashMap<String, LocalInstance>>,
    next_instance_id: AtomicU64,
    page_failures: Mutex<HashMap<usize, CubeClientError>>,
    page_delays: Mutex<HashMap<usize, Duration>>,
    element_timeout_above: AtomicUsize,
    requests: Mutex<Vec<LocalRequest>>,
}

impl LocalClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            datasets: RwLock::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            next_instance_id: AtomicU64::new(1),
            page_failures: Mutex::new(HashMap::new()),
            page_delays: Mutex::new(HashMap::new()),
            element_timeout_above: AtomicUsize::new(usize::MAX),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn add_dataset(&self, dataset_ref: DatasetRef, dataset: LocalDataset) {
        self.datasets.write().unwrap().insert(dataset_ref, dataset);
    }

    /// Drops every instance, as the server does when instances expire.
    pub fn expire_all_instances(&self) {
        let mut instances = self.instances.lock().unwrap();
        info!(count = instances.len(), "Expiring all local instances");
        instances.clear();
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }

    /// Every later `get_page` at `offset` fails with `error`.
    pub fn fail_page_at_offset(&self, offset: usize, error: CubeClientError) {
        self.page_failures.lock().unwrap().insert(offset, error);
    }

    /// Every later `get_page` at `offset` waits `delay` before answering.
    pub fn delay_page_at_offset(&self, offset: usize, delay: Duration) {
        self.page_delays.lock().unwrap().insert(offset, delay);
    }

    /// Element requests with a limit above `limit` fail with a server-side timeout.
    pub fn time_out_element_requests_above(&self, limit: usize) {
        self.element_timeout_above.store(limit, Ordering::Relaxed);
    }

    pub fn requests(&self) -> Vec<LocalRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn record(&self, request: LocalRequest) {
        self.requests.lock().unwrap().push(request);
    }

    fn with_dataset<T>(&self, dataset: &DatasetRef, f: impl FnOnce(&LocalDataset) -> Result<T>) -> Result<T> {
        let datasets = self.datasets.read().unwrap();
        let Some(ds) = datasets.get(dataset) else {
            return Err(CubeClientError::NotFound(format!("Dataset {dataset} not found")));
        };
        f(ds)
    }

    fn build_instance(&self, dataset_ref: &DatasetRef, ds: &LocalDataset, body: &Value) -> Result<LocalInstance> {
        let requested = body.get("requestedObjects");

        let attribute_columns = match requested.and_then(|r| r.get("attributes")) {
            None => ds
                .attributes
                .iter()
                .enumerate()
                .map(|(i, a)| (i, (0..a.forms.len().max(1)).collect()))
                .collect(),
            Some(list) => {
                let list = list
                    .as_array()
                    .ok_or_else(|| anyhow!("requestedObjects.attributes must be a list"))?;
                let mut columns = Vec::with_capacity(list.len());
                for entry in list {
                    let id = entry
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| anyhow!("attribute entry without id"))?;
                    let attr_idx = ds.attributes.iter().position(|a| a.id == id).ok_or_else(|| {
                        CubeClientError::InvalidArguments(format!("Unknown attribute '{id}' in request"))
                    })?;
                    let attr = &ds.attributes[attr_idx];
                    let forms = match entry.get("forms").and_then(Value::as_array) {
                        None => (0..attr.forms.len().max(1)).collect(),
                        Some(forms) => forms
                            .iter()
                            .map(|f| {
                                let form_id = f.get("id").and_then(Value::as_str).unwrap_or("");
                                attr.forms.iter().position(|af| af.id == form_id).ok_or_else(|| {
                                    CubeClientError::InvalidArguments(format!(
                                        "Unknown form '{form_id}' of attribute '{id}'"
                                    ))
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    };
                    columns.push((attr_idx, forms));
                }
                columns
            },
        };

        let metric_columns = match requested.and_then(|r| r.get("metrics")) {
            None => (0..ds.metrics.len()).collect(),
            Some(list) => list
                .as_array()
                .ok_or_else(|| anyhow!("requestedObjects.metrics must be a list"))?
                .iter()
                .map(|entry| {
                    let id = entry.get("id").and_then(Value::as_str).unwrap_or("");
                    ds.metrics.iter().position(|m| m.id == id).ok_or_else(|| {
                        CubeClientError::InvalidArguments(format!("Unknown metric '{id}' in request"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let view_filter = body.get("viewFilter");
        let mut row_indices = Vec::with_capacity(ds.rows.len());
        for (i, row) in ds.rows.iter().enumerate() {
            let keep = match view_filter {
                None => true,
                Some(filter) => evaluate_view_filter(ds, row, filter)?,
            };
            if keep {
                row_indices.push(i);
            }
        }

        Ok(LocalInstance {
            dataset: dataset_ref.clone(),
            row_indices,
            attribute_columns,
            metric_columns,
        })
    }

    fn encode_page(&self, instance_id: &str, instance: &LocalInstance, offset: usize, limit: usize) -> Result<FetchedPage> {
        self.with_dataset(&instance.dataset, |ds| {
            let total = instance.row_indices.len();
            let start = offset.min(total);
            let end = offset.saturating_add(limit).min(total);
            let page_rows = &instance.row_indices[start..end];

            let mut grid_rows = Vec::with_capacity(instance.attribute_columns.len());
            let mut header_rows = vec![Vec::with_capacity(instance.attribute_columns.len()); page_rows.len()];

            for (attr_idx, forms) in &instance.attribute_columns {
                let attr = &ds.attributes[*attr_idx];
                let mut elements: Vec<GridElement> = Vec::new();
                let mut element_index: HashMap<Vec<String>, usize> = HashMap::new();

                for (r, &row_idx) in page_rows.iter().enumerate() {
                    let row = &ds.rows[row_idx];
                    let values = row.attribute_values(*attr_idx)?;
                    let form_values: Vec<String> = if values.len() == 1 {
                        values.to_vec()
                    } else {
                        forms.iter().map(|&f| values.get(f).cloned().unwrap_or_default()).collect()
                    };

                    let idx = match element_index.get(&form_values) {
                        Some(&idx) => idx,
                        None => {
                            elements.push(GridElement {
                                id: Some(ds.element_id(*attr_idx, row)?),
                                form_values: form_values.clone(),
                            });
                            element_index.insert(form_values, elements.len() - 1);
                            elements.len() - 1
                        },
                    };
                    header_rows[r].push(idx);
                }

                grid_rows.push(GridAttribute {
                    id: attr.id.clone(),
                    name: attr.name.clone(),
                    forms: forms.iter().filter_map(|&f| attr.forms.get(f).cloned()).collect(),
                    elements,
                });
            }

            let (columns, metrics_position) = if instance.metric_columns.is_empty() {
                (Vec::new(), None)
            } else {
                let column = GridColumn {
                    id: None,
                    name: "Metrics".to_owned(),
                    elements: instance
                        .metric_columns
                        .iter()
                        .map(|&m| GridColumnElement {
                            id: Some(ds.metrics[m].id.clone()),
                            name: ds.metrics[m].name.clone(),
                        })
                        .collect(),
                };
                let position = MetricsPosition {
                    axis: "columns".to_owned(),
                    index: 0,
                };
                (vec![column], Some(position))
            };

            let raw = if instance.metric_columns.is_empty() {
                Vec::new()
            } else {
                page_rows
                    .iter()
                    .map(|&row_idx| {
                        let row = &ds.rows[row_idx];
                        instance
                            .metric_columns
                            .iter()
                            .map(|&m| row.metric_values.get(m).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect()
            };

            let payload = InstancePayload {
                instance_id: instance_id.to_owned(),
                definition: InstanceDefinition {
                    grid: Grid {
                        rows: grid_rows,
                        columns,
                        metrics_position,
                    },
                },
                data: PageData {
                    paging: Paging {
                        total,
                        current: page_rows.len(),
                        offset,
                        limit,
                    },
                    headers: Headers { rows: header_rows },
                    metric_values: MetricValues { raw },
                },
            };

            let byte_size = serde_json::to_vec(&payload)?.len();
            Ok(FetchedPage { payload, byte_size })
        })
    }
}

fn evaluate_view_filter(ds: &LocalDataset, row: &LocalRow, filter: &Value) -> Result<bool> {
    let operator = filter
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("view filter node without operator"))?;
    let operands = filter
        .get("operands")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("view filter node without operands"))?;

    match operator {
        "And" => {
            for operand in operands {
                if !evaluate_view_filter(ds, row, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        },
        "Or" => {
            for operand in operands {
                if evaluate_view_filter(ds, row, operand)? {
                    return Ok(true);
                }
            }
            Ok(false)
        },
        "In" | "NotIn" => {
            let attribute_id = operands
                .iter()
                .find(|o| o.get("type").and_then(Value::as_str) == Some("attribute"))
                .and_then(|o| o.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("{operator} filter without attribute operand"))?;
            let element_ids: HashSet<&str> = operands
                .iter()
                .find(|o| o.get("type").and_then(Value::as_str) == Some("elements"))
                .and_then(|o| o.get("elements"))
                .and_then(Value::as_array)
                .map(|elements| elements.iter().filter_map(|e| e.get("id").and_then(Value::as_str)).collect())
                .unwrap_or_default();

            let attr_idx = ds.attributes.iter().position(|a| a.id == attribute_id).ok_or_else(|| {
                CubeClientError::InvalidArguments(format!("Unknown attribute '{attribute_id}' in view filter"))
            })?;
            let contained = element_ids.contains(ds.element_id(attr_idx, row)?.as_str());
            Ok(if operator == "In" { contained } else { !contained })
        },
        other => Err(CubeClientError::InvalidArguments(format!("Unsupported view filter operator '{other}'"))),
    }
}

#[async_trait]
impl Client for LocalClient {
    async fn get_definition(&self, dataset: &DatasetRef) -> Result<DatasetDefinition> {
        self.record(LocalRequest::GetDefinition);
        self.with_dataset(dataset, |ds| Ok(ds.definition()))
    }

    async fn create_instance(
        &self,
        dataset: &DatasetRef,
        body: &Value,
        offset: usize,
        limit: usize,
    ) -> Result<FetchedPage> {
        self.record(LocalRequest::CreateInstance { offset, limit });

        let instance = self.with_dataset(dataset, |ds| self.build_instance(dataset, ds, body))?;
        let instance_id = format!("{:032X}", self.next_instance_id.fetch_add(1, Ordering::Relaxed));
        let page = self.encode_page(&instance_id, &instance, offset, limit)?;

        debug!(%instance_id, total = instance.row_indices.len(), "Created local instance");
        self.instances.lock().unwrap().insert(instance_id, instance);
        Ok(page)
    }

    async fn get_page(
        &self,
        dataset: &DatasetRef,
        instance_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<FetchedPage> {
        self.record(LocalRequest::GetPage {
            instance_id: instance_id.to_owned(),
            offset,
            limit,
        });

        let delay = self.page_delays.lock().unwrap().get(&offset).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.page_failures.lock().unwrap().get(&offset).cloned() {
            return Err(err);
        }

        let instance = self.instances.lock().unwrap().get(instance_id).cloned();
        let Some(instance) = instance.filter(|i| &i.dataset == dataset) else {
            return Err(CubeClientError::StaleInstance {
                instance_id: instance_id.to_owned(),
            });
        };

        self.encode_page(instance_id, &instance, offset, limit)
    }

    async fn get_table_membership(&self, dataset: &DatasetRef) -> Result<TableMembershipResponse> {
        self.record(LocalRequest::GetTableMembership);
        self.with_dataset(dataset, |ds| {
            let mut response = TableMembershipResponse::default();
            for (table, columns) in &ds.tables {
                response.tables.push(TableInfo { name: table.clone() });
                response.columns.extend(columns.iter().map(|c| TableColumnInfo {
                    column_name: c.clone(),
                    table_name: table.clone(),
                }));
            }
            Ok(response)
        })
    }

    async fn get_attribute_elements(
        &self,
        dataset: &DatasetRef,
        attribute_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<AttributeElementsPage> {
        self.record(LocalRequest::GetAttributeElements {
            attribute_id: attribute_id.to_owned(),
            offset,
            limit,
        });

        if limit > self.element_timeout_above.load(Ordering::Relaxed) {
            return Err(CubeClientError::RequestTimeout(format!(
                "Element request for '{attribute_id}' with limit {limit} timed out"
            )));
        }

        self.with_dataset(dataset, |ds| {
            let attr_idx = ds
                .attributes
                .iter()
                .position(|a| a.id == attribute_id)
                .ok_or_else(|| CubeClientError::NotFound(format!("Attribute '{attribute_id}' not found")))?;

            let mut seen = HashSet::new();
            let mut all_elements = Vec::new();
            for row in &ds.rows {
                let id = ds.element_id(attr_idx, row)?;
                if seen.insert(id.clone()) {
                    all_elements.push(AttributeElement {
                        id,
                        form_values: row.attribute_values(attr_idx)?.to_vec(),
                    });
                }
            }

            let total = all_elements.len();
            let elements = all_elements.into_iter().skip(offset).take(limit).collect();
            Ok(AttributeElementsPage { elements, total })
        })
    }
}
