//! Wire payloads exchanged with the library REST server.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which endpoint family hosts a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Cube,
    Report,
}

impl DatasetKind {
    /// Path segment used by the REST API.
    pub fn path_segment(&self) -> &'static str {
        match self {
            DatasetKind::Cube => "cubes",
            DatasetKind::Report => "reports",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub kind: DatasetKind,
    pub id: String,
}

impl DatasetRef {
    pub fn cube(id: impl Into<String>) -> Self {
        Self {
            kind: DatasetKind::Cube,
            id: id.into(),
        }
    }

    pub fn report(id: impl Into<String>) -> Self {
        Self {
            kind: DatasetKind::Report,
            id: id.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.path_segment(), self.id)
    }
}

// Dataset definition

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub available_objects: AvailableObjects,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableObjects {
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub metrics: Vec<ObjectInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub forms: Vec<ObjectInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: String,
    pub name: String,
}

/// Body of `GET /api/v2/cubes/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeDefinitionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub definition: CubeDefinitionBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeDefinitionBody {
    pub available_objects: AvailableObjects,
}

impl From<CubeDefinitionResponse> for DatasetDefinition {
    fn from(response: CubeDefinitionResponse) -> Self {
        DatasetDefinition {
            id: response.id,
            name: response.name,
            available_objects: response.definition.available_objects,
        }
    }
}

/// Body of `GET /api/v2/reports/{id}`. A report exposes what its grid holds, not a catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinitionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub definition: ReportDefinitionBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDefinitionBody {
    pub grid: ReportGrid,
    #[serde(default)]
    pub available_objects: ReportAvailableObjects,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportGrid {
    #[serde(default)]
    pub rows: Vec<ReportGridObject>,
    #[serde(default)]
    pub columns: Vec<ReportGridObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_position: Option<MetricsPosition>,
}

/// An attribute, the metrics template unit, or another object placed on a report axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportGridObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub object_type: String,
    #[serde(default)]
    pub forms: Vec<ObjectInfo>,
    #[serde(default)]
    pub elements: Vec<ReportGridElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportGridElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAvailableObjects {
    #[serde(default)]
    pub custom_groups: Vec<Value>,
    #[serde(default)]
    pub consolidations: Vec<Value>,
}

impl ReportDefinitionResponse {
    /// Names the first report feature whose rows cannot be reconstructed, if any.
    pub fn unsupported_feature(&self) -> Option<&'static str> {
        let objects = &self.definition.available_objects;
        if !objects.custom_groups.is_empty() {
            Some("custom groups")
        } else if !objects.consolidations.is_empty() {
            Some("consolidations")
        } else {
            None
        }
    }
}

impl From<ReportDefinitionResponse> for DatasetDefinition {
    fn from(response: ReportDefinitionResponse) -> Self {
        let grid = response.definition.grid;

        let metrics: Vec<ObjectInfo> = grid
            .metrics_position
            .as_ref()
            .and_then(|position| {
                let axis = match position.axis.as_str() {
                    "rows" => &grid.rows,
                    "columns" => &grid.columns,
                    _ => return None,
                };
                axis.get(position.index)
            })
            .map(|unit| {
                unit.elements
                    .iter()
                    .filter_map(|e| {
                        e.id.as_ref().map(|id| ObjectInfo {
                            id: id.clone(),
                            name: e.name.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let attributes: Vec<AttributeDefinition> = grid
            .rows
            .into_iter()
            .chain(grid.columns)
            .filter(|object| object.object_type == "attribute")
            .map(|object| AttributeDefinition {
                id: object.id,
                name: object.name,
                forms: object.forms,
            })
            .collect();

        DatasetDefinition {
            id: response.id,
            name: response.name,
            available_objects: AvailableObjects { attributes, metrics },
        }
    }
}

// Instance pages

/// Body of an instance creation or page response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePayload {
    pub instance_id: String,
    pub definition: InstanceDefinition,
    pub data: PageData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDefinition {
    pub grid: Grid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grid {
    /// Attributes on the row axis, each with the elements referenced by this page.
    #[serde(default)]
    pub rows: Vec<GridAttribute>,
    #[serde(default)]
    pub columns: Vec<GridColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_position: Option<MetricsPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridAttribute {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub forms: Vec<ObjectInfo>,
    #[serde(default)]
    pub elements: Vec<GridElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub form_values: Vec<String>,
}

/// A column-axis dimension. The last one lists the metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridColumn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub elements: Vec<GridColumnElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridColumnElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsPosition {
    pub axis: String,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub paging: Paging,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub metric_values: MetricValues,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub total: usize,
    #[serde(default)]
    pub current: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    /// One entry per row; each entry holds one element index per row attribute.
    #[serde(default)]
    pub rows: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    /// One entry per row; each entry holds one raw value per metric.
    #[serde(default)]
    pub raw: Vec<Vec<Value>>,
}

/// An instance page together with the size of its serialized body.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub payload: InstancePayload,
    pub byte_size: usize,
}

impl FetchedPage {
    pub fn instance_id(&self) -> &str {
        &self.payload.instance_id
    }

    pub fn paging(&self) -> &Paging {
        &self.payload.data.paging
    }
}

// Table membership

/// Body of `GET /api/datasets/{id}?fields=tables,columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetTablesResponse {
    pub result: DatasetTablesResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetTablesResult {
    pub definition: DatasetTablesDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetTablesDefinition {
    pub available_objects: TableMembershipResponse,
}

impl From<DatasetTablesResponse> for TableMembershipResponse {
    fn from(response: DatasetTablesResponse) -> Self {
        response.result.definition.available_objects
    }
}

/// Source tables of a cube and the columns each of them contributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMembershipResponse {
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub columns: Vec<TableColumnInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumnInfo {
    pub column_name: String,
    pub table_name: String,
}

// Attribute elements

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeElement {
    pub id: String,
    #[serde(default)]
    pub form_values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeElementsPage {
    pub elements: Vec<AttributeElement>,
    /// Total number of elements of the attribute, across all pages.
    pub total: usize,
}

/// Error body returned by the server on failed requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub i_server_code: Option<i64>,
}

/// `iServerCode` reported when the server-side request exceeded its time budget.
pub const ISERVER_REQUEST_TIMEOUT_CODE: i64 = -2147206497;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_instance_payload() {
        let body = serde_json::json!({
            "instanceId": "INST",
            "definition": {
                "grid": {
                    "rows": [{
                        "id": "A1", "name": "Region",
                        "forms": [{"id": "F1", "name": "DESC"}],
                        "elements": [{"formValues": ["North"]}, {"id": "A1:2", "formValues": ["South"]}]
                    }],
                    "columns": [{"name": "Metrics", "elements": [{"id": "M1", "name": "Revenue"}]}],
                    "metricsPosition": {"axis": "columns", "index": 0}
                }
            },
            "data": {
                "paging": {"total": 2, "current": 2, "offset": 0, "limit": 1000},
                "headers": {"rows": [[0], [1]]},
                "metricValues": {"raw": [[1.5], [null]]}
            }
        });

        let payload: InstancePayload = serde_json::from_value(body).unwrap();
        assert_eq!(payload.instance_id, "INST");
        assert_eq!(payload.definition.grid.rows[0].elements[1].id.as_deref(), Some("A1:2"));
        assert_eq!(payload.data.paging.total, 2);
        assert_eq!(payload.data.headers.rows, vec![vec![0], vec![1]]);
        assert!(payload.data.metric_values.raw[1][0].is_null());
    }

    #[test]
    fn test_cube_definition_nested_under_definition() {
        let body = serde_json::json!({
            "id": "CUBE",
            "name": "Sales",
            "definition": {
                "availableObjects": {
                    "attributes": [{"id": "A1", "name": "Region", "type": "attribute", "forms": [{"id": "F1", "name": "DESC"}]}],
                    "metrics": [{"id": "M1", "name": "Revenue", "type": "metric"}]
                }
            }
        });

        let definition: DatasetDefinition = serde_json::from_value::<CubeDefinitionResponse>(body).unwrap().into();
        assert_eq!(definition.name, "Sales");
        assert_eq!(definition.available_objects.attributes[0].forms[0].name, "DESC");
        assert_eq!(definition.available_objects.metrics[0].id, "M1");
    }

    #[test]
    fn test_report_definition_from_grid() {
        let body = serde_json::json!({
            "id": "REPORT",
            "name": "Regional Revenue",
            "definition": {
                "grid": {
                    "crossTab": false,
                    "rows": [
                        {"id": "A1", "name": "Region", "type": "attribute", "forms": [{"id": "F1", "name": "DESC"}]},
                        {"id": "C1", "name": "Custom", "type": "consolidation"}
                    ],
                    "columns": [
                        {"id": "A2", "name": "Year", "type": "attribute"},
                        {"id": "MX", "name": "Metrics", "type": "templateMetrics", "elements": [
                            {"id": "M1", "name": "Revenue"},
                            {"id": "M2", "name": "Cost"}
                        ]}
                    ],
                    "metricsPosition": {"axis": "columns", "index": 1}
                },
                "availableObjects": {
                    "attributes": [{"id": "A9", "name": "Unused"}],
                    "metrics": [{"id": "M9", "name": "Unused"}],
                    "customGroups": [],
                    "consolidations": []
                }
            }
        });

        let response: ReportDefinitionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.unsupported_feature(), None);

        let definition = DatasetDefinition::from(response);
        let attributes: Vec<_> = definition.available_objects.attributes.iter().map(|a| a.id.as_str()).collect();
        let metrics: Vec<_> = definition.available_objects.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(attributes, vec!["A1", "A2"]);
        assert_eq!(metrics, vec!["Revenue", "Cost"]);
        assert_eq!(definition.available_objects.attributes[0].forms.len(), 1);
    }

    #[test]
    fn test_report_without_metrics_position_has_no_metrics() {
        let body = serde_json::json!({
            "name": "Regions",
            "definition": {
                "grid": {"rows": [{"id": "A1", "name": "Region", "type": "attribute"}], "columns": []},
                "availableObjects": {"customGroups": [{"id": "CG1"}]}
            }
        });

        let response: ReportDefinitionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.unsupported_feature(), Some("custom groups"));
        let definition = DatasetDefinition::from(response);
        assert!(definition.available_objects.metrics.is_empty());
        assert_eq!(definition.available_objects.attributes.len(), 1);
    }

    #[test]
    fn test_table_membership_nested_under_result() {
        let body = serde_json::json!({
            "result": {
                "definition": {
                    "availableObjects": {
                        "tables": [{"name": "sales", "id": "T1"}],
                        "columns": [{"columnName": "Revenue", "tableName": "sales", "id": "C1"}]
                    }
                }
            }
        });

        let membership: TableMembershipResponse = serde_json::from_value::<DatasetTablesResponse>(body).unwrap().into();
        assert_eq!(membership.tables[0].name, "sales");
        assert_eq!(membership.columns[0].column_name, "Revenue");
    }

    #[test]
    fn test_table_membership_requires_result() {
        let body = serde_json::json!({"tables": [{"name": "sales"}], "columns": []});
        assert!(serde_json::from_value::<DatasetTablesResponse>(body).is_err());
    }

    #[test]
    fn test_server_error_body() {
        let body: ServerErrorBody =
            serde_json::from_str(r#"{"code":"ERR001","message":"timed out","iServerCode":-2147206497}"#).unwrap();
        assert_eq!(body.i_server_code, Some(ISERVER_REQUEST_TIMEOUT_CODE));
    }
}
