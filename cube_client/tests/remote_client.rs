//! Tests for RemoteClient against a mock library REST server.

use std::sync::Arc;
use std::time::Duration;

use cube_client::{Client, CubeClientError, RemoteClient};
use cube_config::ClientConfig;
use cube_types::{DatasetRef, InstancePayload};
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::{Value, json};

const CUBE_ID: &str = "1700B1DE11EBD3DC1E6A0080EF150C51";
const INSTANCE_ID: &str = "A1B2C3D4E5F60718293A4B5C6D7E8F90";

fn client_for(server: &MockServer, configure: impl FnOnce(&mut ClientConfig)) -> Arc<RemoteClient> {
    let mut config = ClientConfig::default();
    config.endpoint = server.base_url();
    config.retry_base_delay = Duration::from_millis(1);
    configure(&mut config);
    RemoteClient::new(&config).unwrap()
}

fn instance_body(total: usize) -> Value {
    json!({
        "instanceId": INSTANCE_ID,
        "definition": {
            "grid": {
                "rows": [{"id": "A1", "name": "Region", "forms": [], "elements": [{"formValues": ["North"]}]}],
                "columns": [{"name": "Metrics", "elements": [{"name": "Revenue"}]}]
            }
        },
        "data": {
            "paging": {"total": total, "current": 1, "offset": 0, "limit": 1},
            "headers": {"rows": [[0]]},
            "metricValues": {"raw": [[12.5]]}
        }
    })
}

#[tokio::test]
async fn test_create_instance_posts_body_and_reports_size() {
    let server = MockServer::start_async().await;
    let request_body = json!({"requestedObjects": {"metrics": [{"id": "M1"}]}});
    let response_body = instance_body(3);
    let response_len = serde_json::to_vec(&response_body).unwrap().len();

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/api/v2/cubes/{CUBE_ID}/instances"))
                .query_param("offset", "0")
                .query_param("limit", "1000")
                .json_body(request_body.clone());
            then.status(200)
                .header("content-type", "application/json")
                .body(serde_json::to_vec(&response_body).unwrap());
        })
        .await;

    let client = client_for(&server, |_| {});
    let page = client
        .create_instance(&DatasetRef::cube(CUBE_ID), &request_body, 0, 1000)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(page.instance_id(), INSTANCE_ID);
    assert_eq!(page.paging().total, 3);
    assert_eq!(page.byte_size, response_len);
    let expected: InstancePayload = serde_json::from_value(response_body).unwrap();
    assert_eq!(page.payload, expected);
}

#[tokio::test]
async fn test_get_page_not_found_is_stale_instance() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/api/v2/reports/{CUBE_ID}/instances/{INSTANCE_ID}"));
            then.status(404).json_body(json!({"code": "ERR004", "message": "Instance not found"}));
        })
        .await;

    let client = client_for(&server, |_| {});
    let err = client
        .get_page(&DatasetRef::report(CUBE_ID), INSTANCE_ID, 1000, 1000)
        .await
        .unwrap_err();

    assert!(matches!(err, CubeClientError::StaleInstance { instance_id } if instance_id == INSTANCE_ID));
}

#[tokio::test]
async fn test_server_timeout_code_is_request_timeout() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/cubes/{CUBE_ID}/attributes/A1/elements"));
            then.status(500)
                .json_body(json!({"code": "ERR001", "message": "Request timed out", "iServerCode": -2147206497}));
        })
        .await;

    // Server-side timeouts are never retried, even with retries enabled.
    let client = client_for(&server, |c| c.retry_max_attempts = 3);
    let err = client
        .get_attribute_elements(&DatasetRef::cube(CUBE_ID), "A1", 0, 50000)
        .await
        .unwrap_err();

    assert!(err.is_request_timeout());
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn test_attribute_elements_total_from_header() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/api/cubes/{CUBE_ID}/attributes/A1/elements"))
                .query_param("offset", "2")
                .query_param("limit", "2");
            then.status(200)
                .header("x-mstr-total-count", "7")
                .json_body(json!([
                    {"id": "A1:3", "formValues": ["Three"]},
                    {"id": "A1:4", "formValues": ["Four"]}
                ]));
        })
        .await;

    let client = client_for(&server, |_| {});
    let page = client
        .get_attribute_elements(&DatasetRef::cube(CUBE_ID), "A1", 2, 2)
        .await
        .unwrap();

    assert_eq!(page.total, 7);
    assert_eq!(page.elements.len(), 2);
    assert_eq!(page.elements[1].form_values, vec!["Four"]);
}

#[tokio::test]
async fn test_definition_sends_project_header() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/api/v2/cubes/{CUBE_ID}"))
                .header("X-MSTR-ProjectID", "PROJECT");
            then.status(200).json_body(json!({
                "id": CUBE_ID,
                "name": "Sales",
                "definition": {
                    "availableObjects": {
                        "attributes": [{"id": "A1", "name": "Region", "type": "attribute"}],
                        "metrics": [{"id": "M1", "name": "Revenue", "type": "metric"}]
                    }
                }
            }));
        })
        .await;

    let client = client_for(&server, |c| c.project_id = "PROJECT".to_owned());
    let definition = client.get_definition(&DatasetRef::cube(CUBE_ID)).await.unwrap();

    mock.assert_async().await;
    assert_eq!(definition.name, "Sales");
    assert_eq!(definition.available_objects.attributes[0].name, "Region");
    assert!(definition.available_objects.attributes[0].forms.is_empty());
    assert_eq!(definition.available_objects.metrics[0].id, "M1");
}

#[tokio::test]
async fn test_report_definition_reads_grid_objects() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/v2/reports/{CUBE_ID}"));
            then.status(200).json_body(json!({
                "name": "Regional Revenue",
                "definition": {
                    "grid": {
                        "crossTab": false,
                        "rows": [{"id": "A1", "name": "Region", "type": "attribute", "forms": [{"id": "F1", "name": "DESC"}]}],
                        "columns": [{"id": "MX", "name": "Metrics", "type": "templateMetrics", "elements": [
                            {"id": "M1", "name": "Revenue"}
                        ]}],
                        "metricsPosition": {"axis": "columns", "index": 0}
                    },
                    "availableObjects": {
                        "attributes": [{"id": "A9", "name": "Not on the grid"}],
                        "metrics": [],
                        "customGroups": [],
                        "consolidations": []
                    }
                }
            }));
        })
        .await;

    let client = client_for(&server, |_| {});
    let definition = client.get_definition(&DatasetRef::report(CUBE_ID)).await.unwrap();

    assert_eq!(definition.id, CUBE_ID);
    assert_eq!(definition.name, "Regional Revenue");
    let attributes: Vec<_> = definition.available_objects.attributes.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(attributes, vec!["A1"]);
    assert_eq!(definition.available_objects.metrics[0].name, "Revenue");
}

#[tokio::test]
async fn test_report_with_consolidations_is_unsupported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/v2/reports/{CUBE_ID}"));
            then.status(200).json_body(json!({
                "name": "Consolidated",
                "definition": {
                    "grid": {"rows": [], "columns": []},
                    "availableObjects": {"customGroups": [], "consolidations": [{"id": "C1", "name": "Seasons"}]}
                }
            }));
        })
        .await;

    let client = client_for(&server, |_| {});
    let err = client.get_definition(&DatasetRef::report(CUBE_ID)).await.unwrap_err();
    assert!(matches!(err, CubeClientError::Unsupported(_)));
}

#[tokio::test]
async fn test_table_membership_reads_result_definition() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("/api/datasets/{CUBE_ID}"))
                .query_param("fields", "tables,columns");
            then.status(200).json_body(json!({
                "result": {
                    "definition": {
                        "availableObjects": {
                            "tables": [{"id": "T1", "name": "sales"}, {"id": "T2", "name": "stock"}],
                            "columns": [
                                {"columnName": "Region", "tableName": "sales"},
                                {"columnName": "Revenue", "tableName": "sales"},
                                {"columnName": "Units", "tableName": "stock"}
                            ]
                        }
                    }
                }
            }));
        })
        .await;

    let client = client_for(&server, |_| {});
    let membership = client.get_table_membership(&DatasetRef::cube(CUBE_ID)).await.unwrap();

    mock.assert_async().await;
    let tables: Vec<_> = membership.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tables, vec!["sales", "stock"]);
    assert_eq!(membership.columns.len(), 3);
    assert_eq!(membership.columns[2].table_name, "stock");
}

#[tokio::test]
async fn test_table_membership_with_wrong_shape_fails() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/datasets/{CUBE_ID}"));
            then.status(200).json_body(json!({"tables": [{"name": "sales"}], "columns": []}));
        })
        .await;

    let client = client_for(&server, |_| {});
    let err = client.get_table_membership(&DatasetRef::cube(CUBE_ID)).await.unwrap_err();
    assert!(matches!(err, CubeClientError::JsonError(_)));
}

#[tokio::test]
async fn test_transient_errors_respect_retry_budget() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/datasets/{CUBE_ID}"));
            then.status(503).body("unavailable");
        })
        .await;

    let client = client_for(&server, |_| {});
    let err = client.get_table_membership(&DatasetRef::cube(CUBE_ID)).await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(mock.hits_async().await, 1);

    let client = client_for(&server, |c| c.retry_max_attempts = 2);
    client.get_table_membership(&DatasetRef::cube(CUBE_ID)).await.unwrap_err();
    assert_eq!(mock.hits_async().await, 4);
}

#[tokio::test]
async fn test_table_membership_rejects_reports() {
    let server = MockServer::start_async().await;
    let client = client_for(&server, |_| {});
    let err = client.get_table_membership(&DatasetRef::report(CUBE_ID)).await.unwrap_err();
    assert!(matches!(err, CubeClientError::InvalidArguments(_)));
}
