use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cube_config::ClientConfig;
use cube_types::{
    AttributeElement, AttributeElementsPage, CubeDefinitionResponse, DatasetDefinition, DatasetKind, DatasetRef,
    DatasetTablesResponse, FetchedPage, InstancePayload, ReportDefinitionResponse, TableMembershipResponse,
};
use lazy_static::lazy_static;
use reqwest::Url;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{event, instrument};
use utils::ErrorPrinter;

use crate::error::{CubeClientError, Result};
use crate::http_client::{TOTAL_COUNT_HEADER, build_http_client};
use crate::retry_wrapper::{RetryWrapper, RetryableReqwestError};
use crate::{Client, INFORMATION_LOG_LEVEL};

lazy_static! {
    static ref FN_CALL_ID: AtomicU64 = AtomicU64::new(1);
}

/// Client for the library REST server.
pub struct RemoteClient {
    endpoint: String,
    http_client: Arc<ClientWithMiddleware>,
    config: ClientConfig,
}

impl RemoteClient {
    pub fn new(config: &ClientConfig) -> Result<Arc<Self>> {
        let endpoint = config.endpoint.trim_end_matches('/').to_owned();
        Url::parse(&endpoint)?;

        Ok(Arc::new(Self {
            endpoint,
            http_client: Arc::new(build_http_client(config)?),
            config: config.clone(),
        }))
    }

    /// A client for `endpoint` using the global client configuration otherwise.
    pub fn from_endpoint(endpoint: &str) -> Result<Arc<Self>> {
        let mut config = cube_config::cube_config().client.clone();
        config.endpoint = endpoint.to_owned();
        Self::new(&config)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn retry_wrapper(&self, api_tag: &'static str) -> RetryWrapper {
        RetryWrapper::new(api_tag)
            .with_max_attempts(self.config.retry_max_attempts)
            .with_base_delay(self.config.retry_base_delay)
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{path}", self.endpoint))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn paging_query(offset: usize, limit: usize) -> [(&'static str, String); 2] {
        [("offset", offset.to_string()), ("limit", limit.to_string())]
    }

    /// GET `url` and decode its JSON body; also returns the body size and the total count header if present.
    async fn get_json<T>(&self, url: Url, api_tag: &'static str) -> Result<(T, usize, Option<usize>)>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.http_client.clone();
        self.retry_wrapper(api_tag)
            .run_and_process(move || client.get(url.clone()).send(), decode_json_response::<T>)
            .await
    }
}

async fn decode_json_response<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> std::result::Result<(T, usize, Option<usize>), RetryableReqwestError> {
    let total_count = resp
        .headers()
        .get(TOTAL_COUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());

    let (value, len) = body_and_len::<T>(resp).await?;
    Ok((value, len, total_count))
}

/// Reads the full body and decodes it, returning the decoded value and the body length.
/// A body cut short by the connection is retryable; a body that is not the expected JSON is not.
async fn body_and_len<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> std::result::Result<(T, usize), RetryableReqwestError> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| RetryableReqwestError::RetryableError(CubeClientError::from(e)))?;
    let value =
        serde_json::from_slice(&bytes).map_err(|e| RetryableReqwestError::FatalError(CubeClientError::from(e)))?;
    Ok((value, bytes.len()))
}

fn stale_on_not_found(err: CubeClientError, instance_id: &str) -> CubeClientError {
    match err {
        CubeClientError::NotFound(_) => CubeClientError::StaleInstance {
            instance_id: instance_id.to_owned(),
        },
        e => e,
    }
}

#[async_trait::async_trait]
impl Client for RemoteClient {
    #[instrument(skip_all, name = "RemoteClient::get_definition", fields(dataset = %dataset))]
    async fn get_definition(&self, dataset: &DatasetRef) -> Result<DatasetDefinition> {
        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let url = self.url(&format!("/api/v2/{}/{}", dataset.kind.path_segment(), dataset.id), &[])?;
        event!(INFORMATION_LOG_LEVEL, call_id, %dataset, "Starting get_definition API call");

        let mut definition: DatasetDefinition = match dataset.kind {
            DatasetKind::Cube => self
                .get_json::<CubeDefinitionResponse>(url, "library::get_definition")
                .await
                .info_error_fn(|| format!("get_definition failed, call_id={call_id}"))?
                .0
                .into(),
            DatasetKind::Report => {
                let (report, _, _) = self
                    .get_json::<ReportDefinitionResponse>(url, "library::get_definition")
                    .await
                    .info_error_fn(|| format!("get_definition failed, call_id={call_id}"))?;
                if let Some(feature) = report.unsupported_feature() {
                    return Err(CubeClientError::Unsupported(format!("Reports with {feature} are not supported")));
                }
                report.into()
            },
        };
        if definition.id.is_empty() {
            definition.id = dataset.id.clone();
        }

        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            %dataset,
            attributes = definition.available_objects.attributes.len(),
            metrics = definition.available_objects.metrics.len(),
            "Completed get_definition API call"
        );
        Ok(definition)
    }

    #[instrument(skip_all, name = "RemoteClient::create_instance", fields(dataset = %dataset, offset = offset, limit = limit))]
    async fn create_instance(
        &self,
        dataset: &DatasetRef,
        body: &Value,
        offset: usize,
        limit: usize,
    ) -> Result<FetchedPage> {
        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let url = self.url(
            &format!("/api/v2/{}/{}/instances", dataset.kind.path_segment(), dataset.id),
            &Self::paging_query(offset, limit),
        )?;
        event!(INFORMATION_LOG_LEVEL, call_id, %dataset, offset, limit, "Starting create_instance API call");

        let client = self.http_client.clone();
        let body = body.clone();
        let (payload, byte_size) = self
            .retry_wrapper("library::create_instance")
            .run_and_process(
                move || client.post(url.clone()).json(&body).send(),
                body_and_len::<InstancePayload>,
            )
            .await
            .info_error_fn(|| format!("create_instance failed, call_id={call_id}"))?;

        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            instance_id = %payload.instance_id,
            total = payload.data.paging.total,
            byte_size,
            "Completed create_instance API call"
        );
        Ok(FetchedPage { payload, byte_size })
    }

    #[instrument(skip_all, name = "RemoteClient::get_page", fields(dataset = %dataset, instance_id = instance_id, offset = offset, limit = limit))]
    async fn get_page(
        &self,
        dataset: &DatasetRef,
        instance_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<FetchedPage> {
        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let url = self.url(
            &format!("/api/v2/{}/{}/instances/{instance_id}", dataset.kind.path_segment(), dataset.id),
            &Self::paging_query(offset, limit),
        )?;
        event!(INFORMATION_LOG_LEVEL, call_id, instance_id, offset, limit, "Starting get_page API call");

        let (payload, byte_size, _) = self
            .get_json::<InstancePayload>(url, "library::get_page")
            .await
            .map_err(|e| stale_on_not_found(e, instance_id))
            .info_error_fn(|| format!("get_page failed, call_id={call_id}"))?;

        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            instance_id,
            offset,
            rows = payload.data.headers.rows.len(),
            byte_size,
            "Completed get_page API call"
        );
        Ok(FetchedPage { payload, byte_size })
    }

    #[instrument(skip_all, name = "RemoteClient::get_table_membership", fields(dataset = %dataset))]
    async fn get_table_membership(&self, dataset: &DatasetRef) -> Result<TableMembershipResponse> {
        if dataset.kind != DatasetKind::Cube {
            return Err(CubeClientError::InvalidArguments(format!(
                "Table membership is only available for cubes, not {dataset}"
            )));
        }

        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let url = self.url(&format!("/api/datasets/{}", dataset.id), &[("fields", "tables,columns".to_owned())])?;
        event!(INFORMATION_LOG_LEVEL, call_id, %dataset, "Starting get_table_membership API call");

        let (response, _, _) = self
            .get_json::<DatasetTablesResponse>(url, "library::get_table_membership")
            .await
            .info_error_fn(|| format!("get_table_membership failed, call_id={call_id}"))?;
        let membership = TableMembershipResponse::from(response);

        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            tables = membership.tables.len(),
            "Completed get_table_membership API call"
        );
        Ok(membership)
    }

    #[instrument(skip_all, name = "RemoteClient::get_attribute_elements", fields(dataset = %dataset, attribute_id = attribute_id, offset = offset, limit = limit))]
    async fn get_attribute_elements(
        &self,
        dataset: &DatasetRef,
        attribute_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<AttributeElementsPage> {
        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let url = self.url(
            &format!("/api/{}/{}/attributes/{attribute_id}/elements", dataset.kind.path_segment(), dataset.id),
            &Self::paging_query(offset, limit),
        )?;
        event!(INFORMATION_LOG_LEVEL, call_id, attribute_id, offset, limit, "Starting get_attribute_elements API call");

        let (elements, _, total) = self
            .get_json::<Vec<AttributeElement>>(url, "library::get_attribute_elements")
            .await
            .info_error_fn(|| format!("get_attribute_elements failed, call_id={call_id}"))?;

        let total = total.unwrap_or(offset + elements.len());
        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            attribute_id,
            received = elements.len(),
            total,
            "Completed get_attribute_elements API call"
        );
        Ok(AttributeElementsPage { elements, total })
    }
}
