use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cube_types::{ISERVER_REQUEST_TIMEOUT_CODE, ServerErrorBody};
use reqwest::{Response, StatusCode};
use reqwest_retry::{Retryable, default_on_request_failure, default_on_request_success};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{error, info};

use crate::error::CubeClientError;

#[derive(Debug)]
pub enum RetryableReqwestError {
    FatalError(CubeClientError),
    RetryableError(CubeClientError),
}

impl RetryableReqwestError {
    pub fn into_inner(self) -> CubeClientError {
        match self {
            RetryableReqwestError::FatalError(e) | RetryableReqwestError::RetryableError(e) => e,
        }
    }
}

/// Converts an unsuccessful response into the matching client error.
///
/// Server-side timeouts are recognized from the `iServerCode` of the error body, whatever the status.
pub fn error_from_response(status: StatusCode, body: &str) -> CubeClientError {
    let parsed: ServerErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.clone().unwrap_or_else(|| body.to_owned());

    if parsed.i_server_code == Some(ISERVER_REQUEST_TIMEOUT_CODE) {
        return CubeClientError::RequestTimeout(message);
    }

    if status == StatusCode::NOT_FOUND {
        return CubeClientError::NotFound(message);
    }

    CubeClientError::HttpStatus { status, message }
}

pub struct RetryWrapper {
    max_attempts: usize,
    base_delay: Duration,
    api_tag: &'static str,
}

impl RetryWrapper {
    pub fn new(api_tag: &'static str) -> Self {
        Self {
            max_attempts: cube_config::cube_config().client.retry_max_attempts,
            base_delay: cube_config::cube_config().client.retry_base_delay,
            api_tag,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn process_error_response(&self, try_idx: usize, err: reqwest_middleware::Error) -> RetryableReqwestError {
        let api = self.api_tag;

        match default_on_request_failure(&err) {
            Some(Retryable::Transient) => {
                info!(api, try_idx, "Retryable client error: {err}");
                RetryableReqwestError::RetryableError(CubeClientError::from(err))
            },
            Some(Retryable::Fatal) | None => {
                error!(api, try_idx, "Fatal client error: {err}");
                RetryableReqwestError::FatalError(CubeClientError::from(err))
            },
        }
    }

    async fn check_response(&self, try_idx: usize, resp: Response) -> Result<Response, RetryableReqwestError> {
        let api = self.api_tag;
        let status = resp.status();

        if status.is_success() {
            info!(api, try_idx, "Request succeeded");
            return Ok(resp);
        }

        let retriability = default_on_request_success(&resp);
        let body = resp.text().await.unwrap_or_default();
        let err = error_from_response(status, &body);

        match (&err, retriability) {
            // A server-side timeout is handled by the caller with a smaller request.
            (CubeClientError::RequestTimeout(_), _) => {
                info!(api, try_idx, %status, "Server-side request timeout: {err}");
                Err(RetryableReqwestError::FatalError(err))
            },
            (_, Some(Retryable::Transient)) => {
                info!(api, try_idx, %status, "Retryable error: {err}");
                Err(RetryableReqwestError::RetryableError(err))
            },
            _ => {
                info!(api, try_idx, %status, "Fatal error: {err}");
                Err(RetryableReqwestError::FatalError(err))
            },
        }
    }

    /// Run a request and process its result, retrying on transient errors or when `process_fn`
    /// returns a retryable error.
    ///
    /// `make_request` returns a future resolving to the middleware's response, e.g.
    /// `move || client.get(url.clone()).send()`. `process_fn` receives responses with a success
    /// status only.
    pub async fn run_and_process<T, ReqFut, ReqFn, ProcFut, ProcFn>(
        self,
        make_request: ReqFn,
        process_fn: ProcFn,
    ) -> Result<T, CubeClientError>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = Result<Response, reqwest_middleware::Error>> + Send + 'static,
        ProcFn: Fn(Response) -> ProcFut + Send + Sync + 'static,
        ProcFut: Future<Output = Result<T, RetryableReqwestError>> + Send + 'static,
        T: Send + 'static,
    {
        let strategy = ExponentialBackoff::from_millis(self.base_delay.as_millis().min(u64::MAX as u128) as u64)
            .map(jitter)
            .take(self.max_attempts);

        let api_tag = self.api_tag;
        let self_ = Arc::new(self);
        let try_count = Arc::new(AtomicUsize::new(0));
        let retry_info = Arc::new((make_request, process_fn));

        let result = RetryIf::spawn(
            strategy,
            move || {
                let self_ = self_.clone();
                let try_count = try_count.clone();
                let retry_info = retry_info.clone();

                async move {
                    let (make_request, process_fn) = retry_info.as_ref();
                    let try_idx = try_count.fetch_add(1, Ordering::Relaxed);

                    let resp = match make_request().await {
                        Ok(resp) => resp,
                        Err(e) => return Err(self_.process_error_response(try_idx, e)),
                    };

                    let resp = self_.check_response(try_idx, resp).await?;
                    process_fn(resp).await
                }
            },
            |err: &RetryableReqwestError| matches!(err, RetryableReqwestError::RetryableError(_)),
        )
        .await;

        result.map_err(|e| {
            if matches!(e, RetryableReqwestError::RetryableError(_)) {
                info!(api = api_tag, "No more retries; aborting");
            }
            e.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_response_timeout_code() {
        let body = r#"{"code":"ERR001","message":"took too long","iServerCode":-2147206497}"#;
        let err = error_from_response(StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(err.is_request_timeout());
    }

    #[test]
    fn test_error_from_response_not_found_and_other() {
        let err = error_from_response(StatusCode::NOT_FOUND, r#"{"message":"gone"}"#);
        assert!(matches!(err, CubeClientError::NotFound(m) if m == "gone"));

        let err = error_from_response(StatusCode::BAD_REQUEST, "plain text");
        assert!(
            matches!(err, CubeClientError::HttpStatus { status, message } if status == StatusCode::BAD_REQUEST && message == "plain text")
        );
    }
}
