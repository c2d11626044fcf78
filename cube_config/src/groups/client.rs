use std::time::Duration;

crate::config_group!({

    /// Base URL of the library REST server.
    ///
    /// Use the environment variable `CUBE_CLIENT_ENDPOINT` to set this value.
    ref endpoint: String = "http://localhost:8080/MicroStrategyLibrary".to_string();

    /// Project the datasets belong to, sent as the `X-MSTR-ProjectID` header when non-empty.
    ///
    /// Use the environment variable `CUBE_CLIENT_PROJECT_ID` to set this value.
    ref project_id: String = String::new();

    /// Timeout applied to each HTTP request.
    ///
    /// The default value is 120 seconds.
    ///
    /// Use the environment variable `CUBE_CLIENT_REQUEST_TIMEOUT` to set this value.
    ref request_timeout: Duration = Duration::from_secs(120);

    /// User agent sent with every request.
    ///
    /// Use the environment variable `CUBE_CLIENT_USER_AGENT` to set this value.
    ref user_agent: String = "cube-reconstruction".to_string();

    /// Retries on transient transport failures (connection errors, 429, 5xx). Instance pages are
    /// not retried by default; a failed page fails the whole fetch.
    ///
    /// The default value is 0.
    ///
    /// Use the environment variable `CUBE_CLIENT_RETRY_MAX_ATTEMPTS` to set this value.
    ref retry_max_attempts: usize = 0;

    /// Base delay of the exponential backoff between retries.
    ///
    /// The default value is 500ms.
    ///
    /// Use the environment variable `CUBE_CLIENT_RETRY_BASE_DELAY` to set this value.
    ref retry_base_delay: Duration = Duration::from_millis(500);
});
