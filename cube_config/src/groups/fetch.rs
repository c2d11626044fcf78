use utils::ByteSize;

crate::config_group!({

    /// Number of rows requested with the instance creation call. The size of this first page
    /// is the sample used to estimate the chunk size of every later page.
    ///
    /// The default value is 1000.
    ///
    /// Use the environment variable `CUBE_FETCH_INITIAL_LIMIT` to set this value.
    ref initial_limit: usize = 1000;

    /// Target serialized size of one page.
    ///
    /// The default value is 10mb (10,000,000 bytes).
    ///
    /// Use the environment variable `CUBE_FETCH_TARGET_CHUNK_BYTES` to set this value.
    ref target_chunk_bytes: ByteSize = ByteSize::new(10_000_000);

    /// Lower bound on the estimated chunk size in rows. There is no upper bound.
    ///
    /// The default value is 1000.
    ///
    /// Use the environment variable `CUBE_FETCH_MIN_CHUNK_ROWS` to set this value.
    ref min_chunk_rows: usize = 1000;

    /// Upper bound on concurrent page fetches for a single table.
    ///
    /// The default value is 8.
    ///
    /// Use the environment variable `CUBE_FETCH_MAX_CONCURRENT_PAGE_FETCHES` to set this value.
    ref max_concurrent_page_fetches: usize = 8;

    /// Workers allowed above the host's available parallelism, as page fetches are I/O bound.
    ///
    /// The default value is 4.
    ///
    /// Use the environment variable `CUBE_FETCH_EXTRA_WORKERS_OVER_CPUS` to set this value.
    ref extra_workers_over_cpus: usize = 4;

    /// Whether remaining pages, and attribute elements, may be fetched concurrently.
    ///
    /// The default value is true.
    ///
    /// Use the environment variable `CUBE_FETCH_PARALLEL` to set this value.
    ref parallel: bool = true;

    /// Page size used when loading attribute elements.
    ///
    /// The default value is 50000.
    ///
    /// Use the environment variable `CUBE_FETCH_ELEMENT_FETCH_LIMIT` to set this value.
    ref element_fetch_limit: usize = 50000;

    /// Smallest page size the element loader falls back to after server-side timeouts.
    ///
    /// The default value is 50.
    ///
    /// Use the environment variable `CUBE_FETCH_ELEMENT_FETCH_MIN_LIMIT` to set this value.
    ref element_fetch_min_limit: usize = 50;
});
