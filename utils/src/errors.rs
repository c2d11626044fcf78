use std::fmt::Display;

use tracing::{error, info, warn};

/// Logs the error on a `Result` and passes the `Result` through unchanged.
pub trait ErrorPrinter {
    fn log_error<M: Display>(self, message: M) -> Self;

    fn warn_error<M: Display>(self, message: M) -> Self;

    fn info_error<M: Display>(self, message: M) -> Self;

    /// Like `info_error`, with the message built only when there is an error to report.
    fn info_error_fn<M: Display, F: FnOnce() -> M>(self, message_fn: F) -> Self;
}

impl<T, E: Display> ErrorPrinter for Result<T, E> {
    fn log_error<M: Display>(self, message: M) -> Self {
        if let Err(e) = &self {
            error!("{message}: {e}");
        }
        self
    }

    fn warn_error<M: Display>(self, message: M) -> Self {
        if let Err(e) = &self {
            warn!("{message}: {e}");
        }
        self
    }

    fn info_error<M: Display>(self, message: M) -> Self {
        if let Err(e) = &self {
            info!("{message}: {e}");
        }
        self
    }

    fn info_error_fn<M: Display, F: FnOnce() -> M>(self, message_fn: F) -> Self {
        if let Err(e) = &self {
            info!("{}: {e}", message_fn());
        }
        self
    }
}
