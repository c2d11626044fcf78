#![cfg_attr(feature = "strict", deny(warnings))]

pub use interface::Client;
pub use local_client::{LocalClient, LocalDataset, LocalRequest, LocalRow};
pub use remote_client::RemoteClient;
use tracing::Level;

pub use crate::error::{CubeClientError, Result};

mod error;
pub mod http_client;
mod interface;
mod local_client;
pub mod remote_client;
pub mod retry_wrapper;

#[cfg(not(feature = "elevated_information_level"))]
pub const INFORMATION_LOG_LEVEL: Level = Level::DEBUG;

#[cfg(feature = "elevated_information_level")]
pub const INFORMATION_LOG_LEVEL: Level = Level::INFO;
