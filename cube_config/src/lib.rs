mod aliases;
pub use aliases::{ENVIRONMENT_NAME_ALIASES, lookup_env};

pub mod macros;
mod cube_config;

pub mod groups;

// Used by the config_group macro
pub use utils::configuration_utils::ParsableConfigValue;
#[doc(hidden)]
pub mod __private {
    pub use {const_str, konst};
}
pub use self::cube_config::{CubeConfig, cube_config};

pub type FetchConfig = groups::fetch::ConfigValueGroup;
pub type ClientConfig = groups::client::ConfigValueGroup;
