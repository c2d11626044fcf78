use crate::groups;

/// Primary configuration struct containing all config sections
#[derive(Debug, Clone, Default)]
pub struct CubeConfig {
    pub client: groups::client::ConfigValueGroup,
    pub fetch: groups::fetch::ConfigValueGroup,
}

impl CubeConfig {
    /// Default values with environment variable overrides applied.
    /// This is equivalent to `CubeConfig::default().with_env_overrides()`.
    pub fn new() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides to all configuration sections.
    /// Environment variables follow the pattern: CUBE_{GROUP_NAME}_{FIELD_NAME}
    pub fn with_env_overrides(mut self) -> Self {
        self.client.apply_env_overrides();
        self.fetch.apply_env_overrides();
        self
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: CubeConfig = CubeConfig::new();
}

/// The process-wide configuration, read from the environment on first access.
pub fn cube_config() -> &'static CubeConfig {
    &GLOBAL_CONFIG
}
