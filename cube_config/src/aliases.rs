/// Alternate environment variable names accepted for a configuration value, as
/// `(primary_name, alias_name)` pairs. The primary name wins when both are set.
pub const ENVIRONMENT_NAME_ALIASES: &[(&str, &str)] = &[
    ("CUBE_CLIENT_ENDPOINT", "CUBE_ENDPOINT"),
    ("CUBE_FETCH_PARALLEL", "CUBE_PARALLEL"),
    ("CUBE_FETCH_MAX_CONCURRENT_PAGE_FETCHES", "CUBE_MAX_WORKERS"),
];

/// Value of the environment variable `name`, or of the first of its aliases that is set.
pub fn lookup_env(name: &str) -> Option<String> {
    std::env::var(name).ok().or_else(|| {
        ENVIRONMENT_NAME_ALIASES
            .iter()
            .filter(|(primary, _)| *primary == name)
            .find_map(|(_, alias)| std::env::var(alias).ok())
    })
}
