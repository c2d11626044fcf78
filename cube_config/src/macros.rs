/// Declares the `ConfigValueGroup` of a configuration module.
///
/// Each field reads the environment variable `CUBE_{MODULE}_{FIELD}`, where `MODULE` is the last
/// segment of the enclosing module path:
///
/// ```rust
/// mod fetch {
///     cube_config::config_group!({
///         ref page_rows: usize = 42;
///     });
/// }
/// // `CUBE_FETCH_PAGE_ROWS` overrides `page_rows`.
/// assert_eq!(fetch::ConfigValueGroup::default().page_rows, 42);
/// ```
#[macro_export]
macro_rules! config_group {
    ({
        $(
            $(#[$meta:meta])*
            ref $name:ident : $type:ty = $value:expr;
        )+
    }) => {
        #[derive(Debug, Clone)]
        pub struct ConfigValueGroup {
            $(
                $(#[$meta])*
                pub $name: $type,
            )+
        }

        impl Default for ConfigValueGroup {
            fn default() -> Self {
                Self { $($name: $value,)+ }
            }
        }

        impl AsRef<ConfigValueGroup> for ConfigValueGroup {
            fn as_ref(&self) -> &ConfigValueGroup {
                self
            }
        }

        impl ConfigValueGroup {
            /// Replaces every field whose environment variable (or an alias of it) is set and parses.
            pub fn apply_env_overrides(&mut self) {
                $(
                    {
                        const ENV_VAR_NAME: &str = $crate::__private::const_str::concat!(
                            "CUBE_",
                            $crate::__private::const_str::convert_ascii_case!(upper, $crate::__private::konst::string::rsplit_once(module_path!(), "::").unwrap().1),
                            "_",
                            $crate::__private::const_str::convert_ascii_case!(upper, stringify!($name))
                        );
                        let current: $type = self.$name.clone();
                        self.$name = <$type as $crate::ParsableConfigValue>::parse(
                            ENV_VAR_NAME,
                            $crate::lookup_env(ENV_VAR_NAME),
                            current,
                        );
                    }
                )+
            }
        }
    };
}
