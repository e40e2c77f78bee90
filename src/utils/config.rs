//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(DsmError)` on parser failure.
///
/// Example:
/// ```ignore
/// let config = parsed_config!(config_str => MyConfig; pulse_interval_ms)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, $crate::DsmError> {
            let mut config: $config_type = Default::default();
            let config_str = match config_str {
                Some(s) if !s.trim().is_empty() => s,
                _ => return Ok(config),
            };

            let mut table = config_str.parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if let Some(key) = table.keys().next() {
                return Err($crate::DsmError(format!(
                    "invalid field name '{}' in config",
                    key,
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::DsmError;

    #[derive(Debug, PartialEq)]
    struct HeartbeatConfig {
        pulse_interval_ms: u64,
        max_missed: u8,
        label: String,
    }

    impl Default for HeartbeatConfig {
        fn default() -> Self {
            HeartbeatConfig {
                pulse_interval_ms: 2000,
                max_missed: 1,
                label: "cm".into(),
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), DsmError> {
        let config = parsed_config!(None => HeartbeatConfig;
                                    pulse_interval_ms, max_missed, label)?;
        assert_eq!(config, HeartbeatConfig::default());
        Ok(())
    }

    #[test]
    fn parse_from_blank() -> Result<(), DsmError> {
        let config =
            parsed_config!(Some("  \n") => HeartbeatConfig; pulse_interval_ms)?;
        assert_eq!(config, HeartbeatConfig::default());
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), DsmError> {
        let config_str = Some("pulse_interval_ms = 50\nlabel = 'backup'");
        let config = parsed_config!(config_str => HeartbeatConfig;
                                    pulse_interval_ms, label)?;
        assert_eq!(
            config,
            HeartbeatConfig {
                pulse_interval_ms: 50,
                max_missed: 1,
                label: "backup".into(),
            }
        );
        Ok(())
    }

    #[test]
    fn parse_wrong_type() {
        let config_str = Some("max_missed = 300");
        assert!(
            parsed_config!(config_str => HeartbeatConfig; max_missed).is_err()
        );
    }

    #[test]
    fn parse_unknown_field() {
        let config_str = Some("pulse_interval_ms = 50\nnum_pages = 3");
        assert!(
            parsed_config!(config_str => HeartbeatConfig; pulse_interval_ms)
                .is_err()
        );
    }
}
