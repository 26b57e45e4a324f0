use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Optional configuration file (`--config keepwatch.toml`).
///
/// Every field may also be given on the command line; flags win.
#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub watch: WatchConfig,
    pub action: ActionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    pub command: Option<String>,
    pub interval_secs: u64,
    pub expected_ok_code: i32,
    pub stdin_buffer_lines: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionConfig {
    pub command: Option<String>,
    pub failure_threshold: u32,
    pub backoff_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub verbosity: u8,
}

// --- Default implementations ---

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            command: None,
            interval_secs: 30,
            expected_ok_code: 0,
            stdin_buffer_lines: None,
            timeout_secs: None,
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            command: None,
            failure_threshold: 4,
            backoff_secs: 14400,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { verbosity: 1 }
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub watch_command: Option<String>,
    pub action_command: Option<String>,
    pub interval_secs: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub backoff_secs: Option<u64>,
    pub expected_ok_code: Option<i32>,
    pub stdin_buffer_lines: Option<usize>,
    pub verbosity: Option<u8>,
    pub timeout_secs: Option<u64>,
}

/// Fully resolved, validated settings. Never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub watch_command: String,
    pub action_command: String,
    pub interval_secs: u64,
    pub failure_threshold: u32,
    pub backoff_secs: u64,
    pub expected_ok_code: i32,
    pub stdin_buffer_lines: Option<usize>,
    pub verbosity: u8,
    pub command_timeout: Option<Duration>,
}

/// How input reaches the watch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Re-run the watch command fresh every interval.
    Direct,
    /// Feed the watch command the last `lines` lines of stdin.
    Buffered { lines: usize },
}

impl Settings {
    pub fn mode(&self) -> Mode {
        match self.stdin_buffer_lines {
            Some(lines) => Mode::Buffered { lines },
            None => Mode::Direct,
        }
    }

    /// Merge CLI overrides over the file config and validate the result.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let watch_command = overrides
            .watch_command
            .or(file.watch.command)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ConfigError::Missing {
                field: "watch command (-w)",
            })?;
        let action_command = overrides
            .action_command
            .or(file.action.command)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ConfigError::Missing {
                field: "action command (-a)",
            })?;

        let interval_secs = overrides.interval_secs.unwrap_or(file.watch.interval_secs);
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "interval (-i)",
                reason: "must be greater than 0".to_string(),
            });
        }

        let failure_threshold = overrides
            .failure_threshold
            .unwrap_or(file.action.failure_threshold);
        if failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "failure count (-c)",
                reason: "must be greater than 0".to_string(),
            });
        }

        let stdin_buffer_lines = overrides.stdin_buffer_lines.or(file.watch.stdin_buffer_lines);
        if stdin_buffer_lines == Some(0) {
            return Err(ConfigError::Invalid {
                field: "stdin buffer lines (-s)",
                reason: "must be greater than 0".to_string(),
            });
        }

        let timeout_secs = overrides.timeout_secs.or(file.watch.timeout_secs);
        if timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "timeout (--timeout)",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Self {
            watch_command,
            action_command,
            interval_secs,
            failure_threshold,
            backoff_secs: overrides.backoff_secs.unwrap_or(file.action.backoff_secs),
            expected_ok_code: overrides
                .expected_ok_code
                .unwrap_or(file.watch.expected_ok_code),
            stdin_buffer_lines,
            verbosity: overrides.verbosity.unwrap_or(file.log.verbosity),
            command_timeout: timeout_secs.map(Duration::from_secs),
        })
    }
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "watch command:     {}", self.watch_command)?;
        writeln!(f, "action command:    {}", self.action_command)?;
        writeln!(f, "interval:          {}s", self.interval_secs)?;
        writeln!(f, "failure threshold: {}", self.failure_threshold)?;
        writeln!(f, "back-off:          {}s", self.backoff_secs)?;
        writeln!(f, "expected OK code:  {}", self.expected_ok_code)?;
        match self.mode() {
            Mode::Direct => writeln!(f, "mode:              direct")?,
            Mode::Buffered { lines } => {
                writeln!(f, "mode:              buffered ({lines} stdin lines)")?
            }
        }
        match self.command_timeout {
            Some(t) => writeln!(f, "command timeout:   {}s", t.as_secs())?,
            None => writeln!(f, "command timeout:   none")?,
        }
        write!(f, "verbosity:         {}", self.verbosity)
    }
}

/// Load a TOML config file.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Errors from building the configuration. All are fatal at startup.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Missing {
        field: &'static str,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config file {}: {}", path.display(), source)
            }
            ConfigError::Missing { field } => write!(f, "missing required {}", field),
            ConfigError::Invalid { field, reason } => write!(f, "invalid {}: {}", field, reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Missing { .. } | ConfigError::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Overrides {
        Overrides {
            watch_command: Some("true".to_string()),
            action_command: Some("echo fire".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let s = Settings::resolve(FileConfig::default(), required()).unwrap();
        assert_eq!(s.interval_secs, 30);
        assert_eq!(s.failure_threshold, 4);
        assert_eq!(s.backoff_secs, 14400);
        assert_eq!(s.expected_ok_code, 0);
        assert_eq!(s.stdin_buffer_lines, None);
        assert_eq!(s.verbosity, 1);
        assert_eq!(s.command_timeout, None);
        assert_eq!(s.mode(), Mode::Direct);
    }

    #[test]
    fn test_missing_watch_command() {
        let err = Settings::resolve(
            FileConfig::default(),
            Overrides {
                watch_command: None,
                ..required()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
        assert!(err.to_string().contains("-w"));
    }

    #[test]
    fn test_blank_action_command_is_missing() {
        let err = Settings::resolve(
            FileConfig::default(),
            Overrides {
                action_command: Some("   ".to_string()),
                ..required()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("-a"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = Settings::resolve(
            FileConfig::default(),
            Overrides {
                interval_secs: Some(0),
                ..required()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("-i"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = Settings::resolve(
            FileConfig::default(),
            Overrides {
                failure_threshold: Some(0),
                ..required()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("-c"));
    }

    #[test]
    fn test_zero_buffer_lines_rejected() {
        let err = Settings::resolve(
            FileConfig::default(),
            Overrides {
                stdin_buffer_lines: Some(0),
                ..required()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("-s"));
    }

    #[test]
    fn test_zero_backoff_allowed() {
        let s = Settings::resolve(
            FileConfig::default(),
            Overrides {
                backoff_secs: Some(0),
                ..required()
            },
        )
        .unwrap();
        assert_eq!(s.backoff_secs, 0);
    }

    #[test]
    fn test_buffer_lines_selects_buffered_mode() {
        let s = Settings::resolve(
            FileConfig::default(),
            Overrides {
                stdin_buffer_lines: Some(50),
                ..required()
            },
        )
        .unwrap();
        assert_eq!(s.mode(), Mode::Buffered { lines: 50 });
    }

    #[test]
    fn test_file_values_used_and_cli_wins() {
        let file: FileConfig = toml::from_str(
            r#"
            [watch]
            command = "curl -f http://localhost/health"
            interval_secs = 10
            expected_ok_code = 1
            timeout_secs = 5

            [action]
            command = "systemctl restart app"
            failure_threshold = 2
            backoff_secs = 60

            [log]
            verbosity = 10
            "#,
        )
        .unwrap();

        let s = Settings::resolve(
            file,
            Overrides {
                interval_secs: Some(15),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(s.watch_command, "curl -f http://localhost/health");
        assert_eq!(s.action_command, "systemctl restart app");
        assert_eq!(s.interval_secs, 15);
        assert_eq!(s.failure_threshold, 2);
        assert_eq!(s.backoff_secs, 60);
        assert_eq!(s.expected_ok_code, 1);
        assert_eq!(s.verbosity, 10);
        assert_eq!(s.command_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file: FileConfig = toml::from_str("[action]\nbackoff_secs = 0\n").unwrap();
        assert_eq!(file.action.backoff_secs, 0);
        assert_eq!(file.action.failure_threshold, 4);
        assert_eq!(file.watch.interval_secs, 30);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[watch]\nintervall_secs = 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_file_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[watch\ncommand = ").unwrap();
        let err = load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_load_file_roundtrip_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keepwatch.toml");
        std::fs::write(
            &path,
            "[watch]\ncommand = \"grep -q ERROR\"\nstdin_buffer_lines = 3\n[action]\ncommand = \"true\"\n",
        )
        .unwrap();
        let s = Settings::resolve(load_file(&path).unwrap(), Overrides::default()).unwrap();
        assert_eq!(s.mode(), Mode::Buffered { lines: 3 });
    }

    #[test]
    fn test_display_lists_settings() {
        let s = Settings::resolve(FileConfig::default(), required()).unwrap();
        let text = s.to_string();
        assert!(text.contains("watch command:     true"));
        assert!(text.contains("mode:              direct"));
        assert!(text.contains("command timeout:   none"));
    }
}
