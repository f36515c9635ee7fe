//! Launch-time configuration.
//!
//! Values are layered, lowest priority first:
//! 1. serde defaults on the config structs
//! 2. top-level keys of `app-config.toml`
//! 3. the table named after the command, e.g. `[sim]`
//! 4. environment variables bound to a key
//! 5. `key=value` command line arguments
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use follow_common::FollowPolicy;
use serde::{de::DeserializeOwned, Deserialize};
pub use toml::{Table, Value};

use crate::{
    apps::sim::SimScenario,
    control::{ControlSettings, ARMING_DELAY, MAX_TAKEOFF_HEIGHT, TAKEOFF_HEIGHT, UPDATE_PERIOD},
    logging::SerdeLevel,
};

pub const CONFIG_PATH: &str = "app-config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid command line argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Failed to deserialize config for {command}: {source}")]
    Deserialize {
        command: &'static str,
        source: toml::de::Error,
    },
}

/// How the arguments of one command map onto config keys.
pub struct CommandSpec {
    pub name: &'static str,
    /// `(variable, key)` pairs read from the environment.
    pub env: &'static [(&'static str, &'static str)],
    /// The key a bare argument (one without `=`) is assigned to.
    pub positional: Option<&'static str>,
}

/// Settings shared by every command that flies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    #[serde(flatten)]
    pub policy: FollowPolicy,
    pub update_rate_ms: u64,
    pub takeoff_height: f32,
    pub arming_delay_ms: u64,
    pub log_level: SerdeLevel,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            policy: FollowPolicy::default(),
            update_rate_ms: UPDATE_PERIOD.as_millis() as u64,
            takeoff_height: TAKEOFF_HEIGHT,
            arming_delay_ms: ARMING_DELAY.as_millis() as u64,
            log_level: SerdeLevel::default(),
        }
    }
}

impl ControlConfig {
    /// Checks the values the policy does not cover and builds the loop settings.
    pub fn settings(&self) -> Result<ControlSettings, ConfigError> {
        if !(self.takeoff_height > 0.0 && self.takeoff_height <= MAX_TAKEOFF_HEIGHT) {
            return Err(ConfigError::InvalidValue {
                key: "takeoff_height",
                value: self.takeoff_height.to_string(),
            });
        }
        Ok(ControlSettings {
            policy: self.policy,
            update_period: Duration::from_millis(self.update_rate_ms.max(1)),
            takeoff_height: self.takeoff_height,
            arming_delay: Duration::from_millis(self.arming_delay_ms),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    #[serde(flatten)]
    pub control: ControlConfig,
    pub scenario: SimScenario,
    /// Simulated seconds before the run interrupts itself. Runs until Ctrl-C if absent.
    pub time_limit: Option<f32>,
}

impl SimConfig {
    pub fn time_limit(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(limit) = self.time_limit else {
            return Ok(None);
        };
        if limit < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "time_limit",
                value: limit.to_string(),
            });
        }
        Duration::try_from_secs_f32(limit)
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: "time_limit",
                value: limit.to_string(),
            })
    }
}

pub const SIM_COMMAND: CommandSpec = CommandSpec {
    name: "sim",
    env: &[],
    positional: None,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlyConfig {
    #[serde(flatten)]
    pub control: ControlConfig,
    pub uri: String,
    /// Played after landing. Nothing is played if absent.
    pub finish_sound: Option<PathBuf>,
}

impl Default for FlyConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            uri: "radio://0/80/2M/E7E7E7E7AA".into(),
            finish_sound: Some("fin.mp3".into()),
        }
    }
}

pub const FLY_COMMAND: CommandSpec = CommandSpec {
    name: "fly",
    env: &[("CFLIB_URI", "uri")],
    positional: Some("uri"),
};

/// Integers first, then floats, then booleans, otherwise a string.
pub fn inline_parse(string: String) -> Value {
    if let Ok(n) = string.parse() {
        return Value::Integer(n);
    }
    if let Ok(n) = string.parse() {
        return Value::Float(n);
    }
    if let Ok(b) = string.parse() {
        return Value::Boolean(b);
    }
    Value::String(string)
}

/// Flattens the config file, environment and arguments into the table for one command.
pub fn merge(
    config_file: Table,
    command: &CommandSpec,
    env: impl Fn(&str) -> Option<String>,
    args: &[String],
) -> Result<Table, ConfigError> {
    let mut cmd_config = None;
    let mut common_values = vec![];
    for (k, v) in config_file {
        if let Value::Table(v) = v {
            if k == command.name {
                cmd_config = Some(v);
            }
        } else {
            common_values.push((k, v));
        }
    }
    let mut cmd_config = cmd_config.unwrap_or_default();
    for (k, v) in common_values {
        if !cmd_config.contains_key(&k) {
            cmd_config.insert(k, v);
        }
    }

    for &(var_name, key) in command.env {
        if let Some(val_str) = env(var_name) {
            tracing::debug!("Environment variable {var_name:?} was accessed");
            cmd_config.insert(key.to_string(), inline_parse(val_str));
        }
    }

    for arg in args {
        match arg.split_once('=') {
            Some((param_name, param_val)) if !param_name.is_empty() => {
                cmd_config.insert(param_name.to_string(), inline_parse(param_val.into()));
            }
            Some(_) => return Err(ConfigError::InvalidArgument(arg.clone())),
            None => {
                let Some(key) = command.positional else {
                    return Err(ConfigError::InvalidArgument(arg.clone()));
                };
                // Positional values are never reinterpreted as numbers
                cmd_config.insert(key.to_string(), Value::String(arg.clone()));
            }
        }
    }

    Ok(cmd_config)
}

/// Reads `path` (if it exists) and builds the config of `command`.
pub fn load<C: DeserializeOwned>(
    path: &Path,
    command: &CommandSpec,
    args: &[String],
) -> Result<C, ConfigError> {
    let config_file = if path.exists() {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str::<Table>(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        tracing::debug!("{path:?} not found, using defaults");
        Table::new()
    };
    let table = merge(config_file, command, |k| std::env::var(k).ok(), args)?;
    Value::Table(table)
        .try_into()
        .map_err(|source| ConfigError::Deserialize {
            command: command.name,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_inline() {
        assert_eq!(inline_parse("12".into()), Value::Integer(12));
        assert_eq!(inline_parse("0.5".into()), Value::Float(0.5));
        assert_eq!(inline_parse("true".into()), Value::Boolean(true));
        assert_eq!(inline_parse("fin.mp3".into()), Value::String("fin.mp3".into()));
    }

    #[test]
    fn command_table_wins_over_top_level() {
        let file: Table = toml::from_str(
            r#"
            velocity = 0.2
            min_distance = 0.25

            [fly]
            velocity = 0.4

            [sim]
            velocity = 0.1
            "#,
        )
        .unwrap();
        let table = merge(file, &FLY_COMMAND, no_env, &[]).unwrap();
        assert_eq!(table.get("velocity"), Some(&Value::Float(0.4)));
        assert_eq!(table.get("min_distance"), Some(&Value::Float(0.25)));
    }

    #[test]
    fn env_then_args() {
        let file: Table = toml::from_str(r#"uri = "radio://0/10/2M/E7E7E7E701""#).unwrap();
        let env = |k: &str| (k == "CFLIB_URI").then(|| "radio://0/20/2M/E7E7E7E702".to_string());

        let table = merge(file.clone(), &FLY_COMMAND, env, &[]).unwrap();
        assert_eq!(
            table.get("uri"),
            Some(&Value::String("radio://0/20/2M/E7E7E7E702".into()))
        );

        let table = merge(file, &FLY_COMMAND, env, &args(&["radio://0/30/2M/E7E7E7E703"])).unwrap();
        assert_eq!(
            table.get("uri"),
            Some(&Value::String("radio://0/30/2M/E7E7E7E703".into()))
        );
    }

    #[test]
    fn bare_argument_without_positional_is_rejected() {
        let result = merge(Table::new(), &SIM_COMMAND, no_env, &args(&["oops"]));
        assert!(matches!(result, Err(ConfigError::InvalidArgument(a)) if a == "oops"));
        let result = merge(Table::new(), &SIM_COMMAND, no_env, &args(&["=1"]));
        assert!(matches!(result, Err(ConfigError::InvalidArgument(_))));
    }

    #[test]
    fn deserialize_fly_config() {
        let file: Table = toml::from_str(
            r#"
            max_distance = 2
            update_rate_ms = 50
            log_level = "DEBUG"

            [fly]
            finish_sound = "done.wav"
            "#,
        )
        .unwrap();
        let table = merge(file, &FLY_COMMAND, no_env, &args(&["velocity=0.5"])).unwrap();
        let config: FlyConfig = Value::Table(table).try_into().unwrap();

        assert_eq!(config.uri, "radio://0/80/2M/E7E7E7E7AA");
        assert_eq!(config.finish_sound, Some(PathBuf::from("done.wav")));
        assert_eq!(config.control.policy.max_distance, 2.0);
        assert_eq!(config.control.policy.velocity, 0.5);
        assert_eq!(config.control.policy.min_distance, 0.3);
        assert_eq!(config.control.log_level, SerdeLevel::DEBUG);
        assert_eq!(
            config.control.settings().unwrap().update_period,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn deserialize_sim_scenario() {
        let file: Table = toml::from_str(
            r#"
            [sim]
            time_limit = 12.5

            [sim.scenario]
            room = [4.0, 2.0]

            [[sim.scenario.obstacles]]
            center = [1.5, 0.0]
            radius = 0.2
            velocity = [0.1, 0.0]
            "#,
        )
        .unwrap();
        let table = merge(file, &SIM_COMMAND, no_env, &[]).unwrap();
        let config: SimConfig = Value::Table(table).try_into().unwrap();

        assert_eq!(config.time_limit, Some(12.5));
        assert_eq!(config.scenario.room, [4.0, 2.0]);
        assert_eq!(config.scenario.obstacles.len(), 1);
        assert_eq!(config.scenario.obstacles[0].velocity, [0.1, 0.0]);
        assert_eq!(config.control.takeoff_height, TAKEOFF_HEIGHT);
    }

    #[test]
    fn rejects_unreachable_takeoff_height() {
        for bad in ["nan", "inf", "1e30", "0", "-0.5"] {
            let arg = format!("takeoff_height={bad}");
            let table = merge(Table::new(), &SIM_COMMAND, no_env, &args(&[&arg])).unwrap();
            let config: SimConfig = Value::Table(table).try_into().unwrap();
            assert!(
                matches!(
                    config.control.settings(),
                    Err(ConfigError::InvalidValue {
                        key: "takeoff_height",
                        ..
                    })
                ),
                "takeoff_height = {bad}"
            );
        }
    }

    #[test]
    fn rejects_unbounded_time_limit() {
        for bad in ["inf", "nan", "-1"] {
            let arg = format!("time_limit={bad}");
            let table = merge(Table::new(), &SIM_COMMAND, no_env, &args(&[&arg])).unwrap();
            let config: SimConfig = Value::Table(table).try_into().unwrap();
            assert!(
                matches!(
                    config.time_limit(),
                    Err(ConfigError::InvalidValue {
                        key: "time_limit",
                        ..
                    })
                ),
                "time_limit = {bad}"
            );
        }

        let table = merge(Table::new(), &SIM_COMMAND, no_env, &args(&["time_limit=3"])).unwrap();
        let config: SimConfig = Value::Table(table).try_into().unwrap();
        assert_eq!(config.time_limit().unwrap(), Some(Duration::from_secs(3)));
        assert!(SimConfig::default().time_limit().unwrap().is_none());
    }
}
