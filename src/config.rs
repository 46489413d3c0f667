//! Agent configuration: General settings, event monitors and actions
//!
//! Loaded from a YAML file; any validation failure is fatal at startup.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{Result, WardenError};

/// Top-level agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(rename = "General")]
    pub general: GeneralConfig,
    #[serde(rename = "EventMonitors")]
    pub event_monitors: Vec<MonitorConfig>,
    #[serde(rename = "Actions")]
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(rename = "VMIdentifier")]
    pub vm_identifier: String,
    #[serde(rename = "APIKey")]
    pub api_key: String,
    #[serde(rename = "ManagerBaseURL")]
    pub manager_base_url: String,
    #[serde(rename = "ScriptsPath")]
    pub scripts_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MonitorType {
    LogFileTail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Type")]
    pub monitor_type: MonitorType,
    #[serde(rename = "LogFilePath")]
    pub log_file_path: PathBuf,
    #[serde(rename = "CheckIntervalSeconds", default = "default_check_interval")]
    pub check_interval_seconds: f64,
    #[serde(rename = "EventTriggers")]
    pub event_triggers: Vec<TriggerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    #[serde(rename = "EventName")]
    pub event_name: String,
    #[serde(rename = "Regex")]
    pub regex: String,
    #[serde(rename = "Action")]
    pub action: String,
}

/// A remediation action: an external script plus how to bind its parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "Name")]
    pub name: String,
    /// Relative path under `ScriptsPath`
    #[serde(rename = "Script")]
    pub script: String,
    /// Optional control-plane URL template with `{placeholders}`
    #[serde(rename = "APIDataEndpoint", default)]
    pub api_data_endpoint: Option<String>,
    /// Script parameter name to source key
    #[serde(rename = "ParameterMapping")]
    pub parameter_mapping: BTreeMap<String, String>,
}

fn default_check_interval() -> f64 {
    1.0
}

impl AgentConfig {
    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            WardenError::InvalidConfig(format!(
                "cannot read configuration file {}: {err}",
                path.display()
            ))
        })?;
        let config: AgentConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: AgentConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.general.vm_identifier.trim().is_empty() {
            return Err(WardenError::InvalidConfig("VMIdentifier is empty".into()));
        }
        if self.general.api_key.trim().is_empty() {
            return Err(WardenError::InvalidConfig("APIKey is empty".into()));
        }

        let base = Url::parse(&self.general.manager_base_url).map_err(|err| {
            WardenError::InvalidConfig(format!("ManagerBaseURL is not a valid URL: {err}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(WardenError::InvalidConfig(format!(
                "ManagerBaseURL must be http(s), got {}",
                base.scheme()
            )));
        }

        if !self.general.scripts_path.exists() {
            warn!(
                path = %self.general.scripts_path.display(),
                "Scripts directory does not exist, creating it"
            );
            std::fs::create_dir_all(&self.general.scripts_path).map_err(|err| {
                WardenError::InvalidConfig(format!(
                    "cannot create scripts directory {}: {err}",
                    self.general.scripts_path.display()
                ))
            })?;
        }

        let mut action_names = HashSet::new();
        for action in &self.actions {
            if action.name.trim().is_empty() {
                return Err(WardenError::InvalidConfig("action with empty name".into()));
            }
            if !action_names.insert(action.name.as_str()) {
                return Err(WardenError::InvalidConfig(format!(
                    "duplicate action name: {}",
                    action.name
                )));
            }
        }

        let mut monitor_names = HashSet::new();
        for monitor in &self.event_monitors {
            if !monitor_names.insert(monitor.name.as_str()) {
                return Err(WardenError::InvalidConfig(format!(
                    "duplicate monitor name: {}",
                    monitor.name
                )));
            }
            if monitor.check_interval_seconds < 0.0 {
                return Err(WardenError::InvalidConfig(format!(
                    "monitor {} has a negative CheckIntervalSeconds",
                    monitor.name
                )));
            }
            for trigger in &monitor.event_triggers {
                regex::Regex::new(&trigger.regex).map_err(|err| {
                    WardenError::InvalidConfig(format!(
                        "trigger {} in monitor {} has an invalid regex: {err}",
                        trigger.event_name, monitor.name
                    ))
                })?;
                if !action_names.contains(trigger.action.as_str()) {
                    return Err(WardenError::InvalidConfig(format!(
                        "trigger {} in monitor {} references undeclared action {}",
                        trigger.event_name, monitor.name, trigger.action
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml(scripts_path: &Path) -> String {
        format!(
            r#"
General:
  VMIdentifier: vm-01
  APIKey: secret-key
  ManagerBaseURL: https://manager.example.com
  ScriptsPath: {scripts}
EventMonitors:
  - Name: AccountLoginMonitor
    Type: LogFileTail
    LogFilePath: /var/log/app.log
    EventTriggers:
      - EventName: UserLoggedIn
        Regex: 'User logged in: (?P<account_id>\w+)'
        Action: UpdateProxyForAccount
Actions:
  - Name: UpdateProxyForAccount
    Script: Set-Proxy.ps1
    APIDataEndpoint: '/account-config?vm_id={{VMIdentifier}}&account_id={{account_id}}'
    ParameterMapping:
      ProxyServer: proxy_server
"#,
            scripts = scripts_path.display()
        )
    }

    #[test]
    fn test_valid_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::from_yaml(&sample_yaml(dir.path())).unwrap();

        assert_eq!(config.general.vm_identifier, "vm-01");
        assert_eq!(config.event_monitors.len(), 1);
        let monitor = &config.event_monitors[0];
        assert_eq!(monitor.monitor_type, MonitorType::LogFileTail);
        // Interval falls back to the 1 second default
        assert_eq!(monitor.check_interval_seconds, 1.0);
        assert_eq!(config.actions[0].parameter_mapping["ProxyServer"], "proxy_server");
    }

    #[test]
    fn test_undeclared_action_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = sample_yaml(dir.path()).replace(
            "Action: UpdateProxyForAccount",
            "Action: MissingAction",
        );
        let err = AgentConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("undeclared action"));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = sample_yaml(dir.path()).replace(
            r"'User logged in: (?P<account_id>\w+)'",
            r"'User logged in: ('",
        );
        let err = AgentConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn test_relative_base_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = sample_yaml(dir.path())
            .replace("https://manager.example.com", "manager.example.com");
        let err = AgentConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("ManagerBaseURL"));
    }

    #[test]
    fn test_scripts_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scripts").join("sub");
        AgentConfig::from_yaml(&sample_yaml(&nested)).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_missing_section_rejected() {
        let err = AgentConfig::from_yaml("General:\n  VMIdentifier: vm\n").unwrap_err();
        assert!(matches!(err, WardenError::ConfigFile(_)));
    }
}
