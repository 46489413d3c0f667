//! Resolves matched events to actions and runs their scripts

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use super::api_client::ControlPlaneClient;
use super::monitor::MatchedEvent;
use super::script::ScriptRunner;
use crate::config::ActionConfig;

/// Binds event captures (optionally enriched by the control plane) to
/// script parameters and dispatches the script.
pub struct ActionDispatcher {
    actions: HashMap<String, ActionConfig>,
    api: ControlPlaneClient,
    runner: ScriptRunner,
}

impl ActionDispatcher {
    pub fn new(actions: &[ActionConfig], api: ControlPlaneClient, runner: ScriptRunner) -> Self {
        let actions = actions
            .iter()
            .map(|action| (action.name.clone(), action.clone()))
            .collect();
        Self {
            actions,
            api,
            runner,
        }
    }

    /// Consume matched events until the channel closes or shutdown fires.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<MatchedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(actions = self.actions.len(), "Starting action dispatcher");

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            debug!(
                                monitor = %event.monitor,
                                event = %event.event_name,
                                "Dispatching event"
                            );
                            self.dispatch(&event.action, &event.captures).await;
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Action dispatcher stopped");
    }

    fn resolve(&self, action_name: &str) -> crate::Result<&ActionConfig> {
        self.actions
            .get(action_name)
            .ok_or_else(|| crate::WardenError::UnknownAction(action_name.to_string()))
    }

    /// Run one action for a set of captures. Returns whether the script
    /// ran and exited cleanly; every failure path is logged, never raised.
    pub async fn dispatch(&self, action_name: &str, captures: &HashMap<String, String>) -> bool {
        let action = match self.resolve(action_name) {
            Ok(action) => action,
            Err(err) => {
                error!("{err}");
                return false;
            }
        };

        info!(action = action_name, "Handling event");

        let api_data = if let Some(endpoint) = &action.api_data_endpoint {
            match self.api.get_data(endpoint, captures).await {
                Ok(Value::Object(map)) => Some(map),
                Ok(other) => {
                    error!(
                        action = action_name,
                        "Control plane returned a non-object payload: {other}"
                    );
                    return false;
                }
                Err(err) => {
                    error!(action = action_name, "Failed to get control plane data: {err}");
                    return false;
                }
            }
        } else {
            None
        };

        // Control-plane data wins over captures for the same source key.
        let mut parameters: Vec<(String, Value)> = Vec::new();
        for (param_name, source_key) in &action.parameter_mapping {
            let value = api_data
                .as_ref()
                .and_then(|data| data.get(source_key))
                .cloned()
                .or_else(|| {
                    captures
                        .get(source_key)
                        .map(|text| Value::String(text.clone()))
                });

            match value {
                Some(value) => parameters.push((param_name.clone(), value)),
                None => warn!(
                    action = action_name,
                    key = %source_key,
                    "Parameter mapping key not found in data"
                ),
            }
        }

        match self.runner.execute(&action.script, &parameters).await {
            Ok(outcome) if outcome.success() => {
                info!(action = action_name, "Action executed successfully");
                if !outcome.stdout.trim().is_empty() {
                    debug!(action = action_name, output = %outcome.stdout.trim(), "Script output");
                }
                true
            }
            Ok(outcome) => {
                error!(
                    action = action_name,
                    exit_code = outcome.exit_code,
                    "Action failed: {}",
                    outcome.stderr.trim()
                );
                false
            }
            Err(err) => {
                error!(action = action_name, "Action failed: {err}");
                false
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::GeneralConfig;
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_capture_script(dir: &Path) -> PathBuf {
        let out_file = dir.join("invocation.txt");
        let script = dir.join("Set-Proxy.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nprintf '%s ' \"$@\" > {}\n", out_file.display()),
        )
        .unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        out_file
    }

    fn dispatcher_for(server_url: &str, scripts_dir: &Path, action: ActionConfig) -> ActionDispatcher {
        let general = GeneralConfig {
            vm_identifier: "vm-01".to_string(),
            api_key: "secret".to_string(),
            manager_base_url: server_url.to_string(),
            scripts_path: scripts_dir.to_path_buf(),
        };
        let api = ControlPlaneClient::new(&general).unwrap();
        let runner = ScriptRunner::new(scripts_dir.to_path_buf());
        ActionDispatcher::new(&[action], api, runner)
    }

    fn update_proxy_action() -> ActionConfig {
        let mut mapping = BTreeMap::new();
        mapping.insert("ProxyServer".to_string(), "proxy_server".to_string());
        ActionConfig {
            name: "UpdateProxyForAccount".to_string(),
            script: "Set-Proxy.sh".to_string(),
            api_data_endpoint: Some(
                "/account-config?vm_id={VMIdentifier}&account_id={account_id}".to_string(),
            ),
            parameter_mapping: mapping,
        }
    }

    #[tokio::test]
    async fn test_event_to_script_invocation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account-config"))
            .and(query_param("vm_id", "vm-01"))
            .and(query_param("account_id", "alice"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"proxy_server": "1.2.3.4:8080"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let out_file = write_capture_script(dir.path());
        let dispatcher = dispatcher_for(&server.uri(), dir.path(), update_proxy_action());

        let mut captures = HashMap::new();
        captures.insert("account_id".to_string(), "alice".to_string());

        assert!(dispatcher.dispatch("UpdateProxyForAccount", &captures).await);

        let invocation = std::fs::read_to_string(out_file).unwrap();
        assert_eq!(invocation.trim(), "-ProxyServer \"1.2.3.4:8080\"");
    }

    #[tokio::test]
    async fn test_api_data_wins_over_captures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"proxy_server": "1.2.3.4:8080"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let out_file = write_capture_script(dir.path());
        let dispatcher = dispatcher_for(&server.uri(), dir.path(), update_proxy_action());

        // The capture carries the same source key with a different value.
        let mut captures = HashMap::new();
        captures.insert("account_id".to_string(), "alice".to_string());
        captures.insert("proxy_server".to_string(), "9.9.9.9:1".to_string());

        assert!(dispatcher.dispatch("UpdateProxyForAccount", &captures).await);

        let invocation = std::fs::read_to_string(out_file).unwrap();
        assert!(invocation.contains("1.2.3.4:8080"));
        assert!(!invocation.contains("9.9.9.9:1"));
    }

    #[tokio::test]
    async fn test_unknown_action_returns_false() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_for(&server.uri(), dir.path(), update_proxy_action());

        assert!(!dispatcher.dispatch("NoSuchAction", &HashMap::new()).await);
    }

    #[tokio::test]
    async fn test_control_plane_failure_aborts_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        write_capture_script(dir.path());
        let dispatcher = dispatcher_for(&server.uri(), dir.path(), update_proxy_action());

        let mut captures = HashMap::new();
        captures.insert("account_id".to_string(), "alice".to_string());
        assert!(!dispatcher.dispatch("UpdateProxyForAccount", &captures).await);
    }

    #[tokio::test]
    async fn test_missing_mapping_key_is_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let out_file = write_capture_script(dir.path());
        let dispatcher = dispatcher_for(&server.uri(), dir.path(), update_proxy_action());

        let mut captures = HashMap::new();
        captures.insert("account_id".to_string(), "alice".to_string());

        // The script still runs, just without the unbound parameter.
        assert!(dispatcher.dispatch("UpdateProxyForAccount", &captures).await);
        let invocation = std::fs::read_to_string(out_file).unwrap();
        assert!(invocation.trim().is_empty());
    }

    #[tokio::test]
    async fn test_captures_bind_without_endpoint() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let out_file = write_capture_script(dir.path());

        let mut action = update_proxy_action();
        action.api_data_endpoint = None;
        let dispatcher = dispatcher_for(&server.uri(), dir.path(), action);

        let mut captures = HashMap::new();
        captures.insert("proxy_server".to_string(), "5.6.7.8:3128".to_string());

        assert!(dispatcher.dispatch("UpdateProxyForAccount", &captures).await);
        let invocation = std::fs::read_to_string(out_file).unwrap();
        assert_eq!(invocation.trim(), "-ProxyServer \"5.6.7.8:3128\"");
    }
}
