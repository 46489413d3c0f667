//! External script execution with argument formatting and path confinement

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info};

use crate::error::{Result, WardenError};

const SCRIPT_TIMEOUT_SECS: u64 = 300;

/// Outcome of one script invocation
#[derive(Debug)]
pub struct ScriptOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs remediation scripts confined to the configured scripts directory.
pub struct ScriptRunner {
    scripts_dir: PathBuf,
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(scripts_dir: PathBuf) -> Self {
        Self {
            scripts_dir,
            timeout: Duration::from_secs(SCRIPT_TIMEOUT_SECS),
        }
    }

    /// Override the execution timeout (tests; production keeps 300 s).
    pub fn with_timeout(scripts_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            scripts_dir,
            timeout,
        }
    }

    /// Resolve a script name to a canonical path under the scripts
    /// directory. Symlinks are resolved before the containment check, so a
    /// link pointing outside the directory is refused.
    fn resolve(&self, script_name: &str) -> Result<PathBuf> {
        let dir = self.scripts_dir.canonicalize().map_err(|err| {
            WardenError::InvalidConfig(format!(
                "scripts directory {} is not accessible: {err}",
                self.scripts_dir.display()
            ))
        })?;

        let resolved = dir
            .join(script_name)
            .canonicalize()
            .map_err(|_| WardenError::ScriptNotFound(script_name.to_string()))?;

        if !resolved.starts_with(&dir) {
            error!(script = script_name, "Script path escapes the scripts directory");
            return Err(WardenError::ScriptPathRejected(script_name.to_string()));
        }

        Ok(resolved)
    }

    /// Execute a script with `-Name value` argument pairs.
    ///
    /// Null parameter values are skipped; the remaining values are
    /// formatted by type (see [`format_arg_value`]). A run past the
    /// timeout kills the child and fails the dispatch.
    pub async fn execute(
        &self,
        script_name: &str,
        parameters: &[(String, serde_json::Value)],
    ) -> Result<ScriptOutcome> {
        let script_path = self.resolve(script_name)?;

        let mut command = base_command(&script_path);
        for (name, value) in parameters {
            let Some(formatted) = format_arg_value(value) else {
                continue;
            };
            command.arg(format!("-{name}"));
            command.arg(formatted);
        }

        info!(script = script_name, params = parameters.len(), "Executing script");

        let child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                error!(script = script_name, "Script execution timed out");
                WardenError::ScriptTimeout(self.timeout.as_secs())
            })??;

        let outcome = ScriptOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if outcome.success() {
            debug!(script = script_name, "Script finished");
        } else {
            error!(
                script = script_name,
                exit_code = outcome.exit_code,
                stderr = %outcome.stderr.trim(),
                "Script failed"
            );
        }

        Ok(outcome)
    }
}

/// Format one parameter value for the script command line.
///
/// Booleans become `$true`/`$false`, numbers stay bare, strings are
/// double-quoted with embedded quotes backtick-escaped. Null is skipped.
fn format_arg_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(true) => Some("$true".to_string()),
        serde_json::Value::Bool(false) => Some("$false".to_string()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        serde_json::Value::String(text) => Some(quote(text)),
        other => Some(quote(&other.to_string())),
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "`\""))
}

#[cfg(windows)]
fn base_command(script_path: &Path) -> Command {
    let mut command = Command::new("powershell.exe");
    command
        .arg("-NoProfile")
        .arg("-ExecutionPolicy")
        .arg("Bypass")
        .arg("-File")
        .arg(script_path);
    command
}

#[cfg(not(windows))]
fn base_command(script_path: &Path) -> Command {
    Command::new(script_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_arg_values() {
        use serde_json::json;

        assert_eq!(format_arg_value(&json!(null)), None);
        assert_eq!(format_arg_value(&json!(true)), Some("$true".to_string()));
        assert_eq!(format_arg_value(&json!(false)), Some("$false".to_string()));
        assert_eq!(format_arg_value(&json!(8080)), Some("8080".to_string()));
        assert_eq!(format_arg_value(&json!(1.5)), Some("1.5".to_string()));
        assert_eq!(
            format_arg_value(&json!("1.2.3.4:8080")),
            Some("\"1.2.3.4:8080\"".to_string())
        );
        assert_eq!(
            format_arg_value(&json!(r#"say "hi""#)),
            Some("\"say `\"hi`\"\"".to_string())
        );
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        #[tokio::test]
        async fn test_execute_passes_formatted_args() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "echo-args.sh", "#!/bin/sh\nprintf '%s\\n' \"$@\"\n");

            let runner = ScriptRunner::new(dir.path().to_path_buf());
            let parameters = vec![(
                "ProxyServer".to_string(),
                serde_json::json!("1.2.3.4:8080"),
            )];
            let outcome = runner.execute("echo-args.sh", &parameters).await.unwrap();

            assert!(outcome.success());
            let lines: Vec<&str> = outcome.stdout.lines().collect();
            assert_eq!(lines, vec!["-ProxyServer", "\"1.2.3.4:8080\""]);
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_failure() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "fail.sh", "#!/bin/sh\necho oops >&2\nexit 3\n");

            let runner = ScriptRunner::new(dir.path().to_path_buf());
            let outcome = runner.execute("fail.sh", &[]).await.unwrap();
            assert!(!outcome.success());
            assert_eq!(outcome.exit_code, 3);
            assert!(outcome.stderr.contains("oops"));
        }

        #[tokio::test]
        async fn test_missing_script_is_error() {
            let dir = tempfile::tempdir().unwrap();
            let runner = ScriptRunner::new(dir.path().to_path_buf());
            let err = runner.execute("ghost.sh", &[]).await.unwrap_err();
            assert!(matches!(err, WardenError::ScriptNotFound(_)));
        }

        #[tokio::test]
        async fn test_escaping_path_is_rejected() {
            let outer = tempfile::tempdir().unwrap();
            let scripts = outer.path().join("scripts");
            std::fs::create_dir(&scripts).unwrap();
            write_script(outer.path(), "outside.sh", "#!/bin/sh\nexit 0\n");

            let runner = ScriptRunner::new(scripts);
            let err = runner.execute("../outside.sh", &[]).await.unwrap_err();
            assert!(matches!(err, WardenError::ScriptPathRejected(_)));
        }

        #[tokio::test]
        async fn test_symlink_escape_is_rejected() {
            let outer = tempfile::tempdir().unwrap();
            let scripts = outer.path().join("scripts");
            std::fs::create_dir(&scripts).unwrap();
            let target = write_script(outer.path(), "target.sh", "#!/bin/sh\nexit 0\n");
            std::os::unix::fs::symlink(&target, scripts.join("link.sh")).unwrap();

            let runner = ScriptRunner::new(scripts);
            let err = runner.execute("link.sh", &[]).await.unwrap_err();
            assert!(matches!(err, WardenError::ScriptPathRejected(_)));
        }

        #[tokio::test]
        async fn test_timeout_kills_script() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 5\n");

            let runner =
                ScriptRunner::with_timeout(dir.path().to_path_buf(), Duration::from_millis(100));
            let err = runner.execute("slow.sh", &[]).await.unwrap_err();
            assert!(matches!(err, WardenError::ScriptTimeout(_)));
        }
    }
}
