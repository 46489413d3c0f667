//! Event monitors: tail an append-only sink and match trigger patterns

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};

use crate::config::{MonitorConfig, TriggerConfig};
use crate::error::Result;

/// A line matched by a trigger, ready for dispatch
#[derive(Debug, Clone)]
pub struct MatchedEvent {
    pub monitor: String,
    pub event_name: String,
    pub action: String,
    /// Named capture groups of the trigger regex
    pub captures: HashMap<String, String>,
}

/// One compiled trigger: pattern plus target action
pub struct CompiledTrigger {
    pub event_name: String,
    pub action: String,
    regex: Regex,
}

impl CompiledTrigger {
    pub fn compile(config: &TriggerConfig) -> Result<Self> {
        Ok(Self {
            event_name: config.event_name.clone(),
            action: config.action.clone(),
            regex: Regex::new(&config.regex)?,
        })
    }

    /// Search the line; on a hit, return the named captures.
    pub fn match_line(&self, line: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(line)?;
        let mut named = HashMap::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                named.insert(name.to_string(), value.as_str().to_string());
            }
        }
        Some(named)
    }
}

/// Triggers in declaration order; the first match wins.
pub struct TriggerSet {
    triggers: Vec<CompiledTrigger>,
}

impl TriggerSet {
    pub fn compile(configs: &[TriggerConfig]) -> Result<Self> {
        let triggers = configs
            .iter()
            .map(CompiledTrigger::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { triggers })
    }

    pub fn match_line(&self, line: &str) -> Option<(&CompiledTrigger, HashMap<String, String>)> {
        self.triggers
            .iter()
            .find_map(|trigger| trigger.match_line(line).map(|captures| (trigger, captures)))
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

/// An event source feeding the dispatcher
#[async_trait]
pub trait Monitor: Send + Sync {
    fn name(&self) -> &str;

    /// Run until shutdown is signalled.
    async fn run(&self, shutdown: watch::Receiver<bool>);
}

/// Tails a log file and emits trigger matches.
///
/// Starts at the current end of the file, so only lines appended after
/// startup are observed. A shrinking file is treated as rotation and read
/// from the start again.
pub struct LogTailMonitor {
    name: String,
    path: PathBuf,
    poll_interval: Duration,
    triggers: TriggerSet,
    events: mpsc::Sender<MatchedEvent>,
}

impl LogTailMonitor {
    pub fn new(config: &MonitorConfig, events: mpsc::Sender<MatchedEvent>) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            path: config.log_file_path.clone(),
            poll_interval: Duration::from_secs_f64(config.check_interval_seconds.max(0.0)),
            triggers: TriggerSet::compile(&config.event_triggers)?,
            events,
        })
    }

    async fn current_size(&self) -> Option<u64> {
        tokio::fs::metadata(&self.path).await.ok().map(|m| m.len())
    }

    /// Read everything appended since `position` and emit matching lines.
    async fn poll_once(&self, position: &mut u64) -> std::io::Result<()> {
        let size = match self.current_size().await {
            Some(size) => size,
            None => return Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
        };

        if size < *position {
            info!(
                monitor = %self.name,
                path = %self.path.display(),
                "Log file appears to have been rotated, resetting position"
            );
            *position = 0;
        }

        if size == *position {
            return Ok(());
        }

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(*position)).await?;
        let mut appended = Vec::new();
        file.read_to_end(&mut appended).await?;
        *position += appended.len() as u64;

        let text = String::from_utf8_lossy(&appended);
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.process_line(line).await;
        }

        Ok(())
    }

    async fn process_line(&self, line: &str) {
        let Some((trigger, captures)) = self.triggers.match_line(line) else {
            return;
        };

        info!(
            monitor = %self.name,
            event = %trigger.event_name,
            action = %trigger.action,
            "Event triggered"
        );

        let event = MatchedEvent {
            monitor: self.name.clone(),
            event_name: trigger.event_name.clone(),
            action: trigger.action.clone(),
            captures,
        };
        if self.events.send(event).await.is_err() {
            warn!(monitor = %self.name, "Dispatcher channel closed, dropping event");
        }
    }
}

#[async_trait]
impl Monitor for LogTailMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, shutdown), fields(monitor = %self.name))]
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            path = %self.path.display(),
            triggers = self.triggers.len(),
            "Starting log tail monitor"
        );

        // Only lines appended after startup count.
        let mut position = self.current_size().await.unwrap_or(0);
        let mut next_wait = self.poll_interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(next_wait) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            next_wait = self.poll_interval;
            match self.poll_once(&mut position).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(
                        monitor = %self.name,
                        path = %self.path.display(),
                        "Log file does not exist, waiting"
                    );
                    next_wait = self.poll_interval * 5;
                }
                Err(err) => {
                    warn!(monitor = %self.name, "Error reading log file: {err}");
                    next_wait = self.poll_interval * 2;
                }
            }
        }

        info!("Log tail monitor stopped");
    }
}
