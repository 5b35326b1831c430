use crate::activity::ActivityLog;
use crate::error::{DirectoryQueryError, ExecError};
use crate::manager::ConnectionManager;
use crate::output::{OutputLog, Segment, SegmentKind};
use crate::store::{self, KvStore, Persisted, Persisting, TERMINAL_STATE_KEY};
use crate::transport::RemoteTransport;
use emscon_config::{BatchStepConfig, TerminalConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One command of a batch. `delay_ms` is waited before the step runs,
/// except for the first step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchStep {
    pub command: String,
    pub delay_ms: u64,
}

impl BatchStep {
    pub fn new(command: impl Into<String>, delay_ms: u64) -> Self {
        Self {
            command: command.into(),
            delay_ms,
        }
    }
}

impl From<&BatchStepConfig> for BatchStep {
    fn from(step: &BatchStepConfig) -> Self {
        Self::new(step.command.clone(), step.delay_ms)
    }
}

struct TerminalState {
    output: OutputLog,
    history: Vec<String>,
    cursor: usize,
    working_directory: String,
    executing: bool,
    initialized: bool,
}

impl TerminalState {
    fn record_history(&mut self, command: &str) {
        if self.history.last().map(String::as_str) != Some(command) {
            self.history.push(command.to_string());
        }
        self.cursor = self.history.len();
    }

    fn prompt(&mut self) {
        let directory = self.working_directory.clone();
        self.output.prompt(&directory);
    }

    fn reset_output(&mut self, banner: &str) {
        self.output.clear();
        self.output.push(SegmentKind::Comment, banner);
        self.output.line_break();
        self.prompt();
    }

    /// Banner and a bare prompt, for when no directory is known yet.
    fn reset_uninitialized(&mut self, banner: &str, default_directory: &str) {
        self.working_directory = default_directory.to_string();
        self.initialized = false;
        self.output.clear();
        self.output.push(SegmentKind::Comment, banner);
        self.output.line_break();
        self.output.prompt("");
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a> {
    output_log: &'a OutputLog,
    history: &'a [String],
    working_directory: &'a str,
    initialized: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    output_log: OutputLog,
    #[serde(default)]
    history: Vec<String>,
    working_directory: String,
    #[serde(default)]
    initialized: bool,
}

impl Persisted for TerminalState {
    const KEY: &'static str = TERMINAL_STATE_KEY;

    fn to_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SnapshotRef {
            output_log: &self.output,
            history: &self.history,
            working_directory: &self.working_directory,
            initialized: self.initialized,
        })
    }
}

/// Holds the `executing` flag for the lifetime of one command or batch.
struct ExecutingGuard<'a> {
    state: &'a Mutex<TerminalState>,
}

impl<'a> ExecutingGuard<'a> {
    fn acquire(state: &'a Mutex<TerminalState>) -> Result<Self, ExecError> {
        let mut locked = state.lock();
        if locked.executing {
            return Err(ExecError::Busy);
        }
        locked.executing = true;
        Ok(Self { state })
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().executing = false;
    }
}

/// The interactive terminal bound to the managed connection: command
/// history with a recall cursor, the styled output log and the remote
/// working directory. Commands never overlap; a second caller gets
/// [`ExecError::Busy`].
#[derive(Clone)]
pub struct TerminalSession {
    connection: ConnectionManager,
    transport: Arc<dyn RemoteTransport>,
    store: Arc<dyn KvStore>,
    activity: ActivityLog,
    config: Arc<TerminalConfig>,
    state: Arc<Mutex<TerminalState>>,
}

impl TerminalSession {
    /// Loads the saved snapshot, or starts from the banner when there is none.
    pub fn restore(
        connection: ConnectionManager,
        store: Arc<dyn KvStore>,
        activity: ActivityLog,
        config: TerminalConfig,
    ) -> Self {
        let snapshot = match store::load_json::<Snapshot>(&*store, TERMINAL_STATE_KEY) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "failed to load terminal state");
                None
            }
        };
        let state = match snapshot {
            Some(snapshot) => TerminalState {
                cursor: snapshot.history.len(),
                output: snapshot.output_log,
                history: snapshot.history,
                working_directory: snapshot.working_directory,
                executing: false,
                initialized: snapshot.initialized,
            },
            None => {
                let mut state = TerminalState {
                    output: OutputLog::new(),
                    history: Vec::new(),
                    cursor: 0,
                    working_directory: String::new(),
                    executing: false,
                    initialized: false,
                };
                state.reset_uninitialized(&config.welcome_banner, &config.default_directory);
                state
            }
        };
        debug!(
            history = state.history.len(),
            segments = state.output.len(),
            "terminal state restored"
        );
        Self {
            transport: connection.transport(),
            connection,
            store,
            activity,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Runs one command. Blank input is ignored and returns an empty string.
    pub async fn execute_command(&self, raw: &str) -> Result<String, ExecError> {
        if raw.trim().is_empty() {
            return Ok(String::new());
        }
        let _running = ExecutingGuard::acquire(&self.state)?;
        self.run_step(raw).await
    }

    /// Runs `steps` in order, aborting on the first failure.
    pub async fn execute_batch(&self, steps: &[BatchStep]) -> Result<(), ExecError> {
        let _running = ExecutingGuard::acquire(&self.state)?;
        self.run_batch(steps).await
    }

    /// Runs the named batch from the terminal configuration.
    pub async fn execute_preset(&self, name: &str) -> Result<(), ExecError> {
        let steps: Vec<BatchStep> = self
            .config
            .preset(name)
            .ok_or_else(|| ExecError::UnknownPreset(name.to_string()))?
            .steps
            .iter()
            .map(BatchStep::from)
            .collect();
        let _running = ExecutingGuard::acquire(&self.state)?;
        if !self.connection.is_connected() {
            return Err(ExecError::NotConnected);
        }
        {
            let mut state = self.persisting();
            state.output.line_break();
            state
                .output
                .push(SegmentKind::Comment, format!("# running preset {name}..."));
            state.output.line_break();
        }
        self.activity.info(format!("running preset {name}"));
        self.run_batch(&steps).await
    }

    async fn run_batch(&self, steps: &[BatchStep]) -> Result<(), ExecError> {
        for (index, step) in steps.iter().enumerate() {
            if index > 0 && step.delay_ms > 0 {
                {
                    let mut state = self.persisting();
                    state
                        .output
                        .push(SegmentKind::Comment, format!("# waiting {}ms...", step.delay_ms));
                    state.output.line_break();
                }
                tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
            }
            if step.command.trim().is_empty() {
                continue;
            }
            if let Err(err) = self.run_step(&step.command).await {
                self.activity.error(format!(
                    "batch aborted at step {}/{}: {err}",
                    index + 1,
                    steps.len()
                ));
                return Err(err);
            }
        }
        self.activity
            .info(format!("batch of {} commands finished", steps.len()));
        Ok(())
    }

    async fn run_step(&self, raw: &str) -> Result<String, ExecError> {
        if !self.connection.is_connected() {
            return Err(ExecError::NotConnected);
        }
        {
            let mut state = self.persisting();
            state.record_history(raw);
            state.output.push(SegmentKind::Command, raw);
            state.output.line_break();
        }
        debug!(command = %raw, "dispatching command");

        match self.transport.run_command(raw).await {
            Ok(output) => {
                let directory = self.query_directory().await;
                let mut state = self.persisting();
                if !output.trim().is_empty() {
                    state.output.push(SegmentKind::Output, output.as_str());
                    if !output.ends_with('\n') {
                        state.output.line_break();
                    }
                }
                if let Ok(directory) = directory {
                    state.working_directory = directory;
                }
                state.prompt();
                Ok(output)
            }
            Err(err) => {
                let err = ExecError::from(err);
                {
                    let mut state = self.persisting();
                    state
                        .output
                        .push(SegmentKind::Error, format!("Error: {err}"));
                    state.output.line_break();
                    state.prompt();
                }
                self.activity.error(format!("command `{raw}` failed: {err}"));
                Err(err)
            }
        }
    }

    /// Moves the recall cursor by `delta`, clamped to `[0, history.len()]`.
    /// Returns the command under the cursor, or `""` past the newest entry.
    pub fn navigate_history(&self, delta: isize) -> String {
        let mut state = self.state.lock();
        if state.history.is_empty() {
            return String::new();
        }
        let len = state.history.len();
        let cursor = (state.cursor as isize).saturating_add(delta).clamp(0, len as isize) as usize;
        state.cursor = cursor;
        state.history.get(cursor).cloned().unwrap_or_default()
    }

    /// Empties the output log and shows a fresh prompt. History is kept.
    pub fn clear(&self) {
        let mut state = self.persisting();
        state.output.clear();
        state.prompt();
    }

    /// Queries the working directory and shows the banner, once. Returns
    /// whether the terminal is initialized afterwards.
    pub async fn initialize_once(&self) -> bool {
        if self.state.lock().initialized {
            return true;
        }
        let directory = match self.query_directory().await {
            Ok(directory) => directory,
            Err(err) => {
                warn!(error = %err, "terminal initialization deferred");
                return false;
            }
        };
        let mut state = self.persisting();
        if state.initialized {
            return true;
        }
        state.working_directory = directory;
        state.reset_output(&self.config.welcome_banner);
        state.initialized = true;
        info!(cwd = %state.working_directory, "terminal initialized");
        true
    }

    /// Forgets the previous session's output and directory, then
    /// initializes against the current one. If the directory cannot be read
    /// the terminal stays uninitialized behind a bare `$ ` prompt.
    pub async fn reset_for_reconnect(&self) -> bool {
        self.persisting()
            .reset_uninitialized(&self.config.welcome_banner, &self.config.default_directory);
        self.initialize_once().await
    }

    /// Re-reads the remote working directory into the prompt state.
    pub async fn refresh_directory(&self) -> Result<String, DirectoryQueryError> {
        let directory = self.query_directory().await?;
        let mut state = self.persisting();
        state.working_directory = directory.clone();
        Ok(directory)
    }

    /// Appends an operator note to the output log.
    pub fn note(&self, text: &str) {
        let mut state = self.persisting();
        state.output.push(SegmentKind::Comment, text);
        state.output.line_break();
    }

    async fn query_directory(&self) -> Result<String, DirectoryQueryError> {
        let directory = self
            .transport
            .query_working_directory()
            .await
            .map_err(|e| DirectoryQueryError(e.to_string()))?;
        let directory = directory.trim();
        if directory.is_empty() {
            return Err(DirectoryQueryError("empty directory".to_string()));
        }
        Ok(directory.to_string())
    }

    pub fn output(&self) -> OutputLog {
        self.state.lock().output.clone()
    }

    /// Segments appended after the first `from`.
    pub fn output_since(&self, from: usize) -> Vec<Segment> {
        let state = self.state.lock();
        state
            .output
            .segments()
            .get(from..)
            .map(<[Segment]>::to_vec)
            .unwrap_or_default()
    }

    pub fn history(&self) -> Vec<String> {
        self.state.lock().history.clone()
    }

    pub fn history_cursor(&self) -> usize {
        self.state.lock().cursor
    }

    pub fn working_directory(&self) -> String {
        self.state.lock().working_directory.clone()
    }

    pub fn is_executing(&self) -> bool {
        self.state.lock().executing
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn presets(&self) -> Vec<String> {
        self.config.presets.iter().map(|p| p.name.clone()).collect()
    }

    fn persisting(&self) -> Persisting<'_, TerminalState> {
        Persisting::new(&self.state, &*self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::error::TransportError;
    use crate::events::EventBus;
    use crate::store::MemoryKvStore;
    use crate::testing::ScriptedTransport;
    use emscon_config::PresetConfig;

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryKvStore>,
        connection: ConnectionManager,
        terminal: TerminalSession,
    }

    fn fixture_with(store: Arc<MemoryKvStore>, config: TerminalConfig) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let connection = ConnectionManager::new(
            transport.clone(),
            store.clone(),
            EventBus::new(64),
            ActivityLog::default(),
        );
        let terminal =
            TerminalSession::restore(connection.clone(), store.clone(), ActivityLog::default(), config);
        Fixture {
            transport,
            store,
            connection,
            terminal,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryKvStore::new()), TerminalConfig::default())
    }

    async fn connected() -> Fixture {
        let f = fixture();
        f.connection
            .connect(ConnectionConfig::new("10.0.0.5", 22, "root", "x"), true)
            .await
            .unwrap();
        f
    }

    fn tagged(terminal: &TerminalSession) -> Vec<(SegmentKind, String)> {
        terminal
            .output()
            .tagged()
            .map(|s| (s.kind, s.text.clone()))
            .collect()
    }

    #[tokio::test]
    async fn pwd_appends_command_output_prompt() {
        let f = connected().await;
        f.transport.respond("pwd", "/root");
        f.transport.set_directory("/root");
        let before = f.terminal.output().len();

        let out = f.terminal.execute_command("pwd").await.unwrap();

        assert_eq!(out, "/root");
        let added: Vec<(SegmentKind, String)> = f
            .terminal
            .output_since(before)
            .into_iter()
            .filter(|s| s.kind != SegmentKind::Plain)
            .map(|s| (s.kind, s.text))
            .collect();
        assert_eq!(
            added,
            vec![
                (SegmentKind::Command, "pwd".to_string()),
                (SegmentKind::Output, "/root".to_string()),
                (SegmentKind::Prompt, "/root$ ".to_string()),
            ]
        );
        assert_eq!(f.terminal.history(), vec!["pwd"]);
        assert!(!f.terminal.is_executing());
    }

    #[tokio::test]
    async fn blank_commands_change_nothing() {
        let f = connected().await;
        let before = f.terminal.output();

        assert_eq!(f.terminal.execute_command("").await.unwrap(), "");
        assert_eq!(f.terminal.execute_command("   ").await.unwrap(), "");

        assert_eq!(f.terminal.output(), before);
        assert!(f.terminal.history().is_empty());
        assert!(!f.terminal.is_executing());
        assert!(f.transport.dispatched().is_empty());
    }

    #[tokio::test]
    async fn not_connected_fails_before_any_mutation() {
        let f = fixture();
        let before = f.terminal.output();

        let err = f.terminal.execute_command("ls").await.unwrap_err();

        assert_eq!(err, ExecError::NotConnected);
        assert_eq!(f.terminal.output(), before);
        assert!(f.terminal.history().is_empty());
        assert!(f.transport.dispatched().is_empty());
        assert!(!f.terminal.is_executing());
    }

    #[tokio::test]
    async fn failure_is_rendered_inline_and_returned() {
        let f = connected().await;
        f.transport.set_directory("/srv");
        f.transport.fail(
            "cat missing",
            TransportError::CommandFailed {
                code: 1,
                message: "cat: missing: No such file or directory".into(),
            },
        );

        let err = f.terminal.execute_command("cat missing").await.unwrap_err();

        assert_eq!(
            err,
            ExecError::Remote("cat: missing: No such file or directory".into())
        );
        let segments = tagged(&f.terminal);
        let tail = &segments[segments.len() - 3..];
        assert_eq!(tail[0], (SegmentKind::Command, "cat missing".to_string()));
        assert_eq!(
            tail[1],
            (
                SegmentKind::Error,
                "Error: cat: missing: No such file or directory".to_string()
            )
        );
        assert_eq!(tail[2].0, SegmentKind::Prompt);
        assert!(!f.terminal.is_executing());
        assert_eq!(f.terminal.history(), vec!["cat missing"]);
    }

    #[tokio::test]
    async fn empty_output_is_not_appended_and_stale_directory_is_kept() {
        let f = connected().await;
        f.transport.set_directory("/var");
        f.terminal.refresh_directory().await.unwrap();
        f.transport.fail_directory("pwd failed");

        f.terminal.execute_command("true").await.unwrap();

        let segments = tagged(&f.terminal);
        assert!(segments.iter().all(|(kind, _)| *kind != SegmentKind::Output));
        assert_eq!(segments.last().unwrap(), &(SegmentKind::Prompt, "/var$ ".to_string()));
        assert_eq!(f.terminal.working_directory(), "/var");
    }

    #[tokio::test]
    async fn adjacent_duplicates_are_recorded_once() {
        let f = connected().await;
        for cmd in ["ls", "ls", "pwd", "ls"] {
            f.terminal.execute_command(cmd).await.unwrap();
        }
        assert_eq!(f.terminal.history(), vec!["ls", "pwd", "ls"]);
        assert_eq!(f.terminal.history_cursor(), 3);
    }

    #[tokio::test]
    async fn overlapping_command_is_busy() {
        let f = connected().await;
        let gate = f.transport.gate("sleep 5");
        let terminal = f.terminal.clone();
        let running = tokio::spawn(async move { terminal.execute_command("sleep 5").await });

        gate.entered.notified().await;
        assert!(f.terminal.is_executing());
        let before = f.terminal.output();
        assert_eq!(
            f.terminal.execute_command("ls").await.unwrap_err(),
            ExecError::Busy
        );
        assert_eq!(
            f.terminal
                .execute_batch(&[BatchStep::new("ls", 0)])
                .await
                .unwrap_err(),
            ExecError::Busy
        );
        assert_eq!(f.terminal.output(), before);

        gate.release.notify_one();
        running.await.unwrap().unwrap();
        assert!(!f.terminal.is_executing());
        assert_eq!(f.transport.dispatched(), vec!["sleep 5"]);
    }

    #[tokio::test]
    async fn batch_stops_at_first_failure() {
        let f = connected().await;
        f.transport
            .fail("step2", TransportError::Other("boom".into()));
        let steps = [
            BatchStep::new("step1", 0),
            BatchStep::new("step2", 0),
            BatchStep::new("step3", 0),
        ];

        let err = f.terminal.execute_batch(&steps).await.unwrap_err();

        assert_eq!(err, ExecError::Remote("boom".into()));
        assert_eq!(f.transport.dispatched(), vec!["step1", "step2"]);
        let commands: Vec<String> = tagged(&f.terminal)
            .into_iter()
            .filter(|(kind, _)| *kind == SegmentKind::Command)
            .map(|(_, text)| text)
            .collect();
        assert_eq!(commands, vec!["step1", "step2"]);
        assert!(!f.terminal.is_executing());
    }

    #[tokio::test]
    async fn batch_waits_and_announces_delays() {
        let f = connected().await;
        let steps = [
            BatchStep::new("first", 500),
            BatchStep::new("second", 20),
        ];
        let started = std::time::Instant::now();

        f.terminal.execute_batch(&steps).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_millis(500));
        let comments: Vec<String> = tagged(&f.terminal)
            .into_iter()
            .filter(|(kind, _)| *kind == SegmentKind::Comment)
            .map(|(_, text)| text)
            .collect();
        assert_eq!(comments.last().unwrap(), "# waiting 20ms...");
        assert_eq!(f.transport.dispatched(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn batch_without_connection_dispatches_nothing() {
        let f = fixture();
        let err = f
            .terminal
            .execute_batch(&[BatchStep::new("ls", 0)])
            .await
            .unwrap_err();
        assert_eq!(err, ExecError::NotConnected);
        assert!(f.transport.dispatched().is_empty());
    }

    #[tokio::test]
    async fn preset_runs_configured_steps() {
        let config = TerminalConfig {
            presets: vec![PresetConfig {
                name: "diagnose".into(),
                steps: vec![
                    BatchStepConfig {
                        command: "uname -a".into(),
                        delay_ms: 0,
                    },
                    BatchStepConfig {
                        command: "uptime".into(),
                        delay_ms: 0,
                    },
                ],
            }],
            ..TerminalConfig::default()
        };
        let f = fixture_with(Arc::new(MemoryKvStore::new()), config);
        f.connection
            .connect(ConnectionConfig::new("h", 22, "root", "x"), false)
            .await
            .unwrap();

        f.terminal.execute_preset("diagnose").await.unwrap();
        assert_eq!(f.transport.dispatched(), vec!["uname -a", "uptime"]);
        assert!(tagged(&f.terminal)
            .contains(&(SegmentKind::Comment, "# running preset diagnose...".to_string())));

        assert_eq!(
            f.terminal.execute_preset("missing").await.unwrap_err(),
            ExecError::UnknownPreset("missing".into())
        );
    }

    #[tokio::test]
    async fn history_navigation_clamps() {
        let f = connected().await;
        for cmd in ["a", "b", "c"] {
            f.terminal.execute_command(cmd).await.unwrap();
        }

        assert_eq!(f.terminal.navigate_history(-1), "c");
        assert_eq!(f.terminal.navigate_history(-1), "b");
        assert_eq!(f.terminal.navigate_history(-1), "a");
        assert_eq!(f.terminal.navigate_history(-1), "a");
        assert_eq!(f.terminal.history_cursor(), 0);
        assert_eq!(f.terminal.navigate_history(1), "b");
        assert_eq!(f.terminal.navigate_history(1), "c");
        assert_eq!(f.terminal.navigate_history(1), "");
        assert_eq!(f.terminal.navigate_history(1), "");
        assert_eq!(f.terminal.history_cursor(), 3);
        assert_eq!(f.terminal.history(), vec!["a", "b", "c"]);
    }

    #[test]
    fn navigation_on_empty_history() {
        let f = fixture();
        assert_eq!(f.terminal.navigate_history(-1), "");
        assert_eq!(f.terminal.navigate_history(1), "");
        assert_eq!(f.terminal.history_cursor(), 0);
    }

    #[tokio::test]
    async fn clear_keeps_history_and_leaves_prompt() {
        let f = connected().await;
        f.transport.set_directory("/tmp");
        f.terminal.execute_command("ls").await.unwrap();

        f.terminal.clear();

        assert_eq!(
            tagged(&f.terminal),
            vec![(SegmentKind::Prompt, "/tmp$ ".to_string())]
        );
        assert_eq!(f.terminal.history(), vec!["ls"]);
    }

    #[tokio::test]
    async fn initialize_once_is_idempotent() {
        let f = connected().await;
        f.transport.set_directory("/root");

        assert!(f.terminal.initialize_once().await);
        let first = f.terminal.output();
        assert_eq!(
            tagged(&f.terminal),
            vec![
                (SegmentKind::Comment, TerminalConfig::default().welcome_banner),
                (SegmentKind::Prompt, "/root$ ".to_string()),
            ]
        );

        f.terminal.execute_command("ls").await.unwrap();
        f.transport.set_directory("/elsewhere");
        assert!(f.terminal.initialize_once().await);
        assert_ne!(f.terminal.output(), first);
        assert_eq!(f.terminal.history(), vec!["ls"]);
    }

    #[tokio::test]
    async fn failed_directory_query_leaves_terminal_uninitialized() {
        let f = fixture();
        f.transport.fail_directory("no session");
        assert!(!f.terminal.initialize_once().await);
        assert!(!f.terminal.is_initialized());
    }

    #[tokio::test]
    async fn reset_for_reconnect_shows_fresh_banner() {
        let f = connected().await;
        f.transport.set_directory("/root");
        f.terminal.initialize_once().await;
        f.terminal.execute_command("cd /var").await.unwrap();

        f.transport.set_directory("/home/ems");
        assert!(f.terminal.reset_for_reconnect().await);

        assert_eq!(
            tagged(&f.terminal),
            vec![
                (SegmentKind::Comment, TerminalConfig::default().welcome_banner),
                (SegmentKind::Prompt, "/home/ems$ ".to_string()),
            ]
        );
        assert_eq!(f.terminal.working_directory(), "/home/ems");
        assert_eq!(f.terminal.history(), vec!["cd /var"]);
    }

    #[tokio::test]
    async fn failed_reset_drops_previous_session_output() {
        let f = connected().await;
        f.transport.set_directory("/var/log");
        assert!(f.terminal.initialize_once().await);
        f.terminal.execute_command("ls").await.unwrap();

        f.transport.fail_directory("channel closed");
        assert!(!f.terminal.reset_for_reconnect().await);

        assert_eq!(
            tagged(&f.terminal),
            vec![
                (SegmentKind::Comment, TerminalConfig::default().welcome_banner),
                (SegmentKind::Prompt, "$ ".to_string()),
            ]
        );
        assert!(!f.terminal.is_initialized());
        assert_eq!(
            f.terminal.working_directory(),
            TerminalConfig::default().default_directory
        );
        assert_eq!(f.terminal.history(), vec!["ls"]);

        f.transport.set_directory("/root");
        assert!(f.terminal.initialize_once().await);
        assert_eq!(
            tagged(&f.terminal).last().unwrap(),
            &(SegmentKind::Prompt, "/root$ ".to_string())
        );
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let f = connected().await;
        f.transport.set_directory("/opt");
        f.terminal.initialize_once().await;
        f.terminal.execute_command("ls").await.unwrap();
        f.terminal.execute_command("pwd").await.unwrap();
        f.terminal.navigate_history(-1);

        let reloaded = fixture_with(f.store.clone(), TerminalConfig::default());

        assert_eq!(reloaded.terminal.output(), f.terminal.output());
        assert_eq!(reloaded.terminal.history(), vec!["ls", "pwd"]);
        assert_eq!(reloaded.terminal.history_cursor(), 2);
        assert_eq!(reloaded.terminal.working_directory(), "/opt");
        assert!(reloaded.terminal.is_initialized());
        assert!(!reloaded.terminal.is_executing());
    }

    #[test]
    fn snapshot_uses_camel_case_keys() {
        let f = fixture();
        f.terminal.note("# hello");
        let raw = f.store.get(TERMINAL_STATE_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("outputLog").is_some());
        assert!(value.get("workingDirectory").is_some());
        assert_eq!(value["initialized"], serde_json::json!(false));
        assert!(value.get("executing").is_none());
    }

    #[test]
    fn fresh_terminal_shows_banner() {
        let f = fixture();
        assert_eq!(
            tagged(&f.terminal),
            vec![
                (SegmentKind::Comment, TerminalConfig::default().welcome_banner),
                (SegmentKind::Prompt, "$ ".to_string()),
            ]
        );
        assert_eq!(f.terminal.working_directory(), "/root");
        assert!(!f.terminal.is_initialized());
    }
}
