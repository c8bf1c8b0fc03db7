//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use zip::write::SimpleFileOptions;

use proxy_config_sync::config::{InstanceRole, SyncConfig};
use proxy_config_sync::process::{
    CommandError, CommandOutput, CommandRunner, CommandSpec, ProcessHandle, ProcessTable,
};
use proxy_config_sync::store::MemoryConfigStore;
use proxy_config_sync::SyncController;

/// Marker that makes the fake engine reject a program.
pub const INVALID_MARKER: &str = "INVALID";

#[derive(Default)]
struct EngineState {
    procs: Vec<ProcessHandle>,
    next_pid: u32,
    clock: u64,
    /// Programs loaded over the admin interface, by name.
    loaded: Vec<(String, String)>,
    /// Program text the engine is serving.
    served: Option<String>,
    commands: Vec<CommandSpec>,
    checks: usize,
    starts: usize,
    reloads: usize,
    discards: usize,
    fail_start: bool,
    fail_reload: bool,
    fail_discard: bool,
    /// Program selected with `vcl.use`.
    active: Option<String>,
    check_delay: Option<Duration>,
}

/// In-memory proxy engine: a process table plus the engine and admin
/// binaries. Programs containing [`INVALID_MARKER`] fail to compile.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pretend an engine was already running before the controller started.
    pub fn spawn_instance(&self, program: &str) -> ProcessHandle {
        let mut state = self.state.lock().unwrap();
        let handle = Self::add_process(&mut state);
        state.served = Some(program.to_string());
        handle
    }

    /// Kill every engine process.
    pub fn crash(&self) {
        let mut state = self.state.lock().unwrap();
        state.procs.clear();
        state.served = None;
        state.loaded.clear();
        state.active = None;
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn set_fail_reload(&self, fail: bool) {
        self.state.lock().unwrap().fail_reload = fail;
    }

    pub fn set_check_delay(&self, delay: Duration) {
        self.state.lock().unwrap().check_delay = Some(delay);
    }

    pub fn served(&self) -> Option<String> {
        self.state.lock().unwrap().served.clone()
    }

    pub fn instances(&self) -> Vec<ProcessHandle> {
        self.state.lock().unwrap().procs.clone()
    }

    pub fn checks(&self) -> usize {
        self.state.lock().unwrap().checks
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn reloads(&self) -> usize {
        self.state.lock().unwrap().reloads
    }

    pub fn discards(&self) -> usize {
        self.state.lock().unwrap().discards
    }

    /// Names of the programs currently loaded over the admin interface.
    pub fn loaded_programs(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.loaded.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn set_fail_discard(&self, fail: bool) {
        self.state.lock().unwrap().fail_discard = fail;
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().commands.clone()
    }

    fn add_process(state: &mut EngineState) -> ProcessHandle {
        state.next_pid += 1;
        state.clock += 10;
        let handle = ProcessHandle {
            pid: 1000 + state.next_pid,
            start_time: state.clock,
        };
        state.procs.push(handle);
        handle
    }

    fn exit(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn check(path: &str) -> CommandOutput {
        match std::fs::read_to_string(path) {
            Ok(text) if !text.contains(INVALID_MARKER) => Self::exit(0, ""),
            Ok(_) => Self::exit(2, "Message from VCC-compiler:\nSyntax error"),
            Err(e) => Self::exit(2, &format!("Cannot read -f file {}: {}", path, e)),
        }
    }

    fn start(&self, path: &str) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        if state.fail_start {
            return Self::exit(2, "Error: Could not get socket :80: Address already in use");
        }
        match std::fs::read_to_string(path) {
            Ok(text) => {
                Self::add_process(&mut state);
                state.served = Some(text);
                Self::exit(0, "")
            }
            Err(e) => Self::exit(2, &format!("Cannot read -f file {}: {}", path, e)),
        }
    }

    fn admin(&self, args: &[String]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        if state.procs.is_empty() {
            return Self::exit(2, "Connection failed (127.0.0.1:2000)");
        }
        match args.get(2).map(String::as_str) {
            Some("vcl.load") => {
                state.reloads += 1;
                let (name, path) = (args[3].clone(), args[4].clone());
                let text = std::fs::read_to_string(&path).unwrap_or_default();
                if state.fail_reload || text.contains(INVALID_MARKER) {
                    return Self::exit(1, "VCL compilation failed");
                }
                state.loaded.push((name, text));
                Self::exit(0, "VCL compiled.")
            }
            Some("vcl.use") => {
                let name = &args[3];
                let text = state
                    .loaded
                    .iter()
                    .find(|(loaded, _)| loaded == name)
                    .map(|(_, text)| text.clone());
                match text {
                    Some(text) => {
                        state.served = Some(text);
                        state.active = Some(name.clone());
                        Self::exit(0, &format!("VCL '{}' now active", name))
                    }
                    None => Self::exit(1, &format!("No VCL named {} known.", name)),
                }
            }
            Some("vcl.discard") => {
                state.discards += 1;
                let name = args[3].clone();
                if state.fail_discard {
                    return Self::exit(1, "Could not discard");
                }
                if state.active.as_deref() == Some(name.as_str()) {
                    return Self::exit(1, &format!("Cannot discard active VCL program {}", name));
                }
                let before = state.loaded.len();
                state.loaded.retain(|(loaded, _)| *loaded != name);
                if state.loaded.len() == before {
                    return Self::exit(1, &format!("No VCL named {} known.", name));
                }
                Self::exit(0, "")
            }
            _ => Self::exit(1, "Unknown request"),
        }
    }
}

impl ProcessTable for FakeEngine {
    fn list(&self, _name: &str) -> std::io::Result<Vec<ProcessHandle>> {
        Ok(self.state.lock().unwrap().procs.clone())
    }

    fn kill(&self, pid: u32) -> std::io::Result<()> {
        self.state.lock().unwrap().procs.retain(|h| h.pid != pid);
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for FakeEngine {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.commands.push(spec.clone());
            state.check_delay
        };

        match (spec.program.as_str(), spec.args.first().map(String::as_str)) {
            ("varnishd", Some("-C")) => {
                self.state.lock().unwrap().checks += 1;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(Self::check(&spec.args[2]))
            }
            ("varnishd", Some("-f")) => Ok(self.start(&spec.args[1])),
            ("varnishadm", _) => Ok(self.admin(&spec.args)),
            _ => Err(CommandError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"),
            }),
        }
    }
}

/// Log events recorded on the current thread, as `(level, message)`.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    /// Record events emitted on this thread until the guard is dropped.
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn count(&self, level: Level, message: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, m)| *l == level && m == message)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

/// Build a zip archive in memory.
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// An archive whose program identifies itself with `tag`.
pub fn program_archive(tag: &str) -> Vec<u8> {
    zip_archive(&[
        ("varnish.vcl", &format!("vcl 4.0;\n# {}\nbackend default {{ .host = \"10.0.0.1\"; }}\n", tag)),
        ("certs/edge.pem", "-----BEGIN CERTIFICATE-----"),
    ])
}

/// An archive the fake engine refuses to compile.
pub fn invalid_archive() -> Vec<u8> {
    zip_archive(&[("varnish.vcl", "vcl 4.0;\nINVALID {\n")])
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: SyncConfig,
    pub store: MemoryConfigStore,
    pub engine: Arc<FakeEngine>,
    pub controller: Arc<SyncController>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(role: InstanceRole) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), role);
        let store = MemoryConfigStore::new();
        let engine = FakeEngine::new();
        let cancel = CancellationToken::new();
        let controller = Arc::new(SyncController::new(
            &config,
            Arc::new(store.clone()),
            engine.clone(),
            engine.clone(),
            cancel.clone(),
        ));
        Self { dir, config, store, engine, controller, cancel }
    }

    pub fn active_program(&self) -> String {
        std::fs::read_to_string(self.config.staging.active_dir.join("varnish.vcl")).unwrap()
    }
}

pub fn test_config(root: &Path, role: InstanceRole) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.controller.role = role;
    config.controller.poll_interval_secs = 3600;
    config.controller.error_report_interval_secs = 3600;
    config.staging.active_dir = root.join("active");
    config.staging.staging_dir = root.join("staging");
    config.engine.work_dir = root.join("work");
    config
}
