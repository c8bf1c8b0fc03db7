//! Control of the managed proxy engine.
//!
//! # Responsibilities
//! - Find running engine instances and eliminate duplicates (newest wins)
//! - Start a fresh engine bound to a loopback admin interface
//! - Hot-reload a new program over the admin interface
//! - Discard programs that are no longer active
//!
//! # Design Decisions
//! - Hot reload is always preferred over restart when an instance exists
//! - A failed reload leaves the previous program active; the engine only
//!   switches once the new program is loaded and selected

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::EngineConfig;
use crate::process::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use crate::process::table::{ProcessHandle, ProcessTable};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{action} failed: {diagnostics}")]
    CommandFailed {
        action: &'static str,
        diagnostics: String,
    },

    #[error("process table error: {0}")]
    Table(#[from] std::io::Error),
}

/// Registry of engine processes.
#[derive(Clone)]
pub struct ProcessRegistry {
    table: Arc<dyn ProcessTable>,
    runner: Arc<dyn CommandRunner>,
    engine: EngineConfig,
}

impl ProcessRegistry {
    pub fn new(
        table: Arc<dyn ProcessTable>,
        runner: Arc<dyn CommandRunner>,
        engine: EngineConfig,
    ) -> Self {
        Self { table, runner, engine }
    }

    /// Running instances, oldest first.
    pub fn list_instances(&self) -> Result<Vec<ProcessHandle>, EngineError> {
        let mut instances = self.table.list(&self.engine.process_name)?;
        instances.sort_by_key(|h| (h.start_time, h.pid));
        Ok(instances)
    }

    pub fn is_running(&self) -> Result<bool, EngineError> {
        Ok(!self.list_instances()?.is_empty())
    }

    pub fn kill(&self, pid: u32) -> Result<(), EngineError> {
        tracing::warn!(pid, "Killing engine process");
        self.table.kill(pid)?;
        Ok(())
    }

    /// Kill the oldest of `instances`, returning it.
    pub fn kill_oldest(
        &self,
        instances: &[ProcessHandle],
    ) -> Result<Option<ProcessHandle>, EngineError> {
        let Some(oldest) = instances.iter().min_by_key(|h| (h.start_time, h.pid)).copied() else {
            return Ok(None);
        };
        self.kill(oldest.pid)?;
        Ok(Some(oldest))
    }

    /// Kill every instance except the most recently started one.
    ///
    /// Returns the instances that were killed.
    pub fn dedupe(&self) -> Result<Vec<ProcessHandle>, EngineError> {
        let mut instances = self.list_instances()?;
        let mut killed = Vec::new();

        while instances.len() > 1 {
            if let Some(oldest) = self.kill_oldest(&instances)? {
                instances.retain(|h| h.pid != oldest.pid);
                killed.push(oldest);
            }
        }

        if !killed.is_empty() {
            tracing::warn!(killed = killed.len(), "Removed duplicate engine instances");
        }
        Ok(killed)
    }

    /// Launch a new engine process serving `config_path`.
    pub async fn start(
        &self,
        config_path: &Path,
        admin_address: &str,
        memory_limit: &str,
        listen_address: &str,
    ) -> Result<CommandOutput, EngineError> {
        let spec = CommandSpec::new(
            &self.engine.daemon,
            [
                "-f".to_string(),
                config_path.display().to_string(),
                "-s".to_string(),
                format!("malloc,{}", memory_limit),
                "-T".to_string(),
                admin_address.to_string(),
                "-a".to_string(),
                listen_address.to_string(),
                "-n".to_string(),
                self.engine.work_dir.display().to_string(),
            ],
            self.engine.command_timeout(),
        );

        tracing::info!(config = ?config_path, listen = %listen_address, "Starting engine");
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                action: "engine start",
                diagnostics: output.error_text(),
            });
        }
        Ok(output)
    }

    /// Load `config_path` into the running engine as `program_name` and make
    /// it the active program. Connections and the listen socket are kept.
    pub async fn hot_reload(
        &self,
        config_path: &Path,
        admin_address: &str,
        program_name: &str,
    ) -> Result<(), EngineError> {
        let timeout = self.engine.command_timeout();

        let load = CommandSpec::new(
            &self.engine.admin_binary,
            [
                "-T".to_string(),
                admin_address.to_string(),
                "vcl.load".to_string(),
                program_name.to_string(),
                config_path.display().to_string(),
            ],
            timeout,
        );
        let output = self.runner.run(&load).await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                action: "program load",
                diagnostics: output.error_text(),
            });
        }

        let activate = CommandSpec::new(
            &self.engine.admin_binary,
            ["-T", admin_address, "vcl.use", program_name],
            timeout,
        );
        let output = self.runner.run(&activate).await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                action: "program activation",
                diagnostics: output.error_text(),
            });
        }

        tracing::info!(program = %program_name, "Engine program reloaded");
        Ok(())
    }

    /// Unload an inactive program from the running engine.
    pub async fn discard(&self, admin_address: &str, program_name: &str) -> Result<(), EngineError> {
        let spec = CommandSpec::new(
            &self.engine.admin_binary,
            ["-T", admin_address, "vcl.discard", program_name],
            self.engine.command_timeout(),
        );
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                action: "program discard",
                diagnostics: output.error_text(),
            });
        }

        tracing::debug!(program = %program_name, "Engine program discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StaticTable {
        procs: Mutex<Vec<ProcessHandle>>,
        killed: Mutex<Vec<u32>>,
    }

    impl ProcessTable for StaticTable {
        fn list(&self, _name: &str) -> io::Result<Vec<ProcessHandle>> {
            Ok(self.procs.lock().unwrap().clone())
        }

        fn kill(&self, pid: u32) -> io::Result<()> {
            self.procs.lock().unwrap().retain(|h| h.pid != pid);
            self.killed.lock().unwrap().push(pid);
            Ok(())
        }
    }

    struct ScriptedRunner {
        calls: Mutex<Vec<CommandSpec>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(spec.clone());
            let failed = self
                .fail_on
                .map(|verb| spec.args.iter().any(|a| a == verb))
                .unwrap_or(false);
            Ok(CommandOutput {
                exit_code: Some(if failed { 1 } else { 0 }),
                stdout: String::new(),
                stderr: if failed { "VCL compilation failed".to_string() } else { String::new() },
            })
        }
    }

    fn registry(
        procs: Vec<ProcessHandle>,
        fail_on: Option<&'static str>,
    ) -> (ProcessRegistry, Arc<StaticTable>, Arc<ScriptedRunner>) {
        let table = Arc::new(StaticTable {
            procs: Mutex::new(procs),
            killed: Mutex::new(Vec::new()),
        });
        let runner = Arc::new(ScriptedRunner {
            calls: Mutex::new(Vec::new()),
            fail_on,
        });
        let registry = ProcessRegistry::new(table.clone(), runner.clone(), EngineConfig::default());
        (registry, table, runner)
    }

    fn handle(pid: u32, start_time: u64) -> ProcessHandle {
        ProcessHandle { pid, start_time }
    }

    #[test]
    fn test_dedupe_keeps_newest() {
        let (registry, table, _) =
            registry(vec![handle(10, 300), handle(11, 100), handle(12, 200)], None);

        let killed = registry.dedupe().unwrap();
        assert_eq!(killed.len(), 2);
        assert_eq!(*table.killed.lock().unwrap(), vec![11, 12]);
        assert_eq!(registry.list_instances().unwrap(), vec![handle(10, 300)]);
    }

    #[test]
    fn test_kill_oldest_empty() {
        let (registry, _, _) = registry(Vec::new(), None);
        assert_eq!(registry.kill_oldest(&[]).unwrap(), None);
    }

    #[tokio::test]
    async fn test_start_arguments() {
        let (registry, _, runner) = registry(Vec::new(), None);
        registry
            .start(&PathBuf::from("/active/varnish.vcl"), "127.0.0.1:2000", "1G", "0.0.0.0:80")
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].program, "varnishd");
        assert_eq!(
            calls[0].args,
            vec![
                "-f", "/active/varnish.vcl", "-s", "malloc,1G", "-T", "127.0.0.1:2000", "-a",
                "0.0.0.0:80", "-n", "/var/lib/varnish"
            ]
        );
    }

    #[tokio::test]
    async fn test_hot_reload_loads_then_uses() {
        let (registry, _, runner) = registry(vec![handle(1, 1)], None);
        registry
            .hot_reload(&PathBuf::from("/active/varnish.vcl"), "127.0.0.1:2000", "main_3")
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].args.contains(&"vcl.load".to_string()));
        assert_eq!(calls[1].args, vec!["-T", "127.0.0.1:2000", "vcl.use", "main_3"]);
    }

    #[tokio::test]
    async fn test_discard_arguments() {
        let (registry, _, runner) = registry(vec![handle(1, 1)], None);
        registry.discard("127.0.0.1:2000", "main_2").await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].program, "varnishadm");
        assert_eq!(calls[0].args, vec!["-T", "127.0.0.1:2000", "vcl.discard", "main_2"]);
    }

    #[tokio::test]
    async fn test_failed_discard_is_an_error() {
        let (registry, _, _) = registry(vec![handle(1, 1)], Some("vcl.discard"));
        let err = registry.discard("127.0.0.1:2000", "main_2").await.unwrap_err();
        assert!(matches!(err, EngineError::CommandFailed { action: "program discard", .. }));
    }

    #[tokio::test]
    async fn test_failed_load_skips_activation() {
        let (registry, _, runner) = registry(vec![handle(1, 1)], Some("vcl.load"));
        let err = registry
            .hot_reload(&PathBuf::from("/active/varnish.vcl"), "127.0.0.1:2000", "main_4")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("VCL compilation failed"));
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }
}
