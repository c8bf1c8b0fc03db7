//! OS process enumeration and termination.

use std::fs;
use std::io;
use std::path::Path;

/// A running engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub pid: u32,
    /// Start time in clock ticks since boot; larger is newer.
    pub start_time: u64,
}

/// Lists and kills processes by name.
pub trait ProcessTable: Send + Sync {
    fn list(&self, name: &str) -> io::Result<Vec<ProcessHandle>>;

    /// Kill a process. A process that is already gone is not an error.
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// Kernel truncates `comm` to 15 bytes.
const COMM_LEN: usize = 15;

/// Reads `/proc` to find processes; kills with SIGKILL.
#[derive(Debug, Clone, Default)]
pub struct ProcFsTable;

impl ProcFsTable {
    fn read_handle(proc_dir: &Path, name: &str) -> Option<ProcessHandle> {
        let pid: u32 = proc_dir.file_name()?.to_str()?.parse().ok()?;

        let comm = fs::read_to_string(proc_dir.join("comm")).ok()?;
        let wanted = &name.as_bytes()[..name.len().min(COMM_LEN)];
        if comm.trim_end().as_bytes() != wanted {
            return None;
        }

        let stat = fs::read_to_string(proc_dir.join("stat")).ok()?;
        let start_time = parse_start_time(&stat)?;
        Some(ProcessHandle { pid, start_time })
    }
}

/// Extract field 22 (`starttime`) from `/proc/<pid>/stat`.
///
/// The command name (field 2) may contain spaces and parentheses, so fields
/// are counted from the last `)`.
pub fn parse_start_time(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    // `rest` starts at field 3 (state).
    rest.split_whitespace().nth(22 - 3)?.parse().ok()
}

impl ProcessTable for ProcFsTable {
    fn list(&self, name: &str) -> io::Result<Vec<ProcessHandle>> {
        let mut handles = Vec::new();
        for entry in fs::read_dir("/proc")? {
            // Processes come and go while scanning.
            let Ok(entry) = entry else { continue };
            if let Some(handle) = Self::read_handle(&entry.path(), name) {
                handles.push(handle);
            }
        }
        handles.sort_by_key(|h| (h.start_time, h.pid));
        Ok(handles)
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self, pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot kill pid {} on this platform", pid),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_time() {
        let stat = "4242 (varnishd) S 1 4242 4242 0 -1 4194624 1234 0 0 0 12 7 0 0 20 0 3 0 987654 123456789 2000";
        assert_eq!(parse_start_time(stat), Some(987654));
    }

    #[test]
    fn test_parse_start_time_with_odd_comm() {
        let stat = "77 (cache (worker) 1) R 1 77 77 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 555 0 0";
        assert_eq!(parse_start_time(stat), Some(555));
    }

    #[test]
    fn test_parse_start_time_truncated() {
        assert_eq!(parse_start_time("12 (x) S 1 2"), None);
        assert_eq!(parse_start_time("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lists_nothing_for_unknown_name() {
        let handles = ProcFsTable.list("no-such-engine").unwrap();
        assert!(handles.is_empty());
    }
}
