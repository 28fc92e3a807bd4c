//! Platform process-tree termination
//!
//! Unix signals the whole process group (every child runs in its own group),
//! falling back to the single pid when the group signal is rejected. Windows
//! uses `taskkill /T`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Termination signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KillSignal {
    Term,
    Kill,
    Int,
    Hup,
}

impl KillSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSignal::Term => "SIGTERM",
            KillSignal::Kill => "SIGKILL",
            KillSignal::Int => "SIGINT",
            KillSignal::Hup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    fn raw(&self) -> libc::c_int {
        match self {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
            KillSignal::Int => libc::SIGINT,
            KillSignal::Hup => libc::SIGHUP,
        }
    }
}

impl std::fmt::Display for KillSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a raw signal number, as reported by `ExitStatus::signal()`
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        6 => "SIGABRT",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        other => return format!("SIG{}", other),
    };
    name.to_string()
}

/// OS-specific termination and liveness probing
pub trait PlatformKiller: Send + Sync {
    fn name(&self) -> &str;

    /// Signal a process and its descendants; false if nothing was signalled
    fn kill_tree(&self, pid: u32, signal: KillSignal) -> bool;

    /// Zero-signal style liveness probe
    fn is_alive(&self, pid: u32) -> bool;
}

/// The killer for the host OS
pub fn native_killer() -> Box<dyn PlatformKiller> {
    #[cfg(unix)]
    {
        Box::new(UnixKiller)
    }
    #[cfg(windows)]
    {
        Box::new(WindowsKiller)
    }
}

// ============================================================================
// Unix
// ============================================================================

#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixKiller;

#[cfg(unix)]
impl PlatformKiller for UnixKiller {
    fn name(&self) -> &str {
        "unix"
    }

    fn kill_tree(&self, pid: u32, signal: KillSignal) -> bool {
        // pid 0 / overflow would address our own group or every process
        let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if raw_pid <= 0 {
            return false;
        }

        // SAFETY: plain syscall on a positive pid, no memory involved
        if unsafe { libc::killpg(raw_pid, signal.raw()) } == 0 {
            debug!(pid, signal = %signal, "Signalled process group");
            return true;
        }

        let group_err = std::io::Error::last_os_error();
        debug!(pid, error = %group_err, "Group signal rejected, falling back to pid");

        // SAFETY: as above
        if unsafe { libc::kill(raw_pid, signal.raw()) } == 0 {
            return true;
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, signal = %signal, error = %err, "Failed to signal process");
        }
        false
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if raw_pid <= 0 {
            return false;
        }

        // SAFETY: signal 0 only performs the permission/existence check
        if unsafe { libc::kill(raw_pid, 0) } == 0 {
            return true;
        }
        // EPERM: exists but belongs to someone else
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

// ============================================================================
// Windows
// ============================================================================

#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsKiller;

#[cfg(windows)]
impl PlatformKiller for WindowsKiller {
    fn name(&self) -> &str {
        "windows"
    }

    fn kill_tree(&self, pid: u32, signal: KillSignal) -> bool {
        let pid_arg = pid.to_string();
        let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
        // No graceful signal on Windows; only SIGKILL maps to /F
        if signal == KillSignal::Kill {
            args.push("/F");
        }

        match std::process::Command::new("taskkill")
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(e) => {
                warn!(pid, error = %e, "taskkill failed to start");
                false
            }
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let filter = format!("PID eq {}", pid);
        match std::process::Command::new("tasklist")
            .args(["/FI", filter.as_str(), "/NH"])
            .output()
        {
            Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(42), "SIG42");
        assert_eq!(KillSignal::Hup.to_string(), "SIGHUP");
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_probe_and_kill() {
        let killer = UnixKiller;
        assert!(killer.is_alive(std::process::id()));
        assert!(!killer.kill_tree(0, KillSignal::Kill));
        assert!(!killer.is_alive(0));

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(killer.is_alive(pid));

        // not a group leader, so this exercises the single-pid fallback
        assert!(killer.kill_tree(pid, KillSignal::Kill));
        child.wait().unwrap();
        assert!(!killer.is_alive(pid));
    }
}
