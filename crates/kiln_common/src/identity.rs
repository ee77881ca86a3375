//! Run, worker, and lock-owner identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Identifies one orchestrated run (e.g. one CI job).
///
/// Slots that failed under the current run are reported rather than rebuilt;
/// failures recorded by an earlier run may be superseded.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Creates a run id from an explicit value (e.g. a CI job id).
    pub fn new(id: impl Into<String>) -> Self {
        Self(sanitize(&id.into()))
    }

    /// Generates a fresh run id from the current time and a random suffix.
    pub fn generate() -> Self {
        let secs = unix_now();
        Self(format!("run-{secs}-{:08x}", rand::random::<u32>()))
    }

    /// Returns the run id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one worker (test process, thread, or MPI rank).
///
/// The id always embeds the process id and a random nonce, so two workers
/// never share an isolated namespace even when they are given the same label.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a worker id from a human label such as `gw3` or `rank0`.
    pub fn new(label: &str) -> Self {
        let label = sanitize(label);
        let label = if label.is_empty() {
            "worker".to_string()
        } else {
            label
        };
        Self(format!(
            "{label}.{}.{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ))
    }

    /// Recreates a worker id from its string form (e.g. a directory name).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the worker id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The owner recorded in a populate lock.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct OwnerId {
    /// Host the owning process runs on.
    pub host: String,
    /// OS process id of the owner.
    pub pid: u32,
    /// Worker within the process.
    pub worker: WorkerId,
    /// Run the owner belongs to.
    pub run: RunId,
}

impl OwnerId {
    /// Builds the owner identity for the current process.
    pub fn current(worker: WorkerId, run: RunId) -> Self {
        Self {
            host: hostname(),
            pid: std::process::id(),
            worker,
            run,
        }
    }

    /// Returns whether the owner is known to be dead.
    ///
    /// Only owners on this host can be checked; remote owners are never
    /// reported dead and fall back to the lock age bound.
    pub fn is_known_dead(&self) -> bool {
        self.host == hostname() && !is_pid_alive(self.pid)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{} ({})", self.worker, self.host, self.pid, self.run)
    }
}

/// Returns the current host name, or `localhost` if it cannot be determined.
///
/// The name comes from the OS, never from the environment, so every process
/// on a host agrees on it.
pub fn hostname() -> String {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        system_hostname()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
    .clone()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Checks whether a process exists using `kill(pid, 0)`.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: signal 0 performs existence and permission checks only.
        let result = unsafe { libc::kill(pid_i32, 0) };
        if result == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid_i32;
        true
    }
}

/// Keeps only characters that are safe in file names.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
