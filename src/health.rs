/// Liveness checks for a spawned producer.
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ExitStatus};

/// Result of a single non-blocking liveness query.
#[derive(Debug)]
pub enum Liveness {
    Alive,
    /// The process is gone (or its state could not be queried).
    Dead {
        /// `None` when the state query itself failed.
        status: Option<ExitStatus>,
        /// Whatever the process left on its standard error.
        stderr: String,
    },
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }

    /// One-line description of a dead process, for failure logs.
    pub fn reason(&self) -> String {
        match self {
            Liveness::Alive => "running".to_string(),
            Liveness::Dead { status, stderr } => {
                let rc = match status.and_then(|s| s.code()) {
                    Some(code) => code.to_string(),
                    None => "n/a".to_string(),
                };
                format!("exited RC={rc}, REASON: {}", stderr.trim())
            }
        }
    }
}

/// Query `child` without blocking.
///
/// On exit the remaining stderr (if the pipe is still attached) is drained and
/// logged. A failed query counts as dead.
pub fn check(child: &mut Child) -> Liveness {
    let pid = child.id();
    match child.try_wait() {
        Ok(None) => Liveness::Alive,
        Ok(Some(status)) => {
            let stderr = drain_stderr(child);
            tracing::error!(
                pid,
                exit_code = ?status.code(),
                stderr = %stderr.trim(),
                "producer process was found stale"
            );
            Liveness::Dead {
                status: Some(status),
                stderr,
            }
        }
        Err(e) => {
            tracing::error!(pid, error = %e, "failed to query producer process state");
            Liveness::Dead {
                status: None,
                stderr: String::new(),
            }
        }
    }
}

/// `true` while `child` has not exited.
pub fn is_alive(child: &mut Child) -> bool {
    check(child).is_alive()
}

/// Put `fd` into `O_NONBLOCK` mode.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Collect only what is already sitting in the stderr pipe. A grandchild that
/// inherited stderr can keep the pipe open long after the producer exited.
fn drain_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    if let Err(e) = set_nonblocking(stderr.as_raw_fd()) {
        tracing::debug!(error = %e, "failed to make producer stderr non-blocking");
        return String::new();
    }

    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                tracing::debug!(error = %e, "failed to read producer stderr");
                break;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
