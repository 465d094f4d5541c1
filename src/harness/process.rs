use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tracing::debug;

/// Delay between forwarding a termination signal and force-killing.
pub const KILL_GRACE: Duration = Duration::from_millis(1500);

/// Signals the harness sends to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    /// Raw signal number.
    pub fn number(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Process group led by the spawned child. The child is started with
/// `process_group(0)`, so its pid is also the group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    leader: i32,
}

impl ProcessGroup {
    /// Group for a child pid; `None` when the child already exited.
    pub fn from_pid(pid: Option<u32>) -> Option<Self> {
        let leader = i32::try_from(pid?).ok()?;
        (leader > 0).then_some(Self { leader })
    }

    /// Leader pid.
    pub fn leader(&self) -> i32 {
        self.leader
    }

    /// Signal the whole group, falling back to the leader alone.
    pub fn signal(&self, signal: Signal) -> io::Result<()> {
        // SAFETY: kill(2) takes plain integers and touches no memory.
        if unsafe { libc::kill(-self.leader, signal.number()) } == 0 {
            return Ok(());
        }
        debug!(
            pgid = self.leader,
            error = %io::Error::last_os_error(),
            "group signal failed, signalling leader"
        );
        // SAFETY: as above.
        if unsafe { libc::kill(self.leader, signal.number()) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Exit code, or `128 + signo` when the process was killed by a signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signo)) => 128 + signo,
        (None, None) => 1,
    }
}
