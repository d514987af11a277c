//! Graceful child termination: SIGTERM, a bounded wait, then SIGKILL.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

const GRACE_PERIOD: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Send SIGTERM to `pid`, wait up to 10 seconds for it to exit, then
/// SIGKILL. PID 0/1 and negative PIDs are never targeted.
pub async fn graceful_kill(pid: i32) {
    if pid <= 1 {
        warn!(pid, "refusing to signal protected pid");
        return;
    }

    let target = Pid::from_raw(pid);

    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) => debug!(pid, "sent SIGTERM"),
        Err(Errno::ESRCH) => return, // already gone
        Err(e) => {
            warn!(pid, error = %e, "SIGTERM failed");
            return;
        }
    }

    let deadline = tokio::time::Instant::now() + GRACE_PERIOD;
    while tokio::time::Instant::now() < deadline {
        // Signal 0 probes liveness without delivering anything.
        match signal::kill(target, None) {
            Err(Errno::ESRCH) => return,
            Ok(()) | Err(_) => {}
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    warn!(pid, "grace period expired, sending SIGKILL");
    if let Err(e) = signal::kill(target, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            warn!(pid, error = %e, "SIGKILL failed");
        }
    }
}
