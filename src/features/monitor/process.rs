use std::time::Duration;

#[cfg(unix)]
use nix::{
    errno::Errno,
    sys::signal::{self, killpg, Signal},
    unistd::{getpgid, Pid},
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 1 {
        return false;
    }
    // EPERM still means the process exists.
    matches!(signal::kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

/// Process group leaders are signalled as a group so their children go too.
#[cfg(unix)]
fn send(pid: i32, sig: Signal) -> bool {
    let nix_pid = Pid::from_raw(pid);
    let is_group_leader = getpgid(Some(nix_pid)).ok() == Some(nix_pid);
    let result = if is_group_leader {
        killpg(nix_pid, sig).or_else(|_| signal::kill(nix_pid, sig))
    } else {
        signal::kill(nix_pid, sig)
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to send {} to PID {}: {}", sig, pid, e);
            false
        }
    }
}

#[cfg(unix)]
pub fn request_stop(pid: i32) -> bool {
    pid > 1 && send(pid, Signal::SIGTERM)
}

#[cfg(not(unix))]
pub fn request_stop(pid: i32) -> bool {
    log::warn!("Cannot signal PID {} on this platform", pid);
    false
}

#[cfg(unix)]
pub fn force_stop(pid: i32) -> bool {
    pid > 1 && send(pid, Signal::SIGKILL)
}

#[cfg(not(unix))]
pub fn force_stop(_pid: i32) -> bool {
    false
}

/// SIGKILLs every member of process group `pgid`, even after its leader
/// has been reaped. Returns whether any member was signalled.
#[cfg(unix)]
pub fn kill_group(pgid: i32) -> bool {
    if pgid <= 1 {
        return false;
    }
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            log::warn!("Failed to kill process group {}: {}", pgid, e);
            false
        }
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pgid: i32) -> bool {
    false
}

/// Stops a process this program did not spawn: SIGTERM, poll for up to
/// `grace`, then SIGKILL. Returns whether the process is gone.
pub async fn terminate(pid: i32, grace: Duration) -> bool {
    if !is_alive(pid) {
        return true;
    }
    if !request_stop(pid) {
        return !is_alive(pid);
    }

    let polls = (grace.as_millis() / POLL_INTERVAL.as_millis()).max(1);
    for _ in 0..polls {
        tokio::time::sleep(POLL_INTERVAL).await;
        if !is_alive(pid) {
            log::debug!("PID {} exited after SIGTERM", pid);
            return true;
        }
    }

    log::warn!("PID {} still alive after {:?}, sending SIGKILL", pid, grace);
    force_stop(pid);
    tokio::time::sleep(POLL_INTERVAL * 5).await;
    !is_alive(pid)
}
