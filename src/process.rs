//! Uniform handle over the two ways a worker can be launched.
//!
//! An exec'd program is tracked through [`std::process::Child`]; a worker forked
//! from the supervising process is tracked by its raw pid and reaped with
//! `waitpid`. Both expose the same poll / wait / terminate capability set so the
//! [`Manager`](crate::manager::Manager) never needs to know which one it owns.
use std::{
    ffi::CString,
    io,
    os::unix::process::{CommandExt, ExitStatusExt},
    panic::{self, AssertUnwindSafe},
    process::{Child, Command, ExitStatus},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{self, ForkResult, Pid},
};
use tracing::{debug, error, warn};

use crate::{
    constants::{
        FORKED_PANIC_EXIT_CODE, PROCESS_CHECK_INTERVAL, STDERR_DRAIN_TIMEOUT,
        STDERR_TAIL_LINES,
    },
    logs::OutputTail,
};

/// Observed state of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// The process is gone. `None` when the OS could not report how it ended.
    Exited(Option<ExitStatus>),
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            ProcessStatus::Running => None,
            ProcessStatus::Exited(status) => *status,
        }
    }
}

/// A live worker process, independent of how it was launched.
pub enum ProcessHandle {
    /// Program started through [`Command`].
    Spawned(SpawnedProcess),
    /// Copy of the supervising process created with `fork`.
    Forked(ForkedProcess),
}

/// Worker launched by exec'ing an external program.
pub struct SpawnedProcess {
    label: String,
    child: Child,
    exited: bool,
    status: Option<ExitStatus>,
    stderr: Option<OutputTail>,
}

/// Worker running in a forked copy of the supervising process.
pub struct ForkedProcess {
    label: String,
    pid: Pid,
    exited: bool,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Spawns `command` as a worker.
    ///
    /// The child is placed in its own process group so termination reaches any
    /// helpers it starts, and on Linux it receives `SIGTERM` if the supervisor
    /// dies. If the command's stderr is piped it is drained into a bounded tail
    /// that becomes available through [`ProcessHandle::stderr_output`].
    pub fn spawn(label: &str, command: &mut Command) -> io::Result<Self> {
        debug!("Launching worker '{label}': {command:?}");

        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }

                #[cfg(target_os = "linux")]
                {
                    if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM, 0, 0, 0) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }

                Ok(())
            });
        }

        let mut child = command.spawn().inspect_err(|err| {
            error!("Failed to launch worker '{label}': {err}");
        })?;

        let stderr = child
            .stderr
            .take()
            .map(|stream| OutputTail::capture(label, stream, STDERR_TAIL_LINES));

        debug!("Worker '{label}' started with PID {}", child.id());

        Ok(ProcessHandle::Spawned(SpawnedProcess {
            label: label.to_string(),
            child,
            exited: false,
            status: None,
            stderr,
        }))
    }

    /// Forks the current process and runs `body` in the child.
    ///
    /// The child joins its own process group, asks for `SIGTERM` on supervisor
    /// death (Linux), optionally renames itself to `process_name`, and exits with
    /// the value `body` returns. It never returns into the caller's code.
    ///
    /// # Safety
    ///
    /// In a multi-threaded program only the calling thread exists in the child.
    /// `body` must not depend on locks or state owned by other threads.
    pub unsafe fn fork<F>(label: &str, process_name: Option<&str>, body: F) -> io::Result<Self>
    where
        F: FnOnce() -> i32,
    {
        let title = process_name.and_then(|name| CString::new(name).ok());

        match unsafe { unistd::fork() }.map_err(io::Error::from)? {
            ForkResult::Parent { child } => {
                debug!("Worker '{label}' forked with PID {child}");
                Ok(ProcessHandle::Forked(ForkedProcess {
                    label: label.to_string(),
                    pid: child,
                    exited: false,
                    status: None,
                }))
            }
            ForkResult::Child => {
                unsafe {
                    libc::setpgid(0, 0);

                    #[cfg(target_os = "linux")]
                    {
                        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM, 0, 0, 0);
                        if let Some(title) = &title {
                            libc::prctl(
                                libc::PR_SET_NAME,
                                title.as_ptr() as libc::c_ulong,
                                0,
                                0,
                                0,
                            );
                        }
                    }
                }

                let code = panic::catch_unwind(AssertUnwindSafe(body))
                    .unwrap_or(FORKED_PANIC_EXIT_CODE);
                unsafe { libc::_exit(code) }
            }
        }
    }

    pub fn pid(&self) -> u32 {
        match self {
            ProcessHandle::Spawned(process) => process.child.id(),
            ProcessHandle::Forked(process) => process.pid.as_raw() as u32,
        }
    }

    /// Label used in log lines for this worker.
    pub fn label(&self) -> &str {
        match self {
            ProcessHandle::Spawned(process) => &process.label,
            ProcessHandle::Forked(process) => &process.label,
        }
    }

    /// Non-blocking status check. Never fails once the worker has exited.
    pub fn poll(&mut self) -> ProcessStatus {
        match self {
            ProcessHandle::Spawned(process) => process.poll(),
            ProcessHandle::Forked(process) => process.poll(),
        }
    }

    /// Blocks until the worker exits. Calling it again returns the same status.
    pub fn wait(&mut self) -> Option<ExitStatus> {
        match self {
            ProcessHandle::Spawned(process) => process.wait(),
            ProcessHandle::Forked(process) => process.wait(),
        }
    }

    /// Polls until the worker exits or `timeout` elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> ProcessStatus {
        let deadline = Instant::now() + timeout;

        loop {
            let status = self.poll();
            if !status.is_running() || Instant::now() >= deadline {
                return status;
            }
            thread::sleep(PROCESS_CHECK_INTERVAL);
        }
    }

    /// Requests termination with `SIGTERM`. Does not wait for the exit.
    pub fn terminate(&mut self) {
        self.deliver(Signal::SIGTERM);
    }

    /// Forcefully stops the worker with `SIGKILL`. Does not wait for the exit.
    pub fn kill(&mut self) {
        self.deliver(Signal::SIGKILL);
    }

    /// Captured standard error, if the worker's stderr was piped.
    pub fn stderr_output(&self) -> Option<String> {
        match self {
            ProcessHandle::Spawned(process) => process
                .stderr
                .as_ref()
                .and_then(|tail| tail.finish(STDERR_DRAIN_TIMEOUT)),
            ProcessHandle::Forked(_) => None,
        }
    }

    fn deliver(&mut self, signal: Signal) {
        let (label, pid, exited) = match self {
            ProcessHandle::Spawned(process) => (
                process.label.as_str(),
                Pid::from_raw(process.child.id() as i32),
                process.exited,
            ),
            ProcessHandle::Forked(process) => {
                (process.label.as_str(), process.pid, process.exited)
            }
        };

        if exited {
            return;
        }
        send_signal(label, pid, signal);
    }
}

impl SpawnedProcess {
    fn record(&mut self, status: Option<ExitStatus>) -> ProcessStatus {
        self.exited = true;
        self.status = status;
        ProcessStatus::Exited(status)
    }

    fn poll(&mut self) -> ProcessStatus {
        if self.exited {
            return ProcessStatus::Exited(self.status);
        }

        match self.child.try_wait() {
            Ok(Some(status)) => self.record(Some(status)),
            Ok(None) => ProcessStatus::Running,
            Err(err) => {
                warn!("Failed to query worker '{}': {err}", self.label);
                self.record(None)
            }
        }
    }

    fn wait(&mut self) -> Option<ExitStatus> {
        if self.exited {
            return self.status;
        }

        match self.child.wait() {
            Ok(status) => self.record(Some(status)).exit_status(),
            Err(err) => {
                warn!("Failed to wait for worker '{}': {err}", self.label);
                self.record(None).exit_status()
            }
        }
    }
}

impl ForkedProcess {
    fn record(&mut self, status: Option<ExitStatus>) -> ProcessStatus {
        self.exited = true;
        self.status = status;
        ProcessStatus::Exited(status)
    }

    fn poll(&mut self) -> ProcessStatus {
        if self.exited {
            return ProcessStatus::Exited(self.status);
        }

        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => match decode_wait_status(status) {
                Some(exit) => self.record(Some(exit)),
                None => ProcessStatus::Running,
            },
            Err(Errno::EINTR) => ProcessStatus::Running,
            Err(err) => {
                warn!("Failed to query worker '{}': {err}", self.label);
                self.record(None)
            }
        }
    }

    fn wait(&mut self) -> Option<ExitStatus> {
        while !self.exited {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(exit) = decode_wait_status(status) {
                        self.record(Some(exit));
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(err) => {
                    warn!("Failed to wait for worker '{}': {err}", self.label);
                    self.record(None);
                }
            }
        }
        self.status
    }
}

/// Translates a terminal `waitpid` result into an [`ExitStatus`].
fn decode_wait_status(status: WaitStatus) -> Option<ExitStatus> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitStatus::from_raw((code & 0xff) << 8)),
        WaitStatus::Signaled(_, signal, core_dumped) => {
            let core = if core_dumped { 0x80 } else { 0 };
            Some(ExitStatus::from_raw(signal as i32 | core))
        }
        _ => None,
    }
}

/// Signals the worker's whole process group when it leads one, else just the pid.
fn send_signal(label: &str, pid: Pid, signal: Signal) {
    let leads_group = matches!(unistd::getpgid(Some(pid)), Ok(pgid) if pgid == pid);
    let result = if leads_group {
        signal::killpg(pid, signal)
    } else {
        signal::kill(pid, signal)
    };

    match result {
        Ok(()) => debug!("Sent {} to worker '{label}' (PID {pid})", signal.as_str()),
        Err(Errno::ESRCH) => debug!("Worker '{label}' (PID {pid}) is already gone"),
        Err(err) => warn!(
            "Failed to send {} to worker '{label}' (PID {pid}): {err}",
            signal.as_str()
        ),
    }
}
