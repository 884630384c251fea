//! The supervision state machine shared by every worker type.
use std::{
    process::ExitStatus,
    thread,
    time::{Duration, Instant},
};

use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, trace, warn};

use crate::{
    constants::{READY_POLL_INTERVAL, STOP_GRACE_PERIOD},
    error::{CapturedOutput, WorkerError},
    process::ProcessHandle,
};

/// The two operations a supervised program has to provide.
///
/// Everything else (readiness polling, stopping, waiting, error shape) comes from
/// [`Manager`].
pub trait Worker {
    /// Probes whether the worker can serve requests.
    ///
    /// Fails with [`WorkerError::HealthCheckFailure`] while it cannot.
    fn health(&self) -> Result<(), WorkerError>;

    /// Launches the worker process. OS-level failures are returned unchanged.
    fn launch(&self) -> Result<ProcessHandle, WorkerError>;
}

impl<T: Worker + ?Sized> Worker for Box<T> {
    fn health(&self) -> Result<(), WorkerError> {
        (**self).health()
    }

    fn launch(&self) -> Result<ProcessHandle, WorkerError> {
        (**self).launch()
    }
}

/// Lifecycle position of a [`Manager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ManagerState {
    /// Nothing launched yet.
    Idle,
    /// Launched, readiness not confirmed.
    Starting,
    /// Health confirmed.
    Ready,
    /// Stopped or waited for by the caller.
    Stopped,
    /// Timed out or exited before becoming healthy.
    Failed,
}

/// Supervises at most one worker process.
///
/// Dropping a manager stops its worker, so a manager that goes out of scope on
/// any path (return, `?`, panic unwinding) never leaves the process behind.
pub struct Manager<W: Worker> {
    name: String,
    worker: W,
    process: Option<ProcessHandle>,
    state: ManagerState,
    poll_interval: Duration,
    stop_grace: Duration,
}

impl<W: Worker> Manager<W> {
    pub fn new(name: impl Into<String>, worker: W) -> Self {
        Self {
            name: name.into(),
            worker,
            process: None,
            state: ManagerState::Idle,
            poll_interval: READY_POLL_INTERVAL,
            stop_grace: STOP_GRACE_PERIOD,
        }
    }

    /// Overrides the interval between readiness polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides how long `stop(true)` waits before escalating to `SIGKILL`.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// The owned process handle, if a worker is believed to be running.
    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ProcessHandle::pid)
    }

    /// Polls the worker and releases the handle if it has exited on its own.
    pub fn is_running(&mut self) -> bool {
        let Some(process) = self.process.as_mut() else {
            return false;
        };

        let status = process.poll();
        if status.is_running() {
            return true;
        }

        warn!(
            "Worker '{}' exited unexpectedly ({})",
            self.name,
            status
                .exit_status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "exit status unavailable".into())
        );
        self.process = None;
        self.state = ManagerState::Failed;
        false
    }

    /// Launches the worker and, if `wait` is set, blocks until it is ready.
    pub fn start(&mut self, wait: bool, timeout: Duration) -> Result<(), WorkerError> {
        if self.process.is_some() {
            return Err(WorkerError::AlreadyRunning {
                name: self.name.clone(),
            });
        }

        debug!("Starting worker '{}'", self.name);
        let process = self.worker.launch()?;
        self.process = Some(process);
        self.state = ManagerState::Starting;

        if wait {
            self.ready_wait(timeout, false)?;
        }
        Ok(())
    }

    /// Runs the worker's health probe once.
    pub fn health(&self) -> Result<(), WorkerError> {
        self.worker.health()
    }

    /// Waits until the worker answers its health probe.
    ///
    /// Fails with [`WorkerError::StartupTimeout`] after terminating the worker if
    /// `timeout` expires first, and with
    /// [`WorkerError::ProcessExitedUnexpectedly`] if the worker dies before ever
    /// reporting healthy. Either way the handle is released.
    pub fn ready_wait(&mut self, timeout: Duration, verbose: bool) -> Result<(), WorkerError> {
        let Some(process) = self.process.as_mut() else {
            return Err(WorkerError::NoSubprocess {
                name: self.name.clone(),
            });
        };

        let started = Instant::now();
        let mut status = process.poll();

        while status.is_running() {
            match self.worker.health() {
                Ok(()) => {
                    if verbose {
                        info!("Worker '{}' is ready", self.name);
                    } else {
                        debug!(
                            "Worker '{}' is ready after {:?}",
                            self.name,
                            started.elapsed()
                        );
                    }
                    self.state = ManagerState::Ready;
                    return Ok(());
                }
                Err(err) => trace!("Worker '{}' not ready yet: {err}", self.name),
            }

            if started.elapsed() > timeout {
                warn!(
                    "Worker '{}' did not become ready within {timeout:?}; terminating",
                    self.name
                );
                process.terminate();
                process.wait();
                self.process = None;
                self.state = ManagerState::Failed;
                return Err(WorkerError::StartupTimeout {
                    name: self.name.clone(),
                    timeout,
                });
            }

            thread::sleep(self.poll_interval);
            status = process.poll();
        }

        let stderr = process.stderr_output();
        warn!(
            "Worker '{}' exited before becoming ready{}",
            self.name,
            stderr
                .as_deref()
                .map(|text| format!(": {text}"))
                .unwrap_or_default()
        );
        self.process = None;
        self.state = ManagerState::Failed;

        Err(WorkerError::ProcessExitedUnexpectedly {
            name: self.name.clone(),
            status: status.exit_status(),
            stderr: stderr.map(CapturedOutput),
        })
    }

    /// Terminates the worker. With `wait`, blocks until it has exited, escalating
    /// to `SIGKILL` after the stop grace period. A no-op when nothing is running.
    ///
    /// Without `wait` the exit is collected by a background thread, so the
    /// worker may still be shutting down when this returns.
    pub fn stop(&mut self, wait: bool) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        info!("Stopping worker '{}' (PID {})", self.name, process.pid());
        process.terminate();

        if !wait {
            if process.poll().is_running() {
                reap_in_background(&self.name, process);
            }
        } else if process.wait_timeout(self.stop_grace).is_running() {
            warn!(
                "Worker '{}' did not exit within {:?} of SIGTERM; sending SIGKILL",
                self.name, self.stop_grace
            );
            process.kill();
            process.wait();
        }

        self.state = ManagerState::Stopped;
    }

    /// Blocks until the worker exits on its own, then releases the handle.
    pub fn wait(&mut self) -> Option<ExitStatus> {
        let mut process = self.process.take()?;
        let status = process.wait();
        debug!("Worker '{}' exited ({status:?})", self.name);
        self.state = ManagerState::Stopped;
        status
    }
}

fn reap_in_background(name: &str, mut process: ProcessHandle) {
    let worker = name.to_string();
    let spawned = thread::Builder::new()
        .name(format!("{name}-reaper"))
        .spawn(move || {
            let status = process.wait();
            debug!("Worker '{worker}' exited after stop ({status:?})");
        });

    if let Err(err) = spawned {
        warn!("Unable to start reaper for worker '{name}': {err}");
    }
}

impl<W: Worker> Drop for Manager<W> {
    fn drop(&mut self) {
        self.stop(true);
    }
}
