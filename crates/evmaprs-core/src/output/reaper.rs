// Evmaprs Command Launcher
// Detached shell command execution with a background child reaper

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// How often running children are polled for exit
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Starts external commands without waiting for them.
pub trait CommandLauncher {
    /// Launch `command` and return its process id
    fn launch(&mut self, command: &str) -> io::Result<u32>;
}

struct ReaperShared {
    /// Children handed over since the reaper last looked
    adopted: Mutex<Vec<(String, Child)>>,
    wake: Condvar,
    stop: AtomicBool,
    /// Adopted and not yet reaped
    pending: AtomicUsize,
}

/// Background thread collecting the exit status of launched commands so
/// none of them linger as zombies.
pub struct Reaper {
    shared: Arc<ReaperShared>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    pub fn spawn() -> io::Result<Self> {
        let shared = Arc::new(ReaperShared {
            adopted: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
        });
        let thread = std::thread::Builder::new()
            .name("evmaprs-reaper".into())
            .spawn({
                let shared = shared.clone();
                move || reap_loop(&shared)
            })?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Hand a running child over to the reaper
    pub fn adopt(&self, command: String, child: Child) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.adopted.lock().push((command, child));
        self.shared.wake.notify_one();
    }

    /// Number of children not reaped yet
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        {
            // Holding the lock: the thread is either waiting or has not
            // checked the flag yet, so the wakeup cannot be missed
            let _adopted = self.shared.adopted.lock();
            self.shared.stop.store(true, Ordering::SeqCst);
            self.shared.wake.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn reap_loop(shared: &ReaperShared) {
    let mut running: Vec<(String, Child)> = Vec::new();
    loop {
        {
            let mut adopted = shared.adopted.lock();
            if adopted.is_empty() && !shared.stop.load(Ordering::SeqCst) {
                if running.is_empty() {
                    shared.wake.wait(&mut adopted);
                } else {
                    shared.wake.wait_for(&mut adopted, REAP_INTERVAL);
                }
            }
            if shared.stop.load(Ordering::SeqCst) {
                return;
            }
            running.append(&mut adopted);
        }

        // Polled without the lock so `adopt` never waits on a sweep
        let before = running.len();
        running.retain_mut(|(command, child)| match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                log::debug!("'{}' (pid {}) finished", command, child.id());
                false
            }
            Ok(Some(status)) => {
                log::warn!("'{}' (pid {}) exited with {}", command, child.id(), status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::error!("cannot wait for '{}' (pid {}): {}", command, child.id(), e);
                false
            }
        });
        shared
            .pending
            .fetch_sub(before - running.len(), Ordering::SeqCst);
    }
}

/// Runs commands through a shell, detached in their own process group.
pub struct ShellLauncher {
    shell: PathBuf,
    reaper: Reaper,
}

impl ShellLauncher {
    pub fn new(shell: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self {
            shell: shell.into(),
            reaper: Reaper::spawn()?,
        })
    }

    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }
}

impl CommandLauncher for ShellLauncher {
    fn launch(&mut self, command: &str) -> io::Result<u32> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()?;
        let pid = child.id();
        self.reaper.adopt(command.to_string(), child);
        Ok(pid)
    }
}
