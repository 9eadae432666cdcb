use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tracing::{debug, warn};

pub const LOCK_SUFFIX: &str = ".lock";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const SLOW_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct PathLock {
    path: PathBuf,
}

impl PathLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let mut held = held_locks();
        let _ = fs::remove_file(&self.path);
        held.remove(&self.path);
    }
}

// lock files this process currently owns
fn held_locks() -> MutexGuard<'static, HashSet<PathBuf>> {
    static HELD: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    HELD.get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut raw = target.as_os_str().to_os_string();
    raw.push(LOCK_SUFFIX);
    PathBuf::from(raw)
}

/// Single attempt; `Ok(None)` when somebody else holds the lock. A lock
/// file whose recorded owner is gone is removed and taken over.
pub fn try_acquire_path_lock(target: &Path) -> Result<Option<PathLock>> {
    let lock_path = lock_path_for(target);
    let mut held = held_locks();
    if !create_lock_file(&lock_path)? {
        let Some(owner) = stale_owner(&lock_path, &held) else {
            return Ok(None);
        };
        warn!(
            "removing stale lock {} left behind by pid {}",
            lock_path.display(),
            owner
        );
        match fs::remove_file(&lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to remove stale lock {}", lock_path.display())
                })
            }
        }
        if !create_lock_file(&lock_path)? {
            return Ok(None);
        }
    }
    held.insert(lock_path.clone());
    Ok(Some(PathLock { path: lock_path }))
}

fn create_lock_file(lock_path: &Path) -> Result<bool> {
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            let payload = format!(
                "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                std::process::id(),
                Utc::now().to_rfc3339()
            );
            let _ = file.write_all(payload.as_bytes());
            let _ = file.sync_all();
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            Err(e).with_context(|| format!("failed to create lock file {}", lock_path.display()))
        }
    }
}

fn stale_owner(lock_path: &Path, held: &HashSet<PathBuf>) -> Option<u32> {
    let raw = fs::read_to_string(lock_path).ok()?;
    let payload: Value = serde_json::from_str(&raw).ok()?;
    let pid = u32::try_from(payload.get("pid")?.as_u64()?).ok()?;
    let abandoned = if pid == std::process::id() {
        !held.contains(lock_path)
    } else {
        !process_alive(pid)
    };
    abandoned.then_some(pid)
}

fn process_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}

pub fn acquire_path_lock(target: &Path, timeout: Option<Duration>) -> Result<PathLock> {
    let started = Instant::now();
    let mut reported = false;
    loop {
        if let Some(lock) = try_acquire_path_lock(target)? {
            debug!(lock = %lock.path.display(), "lock acquired");
            return Ok(lock);
        }
        let waited = started.elapsed();
        if let Some(limit) = timeout {
            if waited >= limit {
                return Err(anyhow!(
                    "lock_timeout: {} still held after {:.1}s",
                    lock_path_for(target).display(),
                    limit.as_secs_f64()
                ));
            }
        }
        if !reported && waited >= SLOW_WAIT {
            warn!(
                "still waiting for lock {} after {:.0}s",
                lock_path_for(target).display(),
                waited.as_secs_f64()
            );
            reported = true;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
