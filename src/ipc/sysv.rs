// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! System V semaphore set shared by all manager processes of a host.
//!
//! The set is identified by a key derived from `<state-dir>/gvmd.sem`. Only the path and the
//! existence of that file matter, its content is never read. The set outlives the processes using
//! it, so a restarted daemon attaches to the existing counters instead of resetting them.
//!
//! All adjustments are done with `SEM_UNDO`, when a process exits while holding a slot the kernel
//! gives the slot back.

use std::{
    ffi::CString,
    fs::{self, OpenOptions},
    io,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use libc::{c_int, c_short, c_ushort};

use super::{Admission, IpcError, Limits, Outcome, Resource, Step};

pub const KEY_FILE_NAME: &str = "gvmd.sem";

const PROJECT_ID: c_int = 1;
const SEMAPHORE_COUNT: c_int = Resource::ALL.len() as c_int;

#[derive(Debug)]
pub struct SemaphoreSet {
    id: c_int,
    key_path: PathBuf,
}

impl SemaphoreSet {
    pub fn key_path(state_dir: &Path) -> PathBuf {
        state_dir.join(KEY_FILE_NAME)
    }

    /// Creates or attaches to the semaphore set and sets every counter to its configured limit.
    ///
    /// A set with an unexpected number of counters is a leftover of an older layout and is
    /// recreated.
    pub fn initialize(state_dir: &Path, limits: &Limits) -> Result<Self, IpcError> {
        let key_path = ensure_key_file(state_dir)?;
        let key = derive_key(&key_path)?;

        let id = match attach(key, &key_path)? {
            Some(id) => {
                let count = count(id, &key_path)?;
                if count == SEMAPHORE_COUNT {
                    id
                } else {
                    tracing::warn!(
                        path = %key_path.display(),
                        count,
                        expected = SEMAPHORE_COUNT,
                        "recreating semaphore set with unexpected layout"
                    );
                    remove(id, &key_path)?;
                    create(key, &key_path)?
                }
            }
            None => create(key, &key_path)?,
        };

        let set = Self { id, key_path };
        for resource in Resource::ALL {
            set.set_value(resource, limits.get(resource))?;
        }
        tracing::debug!(path = %set.key_path.display(), ?limits, "semaphores initialized");
        Ok(set)
    }

    /// Attaches to a set created by another process without changing it.
    pub fn reattach(state_dir: &Path) -> Result<Self, IpcError> {
        let key_path = Self::key_path(state_dir);
        if !key_path.exists() {
            return Err(IpcError::Missing(key_path));
        }
        let key = derive_key(&key_path)?;
        match attach(key, &key_path)? {
            Some(id) => Ok(Self { id, key_path }),
            None => Err(IpcError::Missing(key_path)),
        }
    }

    /// Destroys the set for every process using it.
    pub fn remove(self) -> Result<(), IpcError> {
        remove(self.id, &self.key_path)
    }

    fn set_value(&self, resource: Resource, value: u16) -> Result<(), IpcError> {
        // SAFETY: SETVAL expects the value as the fourth argument.
        let ret = unsafe {
            libc::semctl(
                self.id,
                resource.index() as c_int,
                libc::SETVAL,
                c_int::from(value),
            )
        };
        if ret == -1 {
            return Err(self.log_error(Step::SetValue, io::Error::last_os_error()));
        }
        Ok(())
    }

    fn log_error(&self, step: Step, error: io::Error) -> IpcError {
        let error = IpcError::os(step, &self.key_path, error);
        tracing::warn!(%error, "semaphore operation failed");
        error
    }
}

impl Admission for SemaphoreSet {
    fn acquire_or_release(
        &self,
        resource: Resource,
        delta: i16,
        timeout: u64,
    ) -> Result<Outcome, IpcError> {
        let mut op = libc::sembuf {
            sem_num: resource.index() as c_ushort,
            sem_op: delta as c_short,
            sem_flg: libc::SEM_UNDO as c_short,
        };
        let result = if timeout == 0 {
            // SAFETY: op points to exactly one valid sembuf.
            if unsafe { libc::semop(self.id, &mut op, 1) } == -1 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        } else {
            timed_semop(self.id, &mut op, timeout)
        };

        match result {
            Ok(()) => Ok(Outcome::Adjusted),
            Err(error) if timeout > 0 && error.raw_os_error() == Some(libc::EAGAIN) => {
                tracing::trace!(%resource, delta, timeout, "timed out");
                Ok(Outcome::TimedOut)
            }
            Err(error) => Err(self.log_error(Step::Adjust, error)),
        }
    }

    fn value(&self, resource: Resource) -> Result<i32, IpcError> {
        // SAFETY: GETVAL takes no additional argument.
        let ret = unsafe { libc::semctl(self.id, resource.index() as c_int, libc::GETVAL) };
        if ret == -1 {
            return Err(self.log_error(Step::GetValue, io::Error::last_os_error()));
        }
        Ok(ret)
    }
}

fn ensure_key_file(state_dir: &Path) -> Result<PathBuf, IpcError> {
    let key_path = SemaphoreSet::key_path(state_dir);
    fs::create_dir_all(state_dir)
        .and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&key_path)
        })
        .map_err(|e| {
            let error = IpcError::os(Step::CreateKeyFile, &key_path, e);
            tracing::warn!(%error, "unable to prepare semaphore key file");
            error
        })?;
    Ok(key_path)
}

fn derive_key(key_path: &Path) -> Result<libc::key_t, IpcError> {
    let path = CString::new(key_path.as_os_str().as_bytes()).map_err(|e| {
        IpcError::os(
            Step::DeriveKey,
            key_path,
            io::Error::new(io::ErrorKind::InvalidInput, e),
        )
    })?;
    // SAFETY: path is a valid NUL terminated string.
    let key = unsafe { libc::ftok(path.as_ptr(), PROJECT_ID) };
    if key == -1 {
        let error = IpcError::os(Step::DeriveKey, key_path, io::Error::last_os_error());
        tracing::warn!(%error, "unable to derive semaphore key");
        return Err(error);
    }
    Ok(key)
}

fn attach(key: libc::key_t, key_path: &Path) -> Result<Option<c_int>, IpcError> {
    // SAFETY: plain syscall without pointers.
    let id = unsafe { libc::semget(key, 0, 0o600) };
    if id != -1 {
        return Ok(Some(id));
    }
    let error = io::Error::last_os_error();
    if error.raw_os_error() == Some(libc::ENOENT) {
        return Ok(None);
    }
    let error = IpcError::os(Step::Attach, key_path, error);
    tracing::warn!(%error, "unable to attach to semaphore set");
    Err(error)
}

fn create(key: libc::key_t, key_path: &Path) -> Result<c_int, IpcError> {
    // SAFETY: plain syscall without pointers.
    let id = unsafe {
        libc::semget(
            key,
            SEMAPHORE_COUNT,
            libc::IPC_CREAT | libc::IPC_EXCL | 0o600,
        )
    };
    if id != -1 {
        tracing::info!(path = %key_path.display(), "created semaphore set");
        return Ok(id);
    }
    let error = io::Error::last_os_error();
    if error.raw_os_error() == Some(libc::EEXIST) {
        // another process won the race
        if let Some(id) = attach(key, key_path)? {
            return Ok(id);
        }
    }
    let error = IpcError::os(Step::Create, key_path, error);
    tracing::warn!(%error, "unable to create semaphore set");
    Err(error)
}

fn count(id: c_int, key_path: &Path) -> Result<c_int, IpcError> {
    // SAFETY: semid_ds is plain old data and filled by IPC_STAT.
    let mut stat: libc::semid_ds = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::semctl(id, 0, libc::IPC_STAT, &mut stat as *mut libc::semid_ds) };
    if ret == -1 {
        let error = IpcError::os(Step::Inspect, key_path, io::Error::last_os_error());
        tracing::warn!(%error, "unable to inspect semaphore set");
        return Err(error);
    }
    Ok(stat.sem_nsems as c_int)
}

fn remove(id: c_int, key_path: &Path) -> Result<(), IpcError> {
    // SAFETY: IPC_RMID takes no additional argument.
    let ret = unsafe { libc::semctl(id, 0, libc::IPC_RMID) };
    if ret == -1 {
        let error = IpcError::os(Step::Remove, key_path, io::Error::last_os_error());
        tracing::warn!(%error, "unable to remove semaphore set");
        return Err(error);
    }
    Ok(())
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
fn timed_semop(id: c_int, op: &mut libc::sembuf, timeout: u64) -> io::Result<()> {
    let timeout = libc::timespec {
        tv_sec: timeout as libc::time_t,
        tv_nsec: 0,
    };
    // SAFETY: op points to one sembuf, timeout outlives the call.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_semtimedop,
            id,
            op as *mut libc::sembuf,
            1usize,
            &timeout as *const libc::timespec,
        )
    };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
fn timed_semop(id: c_int, op: &mut libc::sembuf, timeout: u64) -> io::Result<()> {
    use std::time::{Duration, Instant};

    let deadline = Instant::now() + Duration::from_secs(timeout);
    op.sem_flg |= libc::IPC_NOWAIT as c_short;
    loop {
        // SAFETY: op points to exactly one valid sembuf.
        if unsafe { libc::semop(id, op, 1) } == 0 {
            return Ok(());
        }
        let error = io::Error::last_os_error();
        if error.raw_os_error() != Some(libc::EAGAIN) || Instant::now() >= deadline {
            return Err(error);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use super::*;

    fn limits(max_scan_updates: u16) -> Limits {
        Limits {
            max_scan_updates,
            max_database_connections: 4,
            max_report_processing: 0,
        }
    }

    #[test]
    fn initialize_creates_key_file_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let set = SemaphoreSet::initialize(&state_dir, &limits(2)).unwrap();

        assert!(state_dir.join(KEY_FILE_NAME).exists());
        assert_eq!(set.value(Resource::ScanUpdate).unwrap(), 2);
        assert_eq!(set.value(Resource::DatabaseConnection).unwrap(), 4);
        assert_eq!(set.value(Resource::ReportProcessing).unwrap(), 1);
        set.remove().unwrap();
    }

    #[test]
    fn blocks_after_limit_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let set = SemaphoreSet::initialize(dir.path(), &limits(2)).unwrap();

        for _ in 0..2 {
            assert_eq!(
                set.acquire_or_release(Resource::ScanUpdate, -1, 1).unwrap(),
                Outcome::Adjusted
            );
        }
        let started = Instant::now();
        assert_eq!(
            set.acquire_or_release(Resource::ScanUpdate, -1, 1).unwrap(),
            Outcome::TimedOut
        );
        assert!(started.elapsed() >= Duration::from_millis(900));

        assert_eq!(
            set.acquire_or_release(Resource::ScanUpdate, 1, 0).unwrap(),
            Outcome::Adjusted
        );
        assert_eq!(
            set.acquire_or_release(Resource::ScanUpdate, -1, 1).unwrap(),
            Outcome::Adjusted
        );
        assert_eq!(
            set.acquire_or_release(Resource::ScanUpdate, 0, 1).unwrap(),
            Outcome::Adjusted
        );
        set.remove().unwrap();
    }

    #[test]
    fn available_counter_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let set = SemaphoreSet::initialize(dir.path(), &limits(1)).unwrap();
        let started = Instant::now();
        assert_eq!(
            set.acquire_or_release(Resource::ScanUpdate, -1, 0).unwrap(),
            Outcome::Adjusted
        );
        assert!(started.elapsed() < Duration::from_millis(500));
        set.remove().unwrap();
    }

    #[test]
    fn release_wakes_a_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let set = Arc::new(SemaphoreSet::initialize(dir.path(), &limits(1)).unwrap());
        set.acquire_or_release(Resource::ScanUpdate, -1, 0).unwrap();

        let waiter = {
            let set = set.clone();
            thread::spawn(move || set.acquire_or_release(Resource::ScanUpdate, -1, 10))
        };
        thread::sleep(Duration::from_millis(100));
        assert_eq!(set.value(Resource::ScanUpdate).unwrap(), 0);
        set.acquire_or_release(Resource::ScanUpdate, 1, 0).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap(), Outcome::Adjusted);
        assert_eq!(set.value(Resource::ScanUpdate).unwrap(), 0);
        // the waiter took the only slot, another acquirer has to time out
        assert_eq!(
            set.acquire_or_release(Resource::ScanUpdate, -1, 1).unwrap(),
            Outcome::TimedOut
        );
        Arc::try_unwrap(set).unwrap().remove().unwrap();
    }

    #[test]
    fn oversized_limit_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let limits = Limits {
            max_database_connections: 40000,
            ..Default::default()
        };
        let set = SemaphoreSet::initialize(dir.path(), &limits).unwrap();
        assert_eq!(
            set.value(Resource::DatabaseConnection).unwrap(),
            i32::from(crate::ipc::MAX_LIMIT)
        );
        set.remove().unwrap();
    }

    #[test]
    fn reattach_sees_the_same_counters() {
        let dir = tempfile::tempdir().unwrap();
        let set = SemaphoreSet::initialize(dir.path(), &limits(3)).unwrap();
        set.acquire_or_release(Resource::ScanUpdate, -1, 0).unwrap();

        let attached = SemaphoreSet::reattach(dir.path()).unwrap();
        assert_eq!(attached.value(Resource::ScanUpdate).unwrap(), 2);
        set.acquire_or_release(Resource::ScanUpdate, 1, 0).unwrap();
        attached.remove().unwrap();
    }

    #[test]
    fn reattach_without_set_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SemaphoreSet::reattach(dir.path()),
            Err(IpcError::Missing(_))
        ));
    }

    #[test]
    fn recreates_set_with_unexpected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = ensure_key_file(dir.path()).unwrap();
        let key = derive_key(&key_path).unwrap();
        let old = unsafe { libc::semget(key, 1, libc::IPC_CREAT | libc::IPC_EXCL | 0o600) };
        assert_ne!(old, -1);

        let set = SemaphoreSet::initialize(dir.path(), &limits(2)).unwrap();
        assert_eq!(count(set.id, &key_path).unwrap(), SEMAPHORE_COUNT);
        assert_eq!(set.value(Resource::ReportProcessing).unwrap(), 1);
        set.remove().unwrap();
    }

    #[test]
    fn operations_on_removed_set_fail() {
        let dir = tempfile::tempdir().unwrap();
        let set = SemaphoreSet::initialize(dir.path(), &limits(1)).unwrap();
        let attached = SemaphoreSet::reattach(dir.path()).unwrap();
        set.remove().unwrap();

        let error = attached
            .acquire_or_release(Resource::ScanUpdate, -1, 0)
            .unwrap_err();
        assert_eq!(error.step(), Some(Step::Adjust));
    }
}
