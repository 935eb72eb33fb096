// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Counting semaphores shared between the threads of a single process.

use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use super::{Admission, IpcError, Limits, Outcome, Resource};

#[derive(Debug)]
pub struct LocalSemaphores {
    counters: Mutex<[i32; 3]>,
    changed: Condvar,
}

impl LocalSemaphores {
    pub fn new(limits: &Limits) -> Self {
        let mut counters = [0; 3];
        for resource in Resource::ALL {
            counters[resource.index()] = i32::from(limits.get(resource));
        }
        Self {
            counters: Mutex::new(counters),
            changed: Condvar::new(),
        }
    }
}

impl Admission for LocalSemaphores {
    fn acquire_or_release(
        &self,
        resource: Resource,
        delta: i16,
        timeout: u64,
    ) -> Result<Outcome, IpcError> {
        let index = resource.index();
        let delta = i32::from(delta);
        let ready = |counters: &[i32; 3]| match delta {
            0 => counters[index] == 0,
            d if d < 0 => counters[index] + d >= 0,
            _ => true,
        };

        let mut counters = self.counters.lock()?;
        let deadline = (timeout > 0).then(|| Instant::now() + Duration::from_secs(timeout));
        while !ready(&*counters) {
            counters = match deadline {
                None => self.changed.wait(counters)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::trace!(%resource, delta, "timed out");
                        return Ok(Outcome::TimedOut);
                    }
                    self.changed.wait_timeout(counters, deadline - now)?.0
                }
            };
        }
        if delta != 0 {
            counters[index] += delta;
            self.changed.notify_all();
        }
        Ok(Outcome::Adjusted)
    }

    fn value(&self, resource: Resource) -> Result<i32, IpcError> {
        Ok(self.counters.lock()?[resource.index()])
    }
}
