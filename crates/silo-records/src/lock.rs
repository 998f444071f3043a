use std::collections::HashSet;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use silo_types::ContentHash;
use tracing::debug;

use crate::error::{RecordError, RecordResult};

/// What a transaction locks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// Every row whose content hash is this one. Groups lock independently.
    HashGroup(ContentHash),
    /// The whole store. Waits for all group holders to finish and blocks new
    /// ones while pending.
    Exclusive,
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashGroup(hash) => write!(f, "group:{}", hash.short_hex()),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Default)]
struct LockState {
    groups: HashSet<ContentHash>,
    exclusive: bool,
    exclusive_waiting: usize,
}

impl LockState {
    fn admits(&self, scope: &LockScope) -> bool {
        match scope {
            LockScope::HashGroup(hash) => {
                !self.exclusive && self.exclusive_waiting == 0 && !self.groups.contains(hash)
            }
            LockScope::Exclusive => !self.exclusive && self.groups.is_empty(),
        }
    }

    fn take(&mut self, scope: &LockScope) {
        match scope {
            LockScope::HashGroup(hash) => {
                self.groups.insert(*hash);
            }
            LockScope::Exclusive => self.exclusive = true,
        }
    }

    fn release(&mut self, scope: &LockScope) {
        match scope {
            LockScope::HashGroup(hash) => {
                self.groups.remove(hash);
            }
            LockScope::Exclusive => self.exclusive = false,
        }
    }
}

/// Per-hash-group lock table emulating row locks.
///
/// Locks are not reentrant: a thread that already holds a scope and asks
/// for an overlapping one waits on itself.
pub struct LockTable {
    state: Mutex<LockState>,
    released: Condvar,
    timeout: Option<Duration>,
}

impl LockTable {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Block until `scope` is free, then hold it until the guard drops.
    pub fn acquire(&self, scope: LockScope) -> RecordResult<LockGuard<'_>> {
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);
        let mut state = self.state.lock().map_err(|_| RecordError::Poisoned)?;

        // A pending exclusive request holds off new group locks so audits
        // cannot be starved by a steady stream of ingests.
        if scope == LockScope::Exclusive {
            state.exclusive_waiting += 1;
        }
        let outcome = self.wait_until_admitted(state, &scope, deadline);
        match outcome {
            Ok(mut state) => {
                if scope == LockScope::Exclusive {
                    state.exclusive_waiting -= 1;
                }
                state.take(&scope);
                debug!(%scope, "lock acquired");
                Ok(LockGuard { table: self, scope })
            }
            Err(WaitError::Poisoned) => Err(RecordError::Poisoned),
            Err(WaitError::TimedOut(mut state)) => {
                if scope == LockScope::Exclusive {
                    state.exclusive_waiting -= 1;
                    drop(state);
                    self.released.notify_all();
                }
                Err(RecordError::LockTimeout {
                    scope: scope.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    fn wait_until_admitted<'s>(
        &'s self,
        mut state: MutexGuard<'s, LockState>,
        scope: &LockScope,
        deadline: Option<Instant>,
    ) -> Result<MutexGuard<'s, LockState>, WaitError<'s>> {
        while !state.admits(scope) {
            state = match deadline {
                None => self
                    .released
                    .wait(state)
                    .map_err(|_| WaitError::Poisoned)?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::TimedOut(state));
                    }
                    self.released
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| WaitError::Poisoned)?
                        .0
                }
            };
        }
        Ok(state)
    }

    fn release(&self, scope: &LockScope) {
        // Releasing must succeed even after a panic elsewhere poisoned the
        // mutex; the state itself is always left coherent.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.release(scope);
        drop(state);
        self.released.notify_all();
        debug!(%scope, "lock released");
    }
}

impl fmt::Debug for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("timeout", &self.timeout)
            .finish()
    }
}

enum WaitError<'s> {
    Poisoned,
    TimedOut(MutexGuard<'s, LockState>),
}

/// Held lock. Released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    table: &'a LockTable,
    scope: LockScope,
}

impl LockGuard<'_> {
    pub fn scope(&self) -> &LockScope {
        &self.scope
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.scope);
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockGuard({})", self.scope)
    }
}
