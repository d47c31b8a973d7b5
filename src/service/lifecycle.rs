//! Process lifecycle
//!
//! Tracks whether models are being checked/downloaded, processed or stopped.
//! Session pool construction waits on the condition variable here while a
//! check is in progress instead of polling.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::config::MemoryStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Pending,
    Checking,
    Processing,
    Stopping,
}

/// Shared process state with a change signal
pub struct ProcessManager {
    state: Mutex<ProcessState>,
    changed: Condvar,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::Pending),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn set(&self, state: ProcessState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Process state {:?} -> {:?}", *current, state);
            *current = state;
            self.changed.notify_all();
        }
    }

    /// Enter the checking phase; the guard restores the previous state on drop.
    pub fn check(&self) -> CheckGuard<'_> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous != ProcessState::Checking {
                debug!("Process state {:?} -> {:?}", previous, ProcessState::Checking);
                *state = ProcessState::Checking;
                self.changed.notify_all();
            }
            previous
        };
        CheckGuard { manager: self, previous }
    }

    /// Enter processing once no check is in progress
    pub fn start(&self) {
        let mut state = self.state.lock();
        while *state == ProcessState::Checking {
            self.changed.wait(&mut state);
        }
        if *state != ProcessState::Processing {
            debug!("Process state {:?} -> {:?}", *state, ProcessState::Processing);
            *state = ProcessState::Processing;
            self.changed.notify_all();
        }
    }

    pub fn stop(&self) {
        self.set(ProcessState::Stopping);
    }

    pub fn end(&self) {
        self.set(ProcessState::Pending);
    }

    pub fn is_checking(&self) -> bool {
        self.state() == ProcessState::Checking
    }

    pub fn is_processing(&self) -> bool {
        self.state() == ProcessState::Processing
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == ProcessState::Stopping
    }

    /// Block until no check is in progress
    pub fn wait_until_checked(&self) {
        let mut state = self.state.lock();
        while *state == ProcessState::Checking {
            self.changed.wait(&mut state);
        }
    }

    /// Yield items until processing is asked to stop.
    ///
    /// An item already handed out always completes; stopping only prevents
    /// further items from starting.
    pub fn manage<'a, I>(&'a self, items: I) -> impl Iterator<Item = I::Item> + 'a
    where
        I: IntoIterator,
        I::IntoIter: 'a,
    {
        items.into_iter().take_while(move |_| !self.is_stopping())
    }
}

/// Ends the checking phase on drop
pub struct CheckGuard<'a> {
    manager: &'a ProcessManager,
    previous: ProcessState,
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.state.lock();
        if *state == ProcessState::Checking && self.previous != ProcessState::Checking {
            debug!("Process state {:?} -> {:?}", *state, self.previous);
            *state = self.previous;
            self.manager.changed.notify_all();
        }
    }
}

impl MemoryStrategy {
    /// Whether inference sessions are released after a batch
    pub fn releases_sessions(&self) -> bool {
        matches!(self, MemoryStrategy::Moderate | MemoryStrategy::Strict)
    }

    /// Whether face analysis and masking caches are released after a batch
    pub fn releases_analysers(&self) -> bool {
        matches!(self, MemoryStrategy::Strict)
    }
}
