//! Single-worker routine scheduler.
//!
//! Each GC routine owns one of these. A trigger while the routine is idle
//! starts a run; a trigger while it is running flags exactly one immediate
//! re-run. The same routine never overlaps with itself.

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    RerunPending,
}

pub struct Routine {
    name: &'static str,
    state: Mutex<RunState>,
}

impl Routine {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(RunState::Idle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request a run. Repeated triggers during a run coalesce into one
    /// follow-up run.
    pub fn trigger<F, Fut>(self: &Arc<Self>, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                RunState::Idle => *state = RunState::Running,
                RunState::Running => {
                    *state = RunState::RerunPending;
                    return;
                }
                RunState::RerunPending => return,
            }
        }

        let routine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tracing::debug!(routine = routine.name, "routine run started");
                job().await;
                let mut state = routine.state.lock().unwrap_or_else(PoisonError::into_inner);
                match *state {
                    RunState::RerunPending => *state = RunState::Running,
                    _ => {
                        *state = RunState::Idle;
                        break;
                    }
                }
            }
        });
    }

    pub fn is_idle(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) == RunState::Idle
    }
}
