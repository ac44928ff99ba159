//! A cooperative driver for load contexts.
//!
//! [`TaskQueue::poll`] runs one step of every live load. Call it once per
//! frame from the render loop; it never waits on I/O. Finished loads are
//! freed exactly once and their callback receives a [`TaskOutcome`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use enough::{Stop, StopReason};

use crate::bitmap::LoadOutput;
use crate::context::LoadContext;
use crate::error::LoadError;
use crate::request::{LoadRequest, Purpose};

/// Identifies one queued load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Shared cancellation flag for one load.
///
/// Implements [`Stop`], so it can be handed to [`LoadContext::step`] directly.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The load stops on its next step.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Stop for CancelToken {
    fn check(&self) -> Result<(), StopReason> {
        if self.is_cancelled() {
            Err(StopReason::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Delivered to the completion callback once a load is terminal.
#[derive(Debug)]
pub struct TaskOutcome {
    pub id: TaskId,
    pub purpose: Purpose,
    pub path: PathBuf,
    /// The output slot: a bitmap (or raw bytes) on success, never on error.
    pub result: Result<LoadOutput, LoadError>,
}

impl TaskOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_cancelled())
    }
}

type Callback = Box<dyn FnOnce(TaskOutcome)>;

struct Task {
    id: TaskId,
    context: LoadContext,
    cancel: CancelToken,
    on_complete: Option<Callback>,
}

/// Owns queued loads and steps them cooperatively.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    next_id: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` and queue it for loading.
    ///
    /// Returns without reading anything. Fails if the file cannot be opened
    /// or its context cannot be allocated; nothing is queued in that case.
    /// Whatever the callback captures plays the role of user data.
    pub fn request_load(
        &mut self,
        path: impl AsRef<Path>,
        purpose: Purpose,
        on_complete: impl FnOnce(TaskOutcome) + 'static,
    ) -> Result<TaskId, LoadError> {
        let request = LoadRequest::new(path.as_ref()).with_purpose(purpose);
        self.push(request, on_complete)
    }

    /// Begin `request` and queue it.
    pub fn push(
        &mut self,
        request: LoadRequest,
        on_complete: impl FnOnce(TaskOutcome) + 'static,
    ) -> Result<TaskId, LoadError> {
        let context = request.begin()?;
        Ok(self.push_context(context, on_complete))
    }

    /// Queue an already created context.
    pub fn push_context(
        &mut self,
        context: LoadContext,
        on_complete: impl FnOnce(TaskOutcome) + 'static,
    ) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        log::debug!("{id}: queued {}", context.name().display());
        self.tasks.push(Task {
            id,
            context,
            cancel: CancelToken::new(),
            on_complete: Some(Box::new(on_complete)),
        });
        id
    }

    /// Request cancellation of a queued load. Returns `false` if no such
    /// load is live.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.cancel_token(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// The cancellation token of a live load, for cancelling from elsewhere.
    pub fn cancel_token(&self, id: TaskId) -> Option<CancelToken> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.cancel.clone())
    }

    /// Step every live load once, then retire the ones that finished.
    ///
    /// Returns the number of loads still running.
    pub fn poll(&mut self) -> usize {
        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.tasks.len() {
            let task = &mut self.tasks[i];
            if task.context.step(&task.cancel) {
                i += 1;
            } else {
                finished.push(self.tasks.remove(i));
            }
        }
        for task in finished {
            Self::retire(task);
        }
        self.tasks.len()
    }

    /// Poll until no loads remain or `max_polls` rounds have run.
    ///
    /// Returns `true` if the queue drained.
    pub fn run_until_idle(&mut self, max_polls: usize) -> bool {
        for _ in 0..max_polls {
            if self.poll() == 0 {
                return true;
            }
        }
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn retire(mut task: Task) {
        let result = task.context.take_result().unwrap_or_else(|| {
            Err(LoadError::DecodeProcessFailed(
                "load stopped without an outcome".into(),
            ))
        });
        task.context.free();
        let outcome = TaskOutcome {
            id: task.id,
            purpose: task.context.purpose(),
            path: task.context.name().to_path_buf(),
            result,
        };
        if let Some(on_complete) = task.on_complete.take() {
            on_complete(outcome);
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Outstanding loads are cancelled; their callbacks still run.
        for mut task in self.tasks.drain(..) {
            task.cancel.cancel();
            task.context.step(&task.cancel);
            Self::retire(task);
        }
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("live", &self.tasks.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
