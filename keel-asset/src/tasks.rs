use std::{mem, sync::Mutex};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    Pending,
    Done,
}

/// A multi-step continuation executed on the thread that owns the queue.
///
/// `tick` is called at most once per drain; a task reporting
/// [`Progress::Pending`] stays queued and is retried on the next drain.
pub trait MainTask: Send {
    fn tick(&mut self) -> Progress;
}

/// Queue of continuations drained once per frame by the owning thread.
///
/// Tasks pushed from worker threads during a drain are picked up by the
/// same drain; tasks that reported `Pending` are not re-ticked until the
/// next one.
pub struct MainThreadQueue {
    tasks: Mutex<Vec<Box<dyn MainTask>>>,
}

impl MainThreadQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, task: Box<dyn MainTask>) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Drain to a fixed point of "still pending". Tasks run outside the
    /// lock, so they are free to push follow-up work.
    pub fn drain(&self) {
        let mut still_pending = Vec::new();
        loop {
            let batch = mem::take(&mut *self.tasks.lock().unwrap());
            if batch.is_empty() {
                break;
            }
            for mut task in batch {
                match task.tick() {
                    Progress::Pending => still_pending.push(task),
                    Progress::Done => {}
                }
            }
        }
        self.tasks.lock().unwrap().append(&mut still_pending);
    }
}
