//! Deferred, cancellable tasks measured in ticks.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use parking_lot::Mutex;

use crate::engine::Engine;

/// A deferred unit of work, run on the tick thread.
pub type Task = Box<dyn FnOnce(&Engine) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub u64);

/// Scheduling seam: run a task `delay` ticks from now, or cancel it.
///
/// The engine drives it from `Engine::tick`, so an implementation only
/// decides when tasks are due.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: u64, task: Task) -> TaskHandle;

    /// Returns `false` if the task already ran or was cancelled.
    fn cancel(&self, handle: TaskHandle) -> bool;

    /// Advance one tick and take every task that is now due.
    ///
    /// Tasks are returned rather than run so they execute without any
    /// scheduler lock held.
    fn advance(&self) -> Vec<Task>;

    /// Tasks scheduled and not yet taken or cancelled.
    fn pending(&self) -> usize;
}

#[derive(Default)]
struct Queue {
    now: u64,
    next_id: u64,
    due: BinaryHeap<Reverse<(u64, u64)>>,
    tasks: HashMap<u64, Task>,
}

/// Scheduler driven by an external tick source.
#[derive(Default)]
pub struct TickScheduler {
    queue: Mutex<Queue>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.queue.lock().now
    }
}

impl Scheduler for TickScheduler {
    fn advance(&self) -> Vec<Task> {
        let mut q = self.queue.lock();
        q.now += 1;
        let now = q.now;
        let mut ready = Vec::new();
        while let Some(Reverse((at, id))) = q.due.peek().copied() {
            if at > now {
                break;
            }
            q.due.pop();
            if let Some(task) = q.tasks.remove(&id) {
                ready.push(task);
            }
        }
        ready
    }

    fn pending(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    fn schedule(&self, delay: u64, task: Task) -> TaskHandle {
        let mut q = self.queue.lock();
        let id = q.next_id;
        q.next_id += 1;
        let at = q.now + delay.max(1);
        q.due.push(Reverse((at, id)));
        q.tasks.insert(id, task);
        TaskHandle(id)
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        // The heap entry is skipped lazily once it comes due.
        self.queue.lock().tasks.remove(&handle.0).is_some()
    }
}
