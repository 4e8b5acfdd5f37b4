//! Task list plus the min-heap of next fire times.
//!
//! | Item              | Role                                              |
//! |-------------------|---------------------------------------------------|
//! | [`ScheduledTask`] | `(fire_time, task_index)`, ordered for a min-heap |
//! | [`Schedule`]      | owns every [`Task`] and the queue of their slots  |
//! | [`period`]        | frequency → interval between fire times           |
//!
//! The two live together because registration and a scheduler tick must see
//! a consistent pair; the driver guards a `Schedule` with a single lock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use sensbridge_types::{BridgeError, Timestamp};

use crate::task::Task;

/// One pending dispatch.
///
/// [`Ord`] is reversed so that [`BinaryHeap`] pops the earliest fire time
/// first. Equal fire times pop by ascending `task_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub fire_time: Timestamp,
    pub task_index: usize,
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_time
            .cmp(&self.fire_time)
            .then_with(|| other.task_index.cmp(&self.task_index))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Interval between two fire times of a task running at `frequency` Hz.
///
/// `None` for a one-shot task (`frequency == 0`). The interval is rounded to
/// whole nanoseconds once, so repeated addition never accumulates float
/// error. Frequencies above 1 GHz clamp to 1 ns.
pub fn period(frequency: f64) -> Option<Duration> {
    if frequency == 0.0 {
        return None;
    }
    let nanos = (1e9 / frequency).round().max(1.0) as u64;
    Some(Duration::from_nanos(nanos))
}

/// Rejects frequencies the scheduler cannot honour.
pub fn validate_frequency(name: &str, frequency: f64) -> Result<(), BridgeError> {
    if !frequency.is_finite() || frequency < 0.0 {
        return Err(BridgeError::Config(format!(
            "{name}: frequency must be a finite, non-negative number of Hz (got {frequency})"
        )));
    }
    Ok(())
}

/// Append-only task list with its dispatch queue.
#[derive(Default)]
pub struct Schedule {
    tasks: Vec<Box<dyn Task>>,
    queue: BinaryHeap<ScheduledTask>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `task`, seed its first slot at `now` and return its index.
    pub fn push_task(&mut self, mut task: Box<dyn Task>, now: Timestamp) -> usize {
        task.reset();
        let task_index = self.tasks.len();
        self.tasks.push(task);
        self.queue.push(ScheduledTask {
            fire_time: now,
            task_index,
        });
        task_index
    }

    pub fn pop(&mut self) -> Option<ScheduledTask> {
        self.queue.pop()
    }

    pub fn peek(&self) -> Option<&ScheduledTask> {
        self.queue.peek()
    }

    /// Queue the next slot of a dispatched task, unless it is one-shot.
    pub fn reschedule(&mut self, slot: ScheduledTask) -> Option<ScheduledTask> {
        let task = self.tasks.get(slot.task_index)?;
        let next = ScheduledTask {
            fire_time: slot.fire_time + period(task.frequency())?,
            task_index: slot.task_index,
        };
        self.queue.push(next);
        Some(next)
    }

    pub fn task_mut(&mut self, index: usize) -> Option<&mut (dyn Task + 'static)> {
        self.tasks.get_mut(index).map(|t| t.as_mut())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.tasks.clear();
    }
}
