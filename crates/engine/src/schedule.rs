//! Deferred and periodic callbacks processed by the single-threaded heartbeat.
//!
//! Tasks are ordered by `(fire_at, sequence)`, so two tasks due at the same
//! instant run in the order they were scheduled. A task is popped before it
//! runs, which lets it receive `&mut C` even when `C` owns the queue.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use crate::time::GameTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

type OnceFn<C> = Box<dyn FnOnce(&mut C)>;
type RepeatFn<C> = Box<dyn FnMut(&mut C)>;

enum TaskBody<C> {
    Once(OnceFn<C>),
    Repeating { interval: Duration, run: RepeatFn<C> },
}

struct PendingTask<C> {
    label: &'static str,
    body: TaskBody<C>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    fire_at: GameTime,
    sequence: u64,
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

pub struct TaskQueue<C> {
    heap: BinaryHeap<Reverse<QueueKey>>,
    tasks: BTreeMap<u64, PendingTask<C>>,
    next_sequence: u64,
}

impl<C> Default for TaskQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for TaskQueue<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.tasks.len())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl<C> TaskQueue<C> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            tasks: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn schedule_at(
        &mut self,
        fire_at: GameTime,
        label: &'static str,
        task: impl FnOnce(&mut C) + 'static,
    ) -> TaskHandle {
        self.push(fire_at, label, TaskBody::Once(Box::new(task)))
    }

    pub fn schedule_after(
        &mut self,
        now: GameTime,
        delay: Duration,
        label: &'static str,
        task: impl FnOnce(&mut C) + 'static,
    ) -> TaskHandle {
        self.schedule_at(now + delay, label, task)
    }

    /// First run at `first_at`, then every `interval` until cancelled.
    pub fn schedule_repeating(
        &mut self,
        first_at: GameTime,
        interval: Duration,
        label: &'static str,
        task: impl FnMut(&mut C) + 'static,
    ) -> TaskHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        self.push(
            first_at,
            label,
            TaskBody::Repeating {
                interval,
                run: Box::new(task),
            },
        )
    }

    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        self.tasks.remove(&handle.0).is_some()
    }

    pub fn next_fire_at(&mut self) -> Option<GameTime> {
        self.discard_cancelled_head();
        self.heap.peek().map(|Reverse(key)| key.fire_at)
    }

    /// Removes the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: GameTime) -> Option<DueTask<C>> {
        self.discard_cancelled_head();
        let Reverse(key) = *self.heap.peek()?;
        if !now.has_reached(key.fire_at) {
            return None;
        }
        self.heap.pop();
        let task = self.tasks.remove(&key.sequence)?;
        Some(DueTask {
            handle: TaskHandle(key.sequence),
            label: task.label,
            fire_at: key.fire_at,
            now,
            body: task.body,
        })
    }

    /// Puts a repeating task back under its original handle.
    pub fn rearm(&mut self, rearm: Rearm<C>) {
        let mut next = rearm.fire_at + rearm.interval;
        if rearm.now.has_reached(next) {
            next = rearm.now + rearm.interval;
        }
        let sequence = rearm.handle.0;
        self.tasks.insert(
            sequence,
            PendingTask {
                label: rearm.label,
                body: TaskBody::Repeating {
                    interval: rearm.interval,
                    run: rearm.run,
                },
            },
        );
        self.heap.push(Reverse(QueueKey {
            fire_at: next,
            sequence,
        }));
    }

    fn push(&mut self, fire_at: GameTime, label: &'static str, body: TaskBody<C>) -> TaskHandle {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.tasks.insert(sequence, PendingTask { label, body });
        self.heap.push(Reverse(QueueKey { fire_at, sequence }));
        TaskHandle(sequence)
    }

    fn discard_cancelled_head(&mut self) {
        while let Some(Reverse(key)) = self.heap.peek() {
            if self.tasks.contains_key(&key.sequence) {
                break;
            }
            self.heap.pop();
        }
    }
}

pub struct DueTask<C> {
    handle: TaskHandle,
    label: &'static str,
    fire_at: GameTime,
    now: GameTime,
    body: TaskBody<C>,
}

pub struct Rearm<C> {
    handle: TaskHandle,
    label: &'static str,
    fire_at: GameTime,
    now: GameTime,
    interval: Duration,
    run: RepeatFn<C>,
}

impl<C> DueTask<C> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    /// Runs the task; repeating tasks hand back what `TaskQueue::rearm` needs.
    pub fn run(self, context: &mut C) -> Option<Rearm<C>> {
        match self.body {
            TaskBody::Once(task) => {
                task(context);
                None
            }
            TaskBody::Repeating { interval, mut run } => {
                run(context);
                Some(Rearm {
                    handle: self.handle,
                    label: self.label,
                    fire_at: self.fire_at,
                    now: self.now,
                    interval,
                    run,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        entries: Vec<&'static str>,
    }

    fn drain(queue: &mut TaskQueue<Log>, log: &mut Log, now: GameTime) {
        while let Some(task) = queue.pop_due(now) {
            if let Some(rearm) = task.run(log) {
                queue.rearm(rearm);
            }
        }
    }

    #[test]
    fn due_tasks_run_in_time_then_insertion_order() {
        let mut queue = TaskQueue::<Log>::new();
        let mut log = Log::default();
        queue.schedule_at(GameTime::from_secs(2), "late", |log| log.entries.push("late"));
        queue.schedule_at(GameTime::from_secs(1), "first", |log| log.entries.push("first"));
        queue.schedule_at(GameTime::from_secs(1), "second", |log| {
            log.entries.push("second")
        });

        drain(&mut queue, &mut log, GameTime::from_millis(1500));
        assert_eq!(log.entries, vec!["first", "second"]);
        drain(&mut queue, &mut log, GameTime::from_secs(2));
        assert_eq!(log.entries, vec!["first", "second", "late"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let mut queue = TaskQueue::<Log>::new();
        let mut log = Log::default();
        let handle = queue.schedule_at(GameTime::from_secs(1), "doomed", |log| {
            log.entries.push("doomed")
        });
        assert!(queue.cancel(handle));
        assert!(!queue.cancel(handle));
        drain(&mut queue, &mut log, GameTime::from_secs(5));
        assert!(log.entries.is_empty());
        assert_eq!(queue.next_fire_at(), None);
    }

    #[test]
    fn repeating_task_rearms_without_catch_up_burst() {
        let mut queue = TaskQueue::<Log>::new();
        let mut log = Log::default();
        queue.schedule_repeating(
            GameTime::from_secs(10),
            Duration::from_secs(30),
            "tick",
            |log| log.entries.push("tick"),
        );

        drain(&mut queue, &mut log, GameTime::from_secs(9));
        assert!(log.entries.is_empty());
        drain(&mut queue, &mut log, GameTime::from_secs(10));
        assert_eq!(log.entries.len(), 1);
        assert_eq!(queue.next_fire_at(), Some(GameTime::from_secs(40)));

        // A long stall runs the task once and pushes the next run past `now`.
        drain(&mut queue, &mut log, GameTime::from_secs(200));
        assert_eq!(log.entries.len(), 2);
        assert_eq!(queue.next_fire_at(), Some(GameTime::from_secs(230)));
    }
}
