use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::domain::calendar::Clock;

/// What a task wants after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// Run again on the next tick.
    Now,
    /// Run again once the clock reaches this UTC second.
    At(i64),
    /// Drop the task.
    Never,
}

pub trait Task {
    fn name(&self) -> &str;
    fn step(&mut self) -> Reschedule;
}

struct Entry {
    task: Box<dyn Task>,
    due_utc: i64,
}

/// Cooperative single-threaded scheduler. Tasks never block; each step returns
/// the time it wants to run next.
pub struct Scheduler<C> {
    clock: C,
    tick: Duration,
    entries: Vec<Entry>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C, tick: Duration) -> Self {
        Self {
            clock,
            tick,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, task: Box<dyn Task>) {
        tracing::debug!(task = task.name(), "task registered");
        self.entries.push(Entry { task, due_utc: 0 });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Steps every task that is due once. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let now = self.clock.now_utc();
        let mut ran = 0;

        self.entries.retain_mut(|entry| {
            if entry.due_utc > now {
                return true;
            }
            ran += 1;
            match entry.task.step() {
                Reschedule::Now => {
                    entry.due_utc = now;
                    true
                }
                Reschedule::At(due_utc) => {
                    entry.due_utc = due_utc;
                    true
                }
                Reschedule::Never => {
                    tracing::info!(task = entry.task.name(), "task finished");
                    false
                }
            }
        });

        ran
    }

    pub fn run(&mut self, stop_flag: Arc<AtomicBool>) {
        while !stop_flag.load(Ordering::Relaxed) && !self.entries.is_empty() {
            self.run_pending();
            std::thread::sleep(self.tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use super::{Reschedule, Scheduler, Task};
    use crate::test_support::FakeClock;

    struct ScriptedTask {
        replies: Vec<Reschedule>,
        calls: Rc<RefCell<usize>>,
    }

    impl Task for ScriptedTask {
        fn name(&self) -> &str {
            "scripted"
        }

        fn step(&mut self) -> Reschedule {
            let mut calls = self.calls.borrow_mut();
            let reply = self
                .replies
                .get(*calls)
                .copied()
                .unwrap_or(Reschedule::Never);
            *calls += 1;
            reply
        }
    }

    #[test]
    fn honors_delays_and_drops_finished_tasks() {
        let clock = FakeClock::new(1_000);
        let calls = Rc::new(RefCell::new(0));
        let mut scheduler = Scheduler::new(clock.clone(), Duration::from_millis(1));
        scheduler.register(Box::new(ScriptedTask {
            replies: vec![Reschedule::Now, Reschedule::At(1_010), Reschedule::Never],
            calls: Rc::clone(&calls),
        }));

        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(scheduler.run_pending(), 0);

        clock.set(1_009);
        assert_eq!(scheduler.run_pending(), 0);

        clock.set(1_010);
        assert_eq!(scheduler.run_pending(), 1);
        assert!(scheduler.is_empty());
        assert_eq!(*calls.borrow(), 3);
    }
}
