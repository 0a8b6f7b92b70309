//! One-shot future: a write-once container with blocking, replayable reads.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::hub::{Binding, Hub, JobKind};

/// A write-once, read-many result slot.
///
/// [`set`](Event::set) may be called exactly once. [`wait`](Event::wait) is
/// a suspension point: it parks the calling green thread until the value
/// arrives, then returns a clone of it — to any number of waiters, whether
/// they blocked beforehand or asked afterwards.
pub struct Event<T> {
    inner: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum State<T> {
    Unset { waiters: Vec<Waiter> },
    Set(T),
}

/// A parked waiter. The hub is recorded alongside the context so waking
/// goes through the waiter's own scheduler, wherever `set` is called from.
struct Waiter {
    hub: Hub,
    ctx: Context,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Unset {
                waiters: Vec::new(),
            })),
        }
    }

    /// Store the value and schedule every parked waiter to resume.
    ///
    /// # Panics
    ///
    /// Panics if the event is already set; an event fires once.
    pub fn set(&self, value: T) {
        let waiters = {
            let mut state = self.inner.lock();
            match &mut *state {
                State::Set(_) => panic!("event already set"),
                State::Unset { waiters } => {
                    let waiters = mem::take(waiters);
                    *state = State::Set(value);
                    waiters
                }
            }
        };
        for waiter in waiters {
            waiter.hub.next_tick(JobKind::Resume(waiter.ctx));
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(*self.inner.lock(), State::Set(_))
    }

    /// Block the calling green thread until the value is set, then return a
    /// clone of it.
    pub fn wait(&self) -> T
    where
        T: Clone,
    {
        let binding = Binding::obtain(None);
        binding.assert_not_hub();
        loop {
            {
                let mut state = self.inner.lock();
                match &mut *state {
                    State::Set(value) => return value.clone(),
                    State::Unset { waiters } => waiters.push(Waiter {
                        hub: binding.hub().clone(),
                        ctx: binding.ctx().clone(),
                    }),
                }
            }
            binding.yield_to_hub();
        }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}
