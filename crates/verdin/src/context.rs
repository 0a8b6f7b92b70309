//! Execution-context primitive underlying every green thread.
//!
//! A context is a resumable point of control backed by a dedicated OS
//! thread. Control moves between contexts by posting a [`Resume`] payload
//! into the target's mailbox and then parking the current thread; within
//! one hub domain at most one context is unparked at any instant, so the
//! whole arrangement behaves as a single logical thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::ExceptionPayload;

/// Payload delivered to a context when it is switched back in.
pub(crate) enum Resume {
    /// Plain resumption; the suspension point returns normally.
    Continue,
    /// Exception injection; the suspension point unwinds with this payload.
    Throw(ExceptionPayload),
    /// Advisory wake for the hub context, posted by threads outside the
    /// domain. Never hands over control; parked tasks and a hub waiting for
    /// control to return both discard it.
    Nudge,
}

struct ContextInner {
    /// False until the context is first switched into.
    started: AtomicBool,
    /// True once the context has returned or unwound for good. Terminal.
    dead: AtomicBool,
    mailbox: Mutex<VecDeque<Resume>>,
    available: Condvar,
}

/// Handle to a switchable execution context.
#[derive(Clone)]
pub(crate) struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// A context that has not yet been switched into.
    pub(crate) fn new() -> Self {
        Self::with_started(false)
    }

    /// Adopt the calling thread as an already-running context (the root of
    /// a hub domain, or the hub's own dispatcher).
    pub(crate) fn adopted() -> Self {
        Self::with_started(true)
    }

    fn with_started(started: bool) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                started: AtomicBool::new(started),
                dead: AtomicBool::new(false),
                mailbox: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
            }),
        }
    }

    pub(crate) fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mark_started(&self) {
        self.inner.started.store(true, Ordering::Release);
    }

    pub(crate) fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dead(&self) {
        self.inner.dead.store(true, Ordering::Release);
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.inner.dead.load(Ordering::Acquire)
    }

    /// Deposit a resumption payload. Returns false (and drops the payload)
    /// if the context is already dead; a stale timer or queued wake aimed at
    /// a finished context must not wedge the hub.
    pub(crate) fn post(&self, resume: Resume) -> bool {
        if self.is_dead() {
            return false;
        }
        let mut mailbox = self.inner.mailbox.lock();
        mailbox.push_back(resume);
        self.inner.available.notify_one();
        true
    }

    /// Park the calling thread until a payload arrives.
    pub(crate) fn park(&self) -> Resume {
        let mut mailbox = self.inner.mailbox.lock();
        loop {
            if let Some(resume) = mailbox.pop_front() {
                return resume;
            }
            self.inner.available.wait(&mut mailbox);
        }
    }

    /// Park until a payload arrives or `deadline` passes. `None` on timeout.
    pub(crate) fn park_until(&self, deadline: Instant) -> Option<Resume> {
        let mut mailbox = self.inner.mailbox.lock();
        loop {
            if let Some(resume) = mailbox.pop_front() {
                return Some(resume);
            }
            if self.inner.available.wait_until(&mut mailbox, deadline).timed_out() {
                return mailbox.pop_front();
            }
        }
    }

    /// Park until control is actually handed over, discarding nudges.
    /// Used by the hub while it waits for a running context to yield back.
    pub(crate) fn park_for_control(&self) -> Resume {
        loop {
            match self.park() {
                Resume::Nudge => continue,
                resume => return resume,
            }
        }
    }
}
