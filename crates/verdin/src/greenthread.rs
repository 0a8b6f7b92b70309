//! Green threads: spawning, voluntary yielding, and termination.
//!
//! A [`GreenThread`] wraps an execution context together with a one-shot
//! outcome and an ordered list of completion callbacks. Spawning never runs
//! the body synchronously; the hub switches into it on a later pass.
//! Termination is asymmetric: [`kill`] interrupts a running body at its
//! current suspension point, while [`cancel`] only takes effect if the body
//! has not started yet.

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::{Context, Resume};
use crate::error::{ExceptionPayload, JoinError, Terminated};
use crate::event::Event;
use crate::hub::{Binding, Hub, JobKind, Timer};

/// Stack size for the thread backing each green thread's context.
const CONTEXT_STACK_SIZE: usize = 256 * 1024;

static NEXT_GREEN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a green thread.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GreenId(u64);

impl GreenId {
    fn generate() -> Self {
        GreenId(NEXT_GREEN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

type Body<T> = Box<dyn FnOnce() -> T + Send>;
type LinkFn<T> = Box<dyn FnOnce(&GreenThread<T>) + Send>;

/// Where a green thread is in its life.
///
/// `Finished` marks a completion synthesized by `kill`/`cancel` before the
/// body ever ran; once a body has started, liveness is tracked by its
/// context instead.
enum Lifecycle<T> {
    NotStarted(Body<T>),
    Started,
    Finished,
}

struct GreenInner<T> {
    id: GreenId,
    hub: Hub,
    ctx: Context,
    lifecycle: Mutex<Lifecycle<T>>,
    outcome: Event<Result<T, JoinError>>,
    links: Mutex<Vec<LinkFn<T>>>,
}

/// Handle to a unit of cooperatively scheduled work.
///
/// Returned by every spawning operation. Cloneable; any holder may wait for
/// the outcome, register completion callbacks, or terminate the body.
pub struct GreenThread<T> {
    inner: Arc<GreenInner<T>>,
}

impl<T> Clone for GreenThread<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Hub {
    /// Schedule `body` to run as a new green thread on this hub's next
    /// pass. Control never transfers synchronously; the handle is returned
    /// before the body has had any chance to run.
    pub fn spawn<T, F>(&self, body: F) -> GreenThread<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let green = GreenThread::new(self.clone(), body);
        let launch = green.clone();
        self.next_tick(JobKind::Start(Box::new(move || launch.launch())));
        green
    }

    /// Like [`Hub::spawn`], but the body starts only after `delay` has
    /// elapsed. Until then the returned handle can be
    /// [`cancel`](GreenThread::cancel)led to keep the body from ever
    /// running.
    pub fn spawn_after<T, F>(&self, delay: Duration, body: F) -> GreenThread<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let green = GreenThread::new(self.clone(), body);
        let launch = green.clone();
        self.call_later(delay, JobKind::Start(Box::new(move || launch.launch())));
        green
    }
}

impl<T> GreenThread<T> {
    fn new<F>(hub: Hub, body: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            inner: Arc::new(GreenInner {
                id: GreenId::generate(),
                hub,
                ctx: Context::new(),
                lifecycle: Mutex::new(Lifecycle::NotStarted(Box::new(body))),
                outcome: Event::new(),
                links: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> GreenId {
        self.inner.id
    }

    /// The hub this green thread was spawned on.
    pub fn hub(&self) -> &Hub {
        &self.inner.hub
    }

    /// True once the body has been switched into. Stays false forever for a
    /// green thread cancelled before its first run.
    pub fn has_started(&self) -> bool {
        self.inner.ctx.has_started()
    }

    /// True once the outcome is set, by completion or by termination.
    pub fn is_finished(&self) -> bool {
        self.inner.outcome.is_set()
    }

    /// Block until the body completes, then return its value or the error
    /// it ended with. Repeatable: every call, from any caller, observes the
    /// same outcome.
    pub fn wait(&self) -> Result<T, JoinError>
    where
        T: Clone,
    {
        self.inner.outcome.wait()
    }

    /// Register a completion callback.
    ///
    /// Callbacks fire exactly once each, in registration order, immediately
    /// after the outcome is set, in the completing execution context. If
    /// the outcome is already set when `link` is called, the callback fires
    /// immediately and synchronously in the caller's context.
    pub fn link<F>(&self, callback: F)
    where
        F: FnOnce(&GreenThread<T>) + Send + 'static,
    {
        {
            let mut links = self.inner.links.lock();
            if !self.inner.outcome.is_set() {
                links.push(Box::new(callback));
                return;
            }
        }
        callback(self);
    }

    /// Terminate the body wherever it is, injecting [`Terminated`].
    ///
    /// A body that has not started never runs; its outcome is synthesized
    /// on the spot. A running body observes the injection at its current
    /// suspension point and unwinds (drop cleanup included) unless it
    /// catches it. A dead target is a no-op. Calling `kill` cooperatively
    /// yields the calling context for one hub pass.
    pub fn kill(&self) {
        self.kill_with(Terminated);
    }

    /// [`kill`](GreenThread::kill) with a custom exception value, later
    /// recoverable via [`JoinError::downcast_ref`].
    pub fn kill_with<E>(&self, exc: E)
    where
        E: Any + Send + Sync,
    {
        self.kill_impl(Arc::new(exc));
    }

    /// Terminate the body only if it has not started running; a started or
    /// finished target is left untouched.
    pub fn cancel(&self) {
        self.cancel_with(Terminated);
    }

    /// [`cancel`](GreenThread::cancel) with a custom exception value.
    pub fn cancel_with<E>(&self, exc: E)
    where
        E: Any + Send + Sync,
    {
        if self.take_unstarted() {
            self.finish(Err(JoinError::killed(Arc::new(exc))), true);
            self.yield_from_kill(None);
        }
    }

    fn kill_impl(&self, payload: ExceptionPayload) {
        let not_started = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Finished => return,
                Lifecycle::NotStarted(_) => {
                    *lifecycle = Lifecycle::Finished;
                    true
                }
                Lifecycle::Started => false,
            }
        };

        if not_started {
            // The body never runs. Synthesize the completion right here, in
            // the killer's context; callback panics must not escape a kill.
            self.finish(Err(JoinError::killed(payload)), true);
            self.yield_from_kill(None);
            return;
        }

        if self.inner.ctx.is_dead() {
            return;
        }
        self.yield_from_kill(Some(payload));
    }

    /// `NotStarted -> Finished`, returning whether the transition happened.
    /// The untaken body is dropped.
    fn take_unstarted(&self) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::NotStarted(_) => {
                *lifecycle = Lifecycle::Finished;
                true
            }
            _ => false,
        }
    }

    /// The tail of every termination: optionally inject `payload` into the
    /// target context, and cooperatively yield the calling context unless
    /// it is the hub itself.
    ///
    /// Injection is a control transfer, so a non-hub caller queues its own
    /// next-pass resumption first; without it the caller could stall
    /// forever if the target was the only other runnable context.
    fn yield_from_kill(&self, inject: Option<ExceptionPayload>) {
        let binding = Binding::obtain(Some(&self.inner.hub));

        if binding.is_hub_context() {
            // Timer- or pass-driven kill: inject directly and take control
            // back once the target yields. No self-resumption is needed.
            if let Some(payload) = inject {
                if self.inner.ctx.post(Resume::Throw(payload)) {
                    let _ = self.inner.hub.ctx().park_for_control();
                }
            }
            return;
        }

        let resume_self = JobKind::Resume(binding.ctx().clone());
        match inject {
            Some(payload) if binding.holds_control() => {
                self.inner.hub.next_tick(resume_self);
                if self.inner.ctx.post(Resume::Throw(payload)) {
                    // Control went straight to the target; park until our
                    // queued resumption comes around.
                    binding.park_surfacing();
                } else {
                    binding.yield_to_hub();
                }
            }
            Some(payload) => {
                // This thread is not currently scheduled in the domain; let
                // the hub perform the injection, ordered before our wake-up.
                self.inner
                    .hub
                    .next_tick(JobKind::Throw(self.inner.ctx.clone(), payload));
                self.inner.hub.next_tick(resume_self);
                binding.yield_to_hub();
            }
            None => {
                self.inner.hub.next_tick(resume_self);
                binding.yield_to_hub();
            }
        }
    }

    /// Set the outcome, then fire the registered callbacks in order. Each
    /// callback receives the handle and runs in the completing context, so
    /// a callback that yields behaves as if the body had kept running.
    fn finish(&self, outcome: Result<T, JoinError>, suppress_link_panics: bool) {
        self.inner.outcome.set(outcome);
        let links = mem::take(&mut *self.inner.links.lock());
        for link in links {
            if suppress_link_panics {
                let _ = panic::catch_unwind(AssertUnwindSafe(|| link(self)));
            } else {
                link(self);
            }
        }
    }
}

impl<T: Send + 'static> GreenThread<T> {
    /// Runs in the hub context. Takes the body and hands control to a fresh
    /// backing thread; returns false if a cancellation got here first.
    fn launch(&self) -> bool {
        let body = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::NotStarted(_) => {
                    match mem::replace(&mut *lifecycle, Lifecycle::Started) {
                        Lifecycle::NotStarted(body) => body,
                        _ => unreachable!("lifecycle changed under the lock"),
                    }
                }
                _ => return false,
            }
        };
        self.inner.ctx.mark_started();

        let green = self.clone();
        thread::Builder::new()
            .name(format!("green-{}", self.inner.id.as_u64()))
            .stack_size(CONTEXT_STACK_SIZE)
            .spawn(move || green.run(body))
            .expect("Failed to spawn green thread context");
        true
    }

    /// Body wrapper, running on the backing thread with control held.
    fn run(self, body: Body<T>) {
        Binding::bind_green(&self.inner.hub, &self.inner.ctx);

        // Returns control to the hub even if a completion callback unwinds.
        let _guard = CompletionGuard {
            ctx: self.inner.ctx.clone(),
            hub_ctx: self.inner.hub.ctx().clone(),
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(value) => Ok(value),
            Err(payload) => Err(JoinError::from_unwind(payload)),
        };
        self.finish(outcome, false);
    }
}

/// Marks the context dead and yields to the hub when the backing thread is
/// done, whether the wrapper returned or unwound.
struct CompletionGuard {
    ctx: Context,
    hub_ctx: Context,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.ctx.mark_dead();
        self.hub_ctx.post(Resume::Continue);
    }
}

impl<T> fmt::Debug for GreenThread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GreenThread")
            .field("id", &self.inner.id)
            .field("started", &self.has_started())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Spawn `body` as a green thread on the calling thread's hub.
///
/// The body is merely scheduled; it runs no earlier than the caller's next
/// suspension point.
pub fn spawn<T, F>(body: F) -> GreenThread<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Hub::current().spawn(body)
}

/// Spawn `body` after `delay` on the calling thread's hub. It runs as
/// scheduled even if the spawning green thread has since completed.
pub fn spawn_after<T, F>(delay: Duration, body: F) -> GreenThread<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Hub::current().spawn_after(delay, body)
}

/// Yield to other eligible green threads until at least `duration` has
/// elapsed.
///
/// `Duration::ZERO` is the canonical cooperative yield: it defers to the
/// hub's next pass without touching the timer heap. Worth calling
/// occasionally inside long CPU-bound loops; nothing else runs between
/// suspension points.
///
/// # Panics
///
/// Panics when called from the hub context; blocking operations do not
/// belong in the dispatcher.
pub fn sleep(duration: Duration) {
    let binding = Binding::obtain(None);
    binding.assert_not_hub();

    let wake = if duration == Duration::ZERO {
        binding
            .hub()
            .next_tick(JobKind::Resume(binding.ctx().clone()))
    } else {
        binding
            .hub()
            .call_later(duration, JobKind::Resume(binding.ctx().clone()))
    };
    // Cancelled whichever way the sleep ends, so no stale wake-up can
    // outlive this call and re-invoke the context later.
    let _cancel = CancelOnDrop(wake);
    binding.yield_to_hub();
}

/// Suspend the current green thread for at least one hub pass.
///
/// With `resume` false the caller is not rescheduled and will only run
/// again if something else resumes it — typically a `kill`.
///
/// # Panics
///
/// Panics when called from the hub context.
pub fn suspend(resume: bool) {
    let binding = Binding::obtain(None);
    binding.assert_not_hub();

    if resume {
        binding
            .hub()
            .next_tick(JobKind::Resume(binding.ctx().clone()));
    }
    binding.yield_to_hub();
}

/// Terminate `green` wherever it is. See [`GreenThread::kill`].
pub fn kill<T>(green: &GreenThread<T>) {
    green.kill();
}

/// Terminate `green` only if it has not started running. See
/// [`GreenThread::cancel`].
pub fn cancel<T>(green: &GreenThread<T>) {
    green.cancel();
}

struct CancelOnDrop(Timer);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
