//! The hub: ready queue, timer ordering, and the dispatcher context that
//! green threads switch back into.
//!
//! Every hub owns one dispatcher thread. A pass drains the ready queue in
//! FIFO order, fires due timers (earliest first, ties in registration
//! order), then parks until the next deadline or until new work is posted
//! from outside the domain. Running a job that hands control to a context
//! parks the dispatcher until that context yields back, so at most one
//! context in the domain ever runs at a time.

mod timer;

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context::{Context, Resume};
use crate::error::{ExceptionPayload, Injected};

pub(crate) use timer::Timer;
use timer::TimerWheel;

/// How long [`Hub::shutdown`] waits for the dispatcher to finish before
/// giving up and detaching it.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

static NEXT_HUB_ID: AtomicU64 = AtomicU64::new(1);

/// Work queued for a hub pass.
pub(crate) enum JobKind {
    /// Switch into a parked context.
    Resume(Context),
    /// Switch into a parked context by injecting an exception.
    Throw(Context, ExceptionPayload),
    /// Launch a not-yet-started green thread. Returns true when control was
    /// actually handed over (false when the launch was pre-empted by a
    /// cancellation).
    Start(Box<dyn FnOnce() -> bool + Send>),
}

pub(crate) struct Job {
    kind: JobKind,
    timer: Timer,
}

impl Job {
    pub(crate) fn new(kind: JobKind) -> Self {
        Self {
            kind,
            timer: Timer::new(),
        }
    }

    pub(crate) fn timer(&self) -> Timer {
        self.timer.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.timer.is_cancelled()
    }
}

struct HubCore {
    id: u64,
    /// The dispatcher's own context.
    ctx: Context,
    ready: Mutex<VecDeque<Job>>,
    timers: Mutex<TimerWheel>,
    shutdown: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Handle to a scheduler.
///
/// Cloneable and cheap to share; every green thread carries the hub it was
/// spawned on. Each OS thread is bound to at most one hub: the first
/// blocking call (or [`Hub::current`]) adopts the thread as a root context
/// of that hub, and touching a second hub's blocking surface from the same
/// thread is a programming error.
#[derive(Clone)]
pub struct Hub {
    core: Arc<HubCore>,
}

impl Hub {
    /// Create a hub with its own dispatcher thread. The calling thread is
    /// not bound; use [`Hub::current`] for the common case.
    pub fn new() -> Hub {
        let core = Arc::new(HubCore {
            id: NEXT_HUB_ID.fetch_add(1, Ordering::Relaxed),
            ctx: Context::adopted(),
            ready: Mutex::new(VecDeque::new()),
            timers: Mutex::new(TimerWheel::new()),
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(None),
        });
        let hub = Hub { core };

        let dispatcher = hub.clone();
        let handle = thread::Builder::new()
            .name(format!("verdin-hub-{}", hub.core.id))
            .spawn(move || dispatcher.dispatch())
            .expect("Failed to spawn hub dispatcher thread");
        *hub.core.thread.lock() = Some(handle);

        hub
    }

    /// The hub bound to the calling thread, created and bound on first use.
    /// The calling thread becomes the hub's root context.
    pub fn current() -> Hub {
        Binding::obtain(None).hub.clone()
    }

    /// Stop the dispatcher. Pending jobs and timers are discarded; contexts
    /// still parked stay parked. Joins the dispatcher with a bounded wait.
    pub fn shutdown(&self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.ctx.post(Resume::Nudge);

        if let Some(handle) = self.core.thread.lock().take() {
            let start = Instant::now();
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    return;
                }
                if start.elapsed() > SHUTDOWN_JOIN_TIMEOUT {
                    drop(handle);
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    /// Enqueue `job` for the next pass. The returned [`Timer`] cancels it.
    pub(crate) fn next_tick(&self, kind: JobKind) -> Timer {
        let job = Job::new(kind);
        let timer = job.timer();
        self.core.ready.lock().push_back(job);
        self.maybe_nudge();
        timer
    }

    /// Run `job` once `delay` has elapsed.
    pub(crate) fn call_later(&self, delay: Duration, kind: JobKind) -> Timer {
        let job = Job::new(kind);
        let timer = job.timer();
        let wake_at = Instant::now() + delay;
        self.core.timers.lock().register(wake_at, job);
        self.maybe_nudge();
        timer
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.core.ctx
    }

    pub(crate) fn same_as(&self, other: &Hub) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Wake the dispatcher if the enqueue came from outside the domain's
    /// single running context. An in-domain caller is about to yield anyway,
    /// and waking the dispatcher under it would let two contexts run.
    fn maybe_nudge(&self) {
        let in_domain = Binding::try_current().is_some_and(|binding| {
            binding.hub_is(self) && (binding.holds_control() || binding.is_hub_context())
        });
        if !in_domain {
            self.core.ctx.post(Resume::Nudge);
        }
    }

    fn dispatch(self) {
        Binding::bind_dispatcher(&self);
        loop {
            if self.core.shutdown.load(Ordering::Acquire) {
                break;
            }

            // Ready jobs enqueued during this pass run on the next one.
            let batch: Vec<Job> = {
                let mut ready = self.core.ready.lock();
                ready.drain(..).collect()
            };
            for job in batch {
                self.run_job(job);
            }

            loop {
                let due = self.core.timers.lock().pop_due(Instant::now());
                match due {
                    Some(job) => self.run_job(job),
                    None => break,
                }
            }

            if self.core.shutdown.load(Ordering::Acquire) {
                break;
            }
            if !self.core.ready.lock().is_empty() {
                continue;
            }

            let deadline = self.core.timers.lock().next_deadline();
            match deadline {
                Some(at) => {
                    let _ = self.core.ctx.park_until(at);
                }
                None => {
                    // Nothing scheduled; wait for a yield-in or a nudge.
                    let _ = self.core.ctx.park();
                }
            }
        }
    }

    fn run_job(&self, job: Job) {
        if job.is_cancelled() {
            return;
        }
        let handed_over = match job.kind {
            JobKind::Resume(ctx) => ctx.post(Resume::Continue),
            JobKind::Throw(ctx, payload) => ctx.post(Resume::Throw(payload)),
            JobKind::Start(launch) => launch(),
        };
        if handed_over {
            let _ = self.core.ctx.park_for_control();
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Hub::new()
    }
}

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Rc<Binding>>> =
        const { std::cell::RefCell::new(None) };
}

/// The calling thread's place in a hub domain: which hub it belongs to,
/// which context it runs as, and whether it currently holds the domain's
/// single right-to-run.
pub(crate) struct Binding {
    hub: Hub,
    ctx: Context,
    holds_control: Cell<bool>,
}

impl Binding {
    /// The calling thread's binding, creating one if the thread is unbound.
    ///
    /// With no `hint` an unbound thread founds a fresh hub and starts as its
    /// running root context. With a `hint` (an operation scoped to an
    /// existing hub) the thread is adopted as a root of that hub; it does
    /// not hold control until the hub first resumes it.
    pub(crate) fn obtain(hint: Option<&Hub>) -> Rc<Binding> {
        CURRENT.with(|current| {
            let mut slot = current.borrow_mut();
            if let Some(binding) = slot.as_ref() {
                if let Some(hub) = hint {
                    assert!(
                        binding.hub_is(hub),
                        "this thread is already bound to a different hub"
                    );
                }
                return Rc::clone(binding);
            }

            let (hub, founding) = match hint {
                Some(hub) => (hub.clone(), false),
                None => (Hub::new(), true),
            };
            let binding = Rc::new(Binding {
                hub,
                ctx: Context::adopted(),
                holds_control: Cell::new(founding),
            });
            *slot = Some(Rc::clone(&binding));
            binding
        })
    }

    pub(crate) fn try_current() -> Option<Rc<Binding>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Bind a dispatcher thread as its hub's own context.
    fn bind_dispatcher(hub: &Hub) {
        CURRENT.with(|current| {
            *current.borrow_mut() = Some(Rc::new(Binding {
                hub: hub.clone(),
                ctx: hub.core.ctx.clone(),
                holds_control: Cell::new(false),
            }));
        });
    }

    /// Bind a green thread's backing thread as its own context. It starts
    /// holding control: launch hands the baton straight to the body.
    pub(crate) fn bind_green(hub: &Hub, ctx: &Context) {
        CURRENT.with(|current| {
            *current.borrow_mut() = Some(Rc::new(Binding {
                hub: hub.clone(),
                ctx: ctx.clone(),
                holds_control: Cell::new(true),
            }));
        });
    }

    pub(crate) fn hub(&self) -> &Hub {
        &self.hub
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn hub_is(&self, hub: &Hub) -> bool {
        self.hub.same_as(hub)
    }

    pub(crate) fn is_hub_context(&self) -> bool {
        self.ctx.same_as(&self.hub.core.ctx)
    }

    pub(crate) fn holds_control(&self) -> bool {
        self.holds_control.get()
    }

    /// Hand control to the hub and park until this context is resumed.
    /// An injected exception surfaces here by unwinding.
    pub(crate) fn yield_to_hub(&self) {
        let post = if self.holds_control.get() {
            Resume::Continue
        } else {
            // Not ours to hand over; just let the dispatcher know there may
            // be work, then wait to be scheduled in.
            Resume::Nudge
        };
        self.hub.core.ctx.post(post);
        self.park_surfacing();
    }

    /// Park without posting (the caller already handed control elsewhere,
    /// e.g. by throwing into another context).
    pub(crate) fn park_surfacing(&self) {
        let resume = self.ctx.park_for_control();
        self.holds_control.set(true);
        if let Resume::Throw(payload) = resume {
            std::panic::resume_unwind(Box::new(Injected(payload)));
        }
    }

    /// Asserts this is not the dispatcher context; suspension points must
    /// never be entered from the hub itself.
    pub(crate) fn assert_not_hub(&self) {
        assert!(
            !self.is_hub_context(),
            "do not call blocking operations from the hub context"
        );
    }
}
