//! Cooperative green-thread scheduling on a single logical thread.
//!
//! Lightweight tasks multiplex onto one hub via explicit continuation
//! switches: at most one green thread runs at any instant, and control
//! moves only at suspension points ([`sleep`], [`suspend`],
//! [`GreenThread::wait`], [`Event::wait`], and the transfer inside
//! [`kill`]). There is no preemption and no parallelism in this layer.
//!
//! ```
//! use std::time::Duration;
//!
//! let green = verdin::spawn(|| {
//!     verdin::sleep(Duration::from_millis(10));
//!     40 + 2
//! });
//! assert_eq!(green.wait().unwrap(), 42);
//! ```
//!
//! Termination is exception injection: [`kill`] interrupts a running body
//! at its current suspension point (it unwinds, running drop cleanup, into
//! the handle's outcome), while [`cancel`] only takes effect before the
//! body's first run.
//!
//! ```
//! use std::time::Duration;
//!
//! let green = verdin::spawn(|| {
//!     verdin::sleep(Duration::from_secs(5));
//!     "never returned"
//! });
//! green.cancel();
//! assert!(green.wait().unwrap_err().is_terminated());
//! ```
//!
//! Each OS thread is bound to at most one [`Hub`]; the first blocking call
//! adopts the thread as that hub's root context. Injection rides
//! unwinding, so the crate requires the default `panic = "unwind"`
//! strategy.

mod context;
mod error;
mod event;
mod greenthread;
mod hub;

pub use error::{JoinError, Terminated};
pub use event::Event;
pub use greenthread::{cancel, kill, sleep, spawn, spawn_after, suspend, GreenId, GreenThread};
pub use hub::Hub;
