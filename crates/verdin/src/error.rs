//! Error types for green-thread outcomes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Exception payload injected by `kill`/`cancel`, shared so the outcome can
/// be replayed to every waiter.
pub(crate) type ExceptionPayload = Arc<dyn Any + Send + Sync>;

/// Default termination signal injected by [`kill`](crate::kill) and
/// [`cancel`](crate::cancel) when no explicit exception is given.
///
/// A body may catch and suppress it (via `std::panic::catch_unwind` around
/// a suspension point), in which case the green thread completes normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("green thread was cooperatively terminated")]
pub struct Terminated;

/// Why a green thread produced no value.
///
/// Returned by [`GreenThread::wait`](crate::GreenThread::wait). Cloneable so
/// every waiter observes the same outcome.
#[derive(Clone, Error)]
pub enum JoinError {
    /// The green thread was terminated by `kill` or `cancel`. The payload is
    /// the injected exception; recover it with [`JoinError::downcast_ref`].
    #[error("green thread was killed")]
    Killed(ExceptionPayload),

    /// The body panicked on its own.
    #[error("green thread panicked: {0}")]
    Panicked(String),
}

impl JoinError {
    pub(crate) fn killed(payload: ExceptionPayload) -> Self {
        JoinError::Killed(payload)
    }

    /// Build a `JoinError` from a payload caught at the body boundary.
    /// Injected terminations are unwrapped back into `Killed`; organic
    /// panics keep their message where one can be recovered.
    pub(crate) fn from_unwind(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<Injected>() {
            Ok(injected) => JoinError::Killed(injected.0),
            Err(payload) => JoinError::Panicked(panic_message(payload.as_ref())),
        }
    }

    /// The injected exception, if this is a `Killed` outcome of type `E`.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        match self {
            JoinError::Killed(payload) => payload.downcast_ref::<E>(),
            JoinError::Panicked(_) => None,
        }
    }

    /// True when the green thread was killed with the default
    /// [`Terminated`] signal.
    pub fn is_terminated(&self) -> bool {
        self.downcast_ref::<Terminated>().is_some()
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Killed(payload) => {
                if payload.downcast_ref::<Terminated>().is_some() {
                    f.debug_tuple("Killed").field(&Terminated).finish()
                } else {
                    f.debug_tuple("Killed").field(&"<exception>").finish()
                }
            }
            JoinError::Panicked(msg) => f.debug_tuple("Panicked").field(msg).finish(),
        }
    }
}

/// Wrapper distinguishing injected terminations from organic panics when the
/// body wrapper catches an unwind.
pub(crate) struct Injected(pub(crate) ExceptionPayload);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
