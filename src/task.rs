//! The task abstraction and the failure hook.
//!
//! The wheel needs exactly one capability from user code: run it once,
//! possibly failing. [`TimerTask`] models that as a single-method trait; any
//! `Fn(&Timeout)` closure gets it for free. Fallible tasks implement the
//! trait directly and return an error.
//!
//! A failing task — whether it returns `Err` or panics — never reaches the
//! worker loop. The failure is wrapped in a [`TaskFailure`] and handed to the
//! timer's failure hook, and the worker carries on with the rest of the
//! bucket.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::wheel::Timeout;

/// Boxed error type returned by fallible tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A user-supplied action run by the worker when its timeout expires.
///
/// The task runs at most once, on the worker thread, after the timeout's
/// state has transitioned to [`Expired`](crate::TimeoutState::Expired).
pub trait TimerTask: Send + Sync {
    /// Runs the task. Called at most once per timeout.
    fn run(&self, timeout: &Timeout) -> Result<(), BoxError>;
}

impl<F> TimerTask for F
where
    F: Fn(&Timeout) + Send + Sync,
{
    fn run(&self, timeout: &Timeout) -> Result<(), BoxError> {
        self(timeout);
        Ok(())
    }
}

/// Why a task body failed during expiration.
pub enum TaskFailure {
    /// The task returned an error.
    Error(BoxError),
    /// The task panicked; the payload is what `catch_unwind` captured.
    Panic(Box<dyn Any + Send>),
}

impl TaskFailure {
    /// A human-readable description of the failure.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Error(err) => err.to_string(),
            Self::Panic(payload) => {
                if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "non-string panic payload".to_string()
                }
            }
        }
    }

    /// Returns true if the failure was a panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::Panic(_) => f.debug_tuple("Panic").field(&self.message()).finish(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Hook invoked on the worker thread when a task body fails.
pub type FailureHook = Arc<dyn Fn(&Timeout, TaskFailure) + Send + Sync>;

/// The default failure hook: log and move on.
#[must_use]
pub fn default_failure_hook() -> FailureHook {
    Arc::new(|timeout, failure| {
        tracing::error!(
            deadline = ?timeout.deadline(),
            panic = failure.is_panic(),
            "timer task failed: {failure}"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_failure_message_uses_display() {
        let failure = TaskFailure::Error("boom".into());
        assert_eq!(failure.message(), "boom");
        assert!(!failure.is_panic());
    }

    #[test]
    fn panic_failure_message_extracts_str_payloads() {
        let failure = TaskFailure::Panic(Box::new("static str"));
        assert_eq!(failure.message(), "static str");

        let failure = TaskFailure::Panic(Box::new(String::from("owned")));
        assert_eq!(failure.message(), "owned");
        assert!(failure.is_panic());

        let failure = TaskFailure::Panic(Box::new(42_u32));
        assert_eq!(failure.message(), "non-string panic payload");
    }
}
