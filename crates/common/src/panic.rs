//! Panic reporting primitives.
//!
//! The operator supplies one [`OnPanic`] callback at startup. Every recovered
//! panic, whether in a request handler or a de-auth listener, is delivered to
//! it as a [`PanicReport`] through [`deliver`].

use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Once},
};

use tracing::error;

/// Structured description of a recovered panic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanicReport {
    pub message: String,
    pub url: String,
    /// Request parameters serialized as JSON.
    pub params: String,
    pub stack: String,
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic at {}: {}", self.url, self.message)
    }
}

/// Operator callback invoked once per recovered panic.
pub type OnPanic = Arc<dyn Fn(&PanicReport) + Send + Sync>;

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Chain a panic hook that records the backtrace of the panicking thread.
///
/// The backtrace is taken at the panic site, so [`take_backtrace`] called
/// right after `catch_unwind` on the same thread returns the frames of the
/// failing handler rather than the frames of the guard.
pub fn install_backtrace_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let captured = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(captured);
                }
            });
            previous(info);
        }));
    });
}

/// Take the backtrace recorded by the hook, or capture one here.
pub fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.try_borrow_mut().ok().and_then(|mut s| s.take()))
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".into()
    }
}

/// Hand a report to the operator callback.
///
/// A panic raised by the callback itself is logged and dropped.
pub fn deliver(on_panic: &OnPanic, report: &PanicReport) {
    if panic::catch_unwind(AssertUnwindSafe(|| on_panic(report))).is_err() {
        error!(url = %report.url, message = %report.message, "panic handler panicked, report dropped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn message_from_str_and_string_payloads() {
        let err = panic::catch_unwind::<_, ()>(|| panic!("static boom")).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "static boom");

        let code = 7;
        let err = panic::catch_unwind::<_, ()>(|| panic!("boom {code}")).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "boom 7");

        let err = panic::catch_unwind::<_, ()>(|| panic::panic_any(42_u8)).unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "panic with non-string payload");
    }

    #[test]
    fn hook_records_backtrace_for_this_thread() {
        install_backtrace_hook();
        let _ = panic::catch_unwind::<_, ()>(|| panic!("traced"));
        let stack = take_backtrace();
        assert!(!stack.is_empty());
    }

    #[test]
    fn deliver_survives_panicking_callback() {
        fn exploding(_: &PanicReport) {
            panic!("callback exploded");
        }
        let on_panic: OnPanic = Arc::new(exploding);
        deliver(&on_panic, &PanicReport::default());
    }

    #[test]
    fn deliver_passes_report_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_panic: OnPanic = Arc::new(move |r| sink.lock().unwrap().push(r.url.clone()));
        deliver(&on_panic, &PanicReport {
            url: "/x".into(),
            ..Default::default()
        });
        assert_eq!(*seen.lock().unwrap(), vec!["/x".to_string()]);
    }
}
