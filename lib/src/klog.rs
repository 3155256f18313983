//! Kernel logging subsystem.
//!
//! All log output funnels through a single **backend** function pointer.
//! Until a console (or a test harness) registers one, log lines are
//! discarded: the memory manager may log long before any sink exists, and
//! dropping those lines is preferable to touching hardware from here.
//!
//! # Backend contract
//!
//! The backend receives the level and the pre-formatted arguments for a
//! **single log line**. It must write the line atomically with respect to
//! other callers and append its own line terminator.
//!
//! # Registration
//!
//! ```ignore
//! fn serial_backend(level: KlogLevel, args: core::fmt::Arguments<'_>) { /* ... */ }
//!
//! swapvm_lib::klog::klog_register_backend(serial_backend);
//! ```

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crate::cmdline::cmdline_value;

// ---------------------------------------------------------------------------
// Log levels
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            3 => KlogLevel::Debug,
            _ => KlogLevel::Trace,
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        const NAMES: [(&str, KlogLevel); 5] = [
            ("error", KlogLevel::Error),
            ("warn", KlogLevel::Warn),
            ("info", KlogLevel::Info),
            ("debug", KlogLevel::Debug),
            ("trace", KlogLevel::Trace),
        ];
        NAMES
            .iter()
            .find(|(name, _)| value.eq_ignore_ascii_case(name))
            .map(|(_, level)| *level)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KlogLevel::Error => "error",
            KlogLevel::Warn => "warn",
            KlogLevel::Info => "info",
            KlogLevel::Debug => "debug",
            KlogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for KlogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline(always)]
fn is_enabled(level: KlogLevel) -> bool {
    level as u8 <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Backend dispatch
// ---------------------------------------------------------------------------

/// Signature of a klog backend.
pub type KlogBackend = fn(KlogLevel, fmt::Arguments<'_>);

/// Stored as a raw pointer; `null` means "discard".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

#[inline]
fn dispatch(level: KlogLevel, args: fmt::Arguments<'_>) {
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `klog_register_backend` only stores valid `KlogBackend` fn
    // pointers, which have the same size as `*mut ()`.
    let backend: KlogBackend = unsafe { core::mem::transmute(ptr) };
    backend(level, args);
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Route all subsequent log lines to `backend`.
pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

/// Drop the registered backend; later lines are discarded.
pub fn klog_unregister_backend() {
    BACKEND.store(core::ptr::null_mut(), Ordering::Release);
}

/// Reset the level to `Info`, or to the `klog=` value on the command line.
pub fn klog_init(cmdline: Option<&str>) {
    let level = cmdline
        .and_then(|line| cmdline_value(line, "klog"))
        .and_then(KlogLevel::from_str)
        .unwrap_or(KlogLevel::Info);
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Relaxed))
}

/// Whether lines at `level` currently reach the backend.
pub fn klog_is_enabled(level: KlogLevel) -> bool {
    is_enabled(level)
}

/// Emit a formatted log line at the given level.
///
/// Callers should **not** end the format string with a newline.
pub fn log_args(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    dispatch(level, args);
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::klog::log_args($level, ::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Debug, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {
        $crate::klog::log_args($crate::klog::KlogLevel::Trace, ::core::format_args!($($arg)*))
    };
}
