#![cfg_attr(not(test), no_std)]

pub mod alignment;
pub mod cmdline;
pub mod klog;

#[doc(hidden)]
pub use paste;

pub use alignment::{align_down_u64, align_down_usize, align_up_u64, align_up_usize};
pub use alignment::{align_down_usize as align_down, align_up_usize as align_up};
pub use alignment::{whole_pages_u64, whole_pages_usize};
pub use cmdline::{cmdline_value, parse_bool, parse_size, parse_u32};
pub use klog::{
    KlogBackend, KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend,
    klog_set_level, klog_unregister_backend,
};
