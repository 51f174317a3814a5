//! Numeric status-code contract of the runtime ABI.
//!
//! Every backend (FFI or simulated) reports faults as one of these codes.
//! `deepsight-vidi-sys` mirrors them under their C constant names.

pub const SUCCESS: u32 = 0;
pub const INTERNAL_ERROR: u32 = 1;
pub const ALREADY_INITIALIZED: u32 = 2;
pub const NOT_INITIALIZED: u32 = 3;
pub const RESOURCE_NOT_FOUND: u32 = 4;
pub const INVALID_STATE: u32 = 5;
pub const INVALID_ARGUMENT: u32 = 6;
pub const OUT_OF_MEMORY: u32 = 7;
pub const LICENSE_ERROR: u32 = 8;

/// Canonical message for a known status code, used when a backend has no
/// richer detail to report.
pub fn describe(code: u32) -> &'static str {
    match code {
        SUCCESS => "success",
        INTERNAL_ERROR => "internal runtime error",
        ALREADY_INITIALIZED => "the runtime is already initialized",
        NOT_INITIALIZED => "the runtime is not initialized",
        RESOURCE_NOT_FOUND => "resource not found",
        INVALID_STATE => "operation attempted out of sequence",
        INVALID_ARGUMENT => "invalid argument",
        OUT_OF_MEMORY => "out of memory",
        LICENSE_ERROR => "license check failed",
        _ => "unknown error",
    }
}
