//! Session, buffer, and image lifecycle for the deepsight vision runtime.
//!
//! The vendor library is an opaque C runtime: everything it computes happens
//! behind `vidi_*` calls. This crate owns the resource bookkeeping around
//! those calls — initialization and symmetric teardown, fill-by-reference
//! query buffers, ownership-tagged images, and status-code resolution — so
//! that the layers above can sequence operations without tracking manual
//! init/free pairs.
//!
//! The backend is injected ([`deepsight_core::Backend`]); the default build
//! talks to the simulated runtime in `deepsight-sim`, while the `vendor`
//! feature adds [`FfiBackend`] over the proprietary SDK.

mod buffer;
#[cfg(feature = "vendor")]
mod ffi;
mod image;
mod resolver;
mod session;

pub use buffer::Buffer;
#[cfg(feature = "vendor")]
pub use ffi::FfiBackend;
pub use image::Image;
pub use resolver::{ErrorResolver, RESOLVE_FALLBACK};
pub use session::{Session, SessionConfig};
