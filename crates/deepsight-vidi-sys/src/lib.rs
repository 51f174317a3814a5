//! Raw FFI bindings to the ViDi vision runtime C API.
//!
//! Hand-written declarations for the runtime (`vidi_runtime`) and training
//! (`vidi_training`) libraries. The SDK headers are proprietary, so the
//! surface here covers exactly the calls the safe client uses.
//!
//! # Safety
//! All functions in this module are unsafe FFI calls. Use
//! `deepsight-client` (feature `vendor`) for safe Rust wrappers.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(dead_code)]
#![allow(clippy::all)]

use std::os::raw::{c_char, c_void};

pub type VIDI_UINT = u32;

// Status codes. Values must match `deepsight_core::status`.
pub const VIDI_SUCCESS: VIDI_UINT = 0;
pub const VIDI_INTERNAL_ERROR: VIDI_UINT = 1;
pub const VIDI_ALREADY_INITIALIZED: VIDI_UINT = 2;
pub const VIDI_NOT_INITIALIZED: VIDI_UINT = 3;
pub const VIDI_RESOURCE_NOT_FOUND: VIDI_UINT = 4;
pub const VIDI_INVALID_STATE: VIDI_UINT = 5;
pub const VIDI_INVALID_ARGUMENT: VIDI_UINT = 6;
pub const VIDI_OUT_OF_MEMORY: VIDI_UINT = 7;
pub const VIDI_LICENSE_ERROR: VIDI_UINT = 8;

// GPU modes accepted by `vidi_initialize`.
pub const VIDI_GPU_MODE_NO_SUPPORT: VIDI_UINT = 0;
pub const VIDI_GPU_SINGLE_DEVICE_PER_TOOL: VIDI_UINT = 1;
pub const VIDI_GPU_MULTIPLE_DEVICES_PER_TOOL: VIDI_UINT = 2;

// Debug sinks accepted by `vidi_debug_infos`.
pub const VIDI_DEBUG_SINK_CONSOLE: VIDI_UINT = 1;
pub const VIDI_DEBUG_SINK_FILE: VIDI_UINT = 2;

// Channel depths in `VIDI_IMAGE::channel_depth`.
pub const VIDI_IMG_8U: VIDI_UINT = 0;
pub const VIDI_IMG_16U: VIDI_UINT = 1;

// Encoded formats for `vidi_load_image_from_memory`.
pub const VIDI_IMAGE_FORMAT_PNG: VIDI_UINT = 0;
pub const VIDI_IMAGE_FORMAT_BMP: VIDI_UINT = 1;
pub const VIDI_IMAGE_FORMAT_TIFF: VIDI_UINT = 2;

/// Response buffer filled by query-style calls. Initialize with
/// `vidi_init_buffer` before first use; release with `vidi_free_buffer`
/// (or let `vidi_deinitialize` sweep it).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VIDI_BUFFER {
    pub data: *mut c_char,
    pub size: VIDI_UINT,
}

/// Image descriptor. Either filled by the library (`vidi_init_image` +
/// `vidi_load_image*`, release with `vidi_free_image`) or populated by the
/// caller with caller-owned pixel memory (never pass those to
/// `vidi_free_image`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VIDI_IMAGE {
    pub width: VIDI_UINT,
    pub height: VIDI_UINT,
    pub channels: VIDI_UINT,
    pub channel_depth: VIDI_UINT,
    /// Row stride in bytes.
    pub step: VIDI_UINT,
    pub data: *mut c_void,
}

extern "C" {
    // Library lifecycle
    pub fn vidi_initialize(gpu_mode: VIDI_UINT, device_list: *const c_char) -> VIDI_UINT;
    pub fn vidi_deinitialize() -> VIDI_UINT;
    pub fn vidi_debug_infos(sink: VIDI_UINT, path: *const c_char) -> VIDI_UINT;
    pub fn vidi_optimized_gpu_memory(size_bytes: u64) -> VIDI_UINT;

    // Queries
    pub fn vidi_version(buffer: *mut VIDI_BUFFER) -> VIDI_UINT;
    pub fn vidi_license_get_info(buffer: *mut VIDI_BUFFER) -> VIDI_UINT;
    pub fn vidi_list_compute_devices(buffer: *mut VIDI_BUFFER) -> VIDI_UINT;
    pub fn vidi_get_error_message(status: VIDI_UINT, buffer: *mut VIDI_BUFFER) -> VIDI_UINT;

    // Buffers
    pub fn vidi_init_buffer(buffer: *mut VIDI_BUFFER) -> VIDI_UINT;
    pub fn vidi_free_buffer(buffer: *mut VIDI_BUFFER) -> VIDI_UINT;

    // Images
    pub fn vidi_init_image(image: *mut VIDI_IMAGE) -> VIDI_UINT;
    pub fn vidi_free_image(image: *mut VIDI_IMAGE) -> VIDI_UINT;
    pub fn vidi_load_image(path: *const c_char, image: *mut VIDI_IMAGE) -> VIDI_UINT;
    pub fn vidi_save_image(path: *const c_char, image: *const VIDI_IMAGE) -> VIDI_UINT;
    pub fn vidi_load_image_from_memory(
        buffer: *const VIDI_BUFFER,
        format: VIDI_UINT,
        image: *mut VIDI_IMAGE,
    ) -> VIDI_UINT;

    // Runtime workspaces
    pub fn vidi_runtime_open_workspace_from_file(
        workspace: *const c_char,
        path: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_runtime_close_workspace(workspace: *const c_char) -> VIDI_UINT;
    pub fn vidi_runtime_list_streams(
        workspace: *const c_char,
        buffer: *mut VIDI_BUFFER,
    ) -> VIDI_UINT;
    pub fn vidi_runtime_list_tools(
        workspace: *const c_char,
        stream: *const c_char,
        buffer: *mut VIDI_BUFFER,
    ) -> VIDI_UINT;

    // Samples
    pub fn vidi_runtime_create_sample(
        workspace: *const c_char,
        stream: *const c_char,
        sample: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_runtime_sample_add_image(
        workspace: *const c_char,
        stream: *const c_char,
        sample: *const c_char,
        image: *const VIDI_IMAGE,
    ) -> VIDI_UINT;
    pub fn vidi_runtime_sample_process(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        sample: *const c_char,
        parameters: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_runtime_get_sample(
        workspace: *const c_char,
        stream: *const c_char,
        sample: *const c_char,
        buffer: *mut VIDI_BUFFER,
    ) -> VIDI_UINT;
    pub fn vidi_runtime_free_sample(
        workspace: *const c_char,
        stream: *const c_char,
        sample: *const c_char,
    ) -> VIDI_UINT;

    // Training workspaces
    pub fn vidi_training_create_workspace(
        workspace: *const c_char,
        path: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_workspace_add_stream(
        workspace: *const c_char,
        stream: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_stream_add_tool(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        after: *const c_char,
        kind: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_stream_add_image_to_database(
        workspace: *const c_char,
        stream: *const c_char,
        image: *const VIDI_IMAGE,
        name: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_tool_process_database(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        views: *const c_char,
        parameters: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_tool_wait(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        timeout_ms: VIDI_UINT,
    ) -> VIDI_UINT;
    pub fn vidi_training_tool_get_status(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        buffer: *mut VIDI_BUFFER,
    ) -> VIDI_UINT;
    pub fn vidi_training_tool_get_parameter(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        parameter: *const c_char,
        buffer: *mut VIDI_BUFFER,
    ) -> VIDI_UINT;
    pub fn vidi_training_tool_set_parameter(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        parameter: *const c_char,
        value: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_red_label_views(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        selector: *const c_char,
        label: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_tool_train(
        workspace: *const c_char,
        stream: *const c_char,
        tool: *const c_char,
        parameters: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_export_workspace_to_file(
        workspace: *const c_char,
        path: *const c_char,
        include_images: VIDI_UINT,
    ) -> VIDI_UINT;
    pub fn vidi_training_export_runtime_workspace_to_file(
        workspace: *const c_char,
        path: *const c_char,
    ) -> VIDI_UINT;
    pub fn vidi_training_save_workspace(workspace: *const c_char, flags: VIDI_UINT) -> VIDI_UINT;
    pub fn vidi_training_close_workspace(
        workspace: *const c_char,
        discard_autosave: VIDI_UINT,
    ) -> VIDI_UINT;
}
