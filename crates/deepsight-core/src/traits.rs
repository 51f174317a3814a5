use std::path::Path;

use crate::types::{DebugSink, DeviceSelector, GpuMode, ImageDesc, ImageFormat, ToolKind};

/// A non-success status code reported by the runtime.
///
/// Opaque at this layer; the client resolves it to a message through the
/// runtime's error-message query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatus(pub u32);

pub type VendorResult<T> = std::result::Result<T, RawStatus>;

/// Token for an image whose pixel memory is owned by the runtime.
pub type ImageHandle = u64;

/// How an image is passed across the backend boundary.
///
/// Caller-owned pixel data travels by reference and is never released
/// through the runtime; library-owned images travel as handles.
#[derive(Debug, Clone, Copy)]
pub enum ImageRef<'a> {
    Raw { desc: &'a ImageDesc, data: &'a [u8] },
    Handle(ImageHandle),
}

/// The runtime ABI surface every backend implements.
///
/// Methods mirror the vendor C API one to one: names are plain strings
/// (validation happens in the typed layer above), query payloads come back
/// as raw bytes, and every fault is a `RawStatus`. One implementor value
/// corresponds to one logical library instance.
pub trait Backend: Send + Sync {
    fn initialize(&self, mode: GpuMode, devices: &DeviceSelector) -> VendorResult<()>;
    fn deinitialize(&self) -> VendorResult<()>;
    fn set_debug_sink(&self, sink: &DebugSink) -> VendorResult<()>;
    /// Cap the per-device memory the runtime may pre-allocate; 0 = automatic.
    fn set_optimized_gpu_memory(&self, limit_bytes: u64) -> VendorResult<()>;

    fn version(&self) -> VendorResult<Vec<u8>>;
    fn license_info(&self) -> VendorResult<Vec<u8>>;
    /// XML device list: `<devices><device id=".." index=".."/>..</devices>`.
    fn list_compute_devices(&self) -> VendorResult<Vec<u8>>;
    /// XML error payload for a previously returned status code.
    fn error_message(&self, status: u32) -> VendorResult<Vec<u8>>;

    fn load_image(&self, path: &Path) -> VendorResult<(ImageHandle, ImageDesc)>;
    fn load_image_from_memory(
        &self,
        encoded: &[u8],
        format: ImageFormat,
    ) -> VendorResult<(ImageHandle, ImageDesc)>;
    fn save_image(&self, path: &Path, image: ImageRef<'_>) -> VendorResult<()>;
    fn image_pixels(&self, handle: ImageHandle) -> VendorResult<Vec<u8>>;
    fn free_image(&self, handle: ImageHandle) -> VendorResult<()>;

    fn open_workspace_from_file(&self, workspace: &str, path: &Path) -> VendorResult<()>;
    fn close_workspace(&self, workspace: &str) -> VendorResult<()>;
    /// XML stream list for an open workspace.
    fn list_streams(&self, workspace: &str) -> VendorResult<Vec<u8>>;
    /// XML tool list in chain order.
    fn list_tools(&self, workspace: &str, stream: &str) -> VendorResult<Vec<u8>>;

    fn create_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<()>;
    fn sample_add_image(
        &self,
        workspace: &str,
        stream: &str,
        sample: &str,
        image: ImageRef<'_>,
    ) -> VendorResult<()>;
    fn sample_process(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        sample: &str,
        parameters: &str,
    ) -> VendorResult<()>;
    /// XML result set accumulated by the sample so far.
    fn read_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<Vec<u8>>;
    fn free_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<()>;
}

/// Training extension of the runtime ABI.
///
/// Separate from `Backend` because runtime-only deployments (and
/// runtime-only licenses) exist; a session opened without this interface
/// reports `TrainingUnavailable` for training operations.
pub trait TrainingBackend: Backend {
    fn create_workspace(&self, workspace: &str, path: &Path) -> VendorResult<()>;
    fn add_stream(&self, workspace: &str, stream: &str) -> VendorResult<()>;
    /// Insert a tool into the stream's chain after `after` (empty = append).
    fn add_tool(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        after: &str,
        kind: ToolKind,
    ) -> VendorResult<()>;
    fn add_image_to_database(
        &self,
        workspace: &str,
        stream: &str,
        image: ImageRef<'_>,
        name: &str,
    ) -> VendorResult<()>;
    fn process_database(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<()>;
    /// Wait up to `timeout_ms` for the tool to go idle; 0 blocks until done.
    fn tool_wait(&self, workspace: &str, stream: &str, tool: &str, timeout_ms: u32)
        -> VendorResult<()>;
    /// XML status payload: `<status busy=".." ready=".." error=".."><progress/></status>`.
    fn tool_status(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<Vec<u8>>;
    fn get_parameter(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        path: &str,
    ) -> VendorResult<Vec<u8>>;
    fn set_parameter(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        path: &str,
        value: &str,
    ) -> VendorResult<()>;
    fn label_views(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        selector: &str,
        label: &str,
    ) -> VendorResult<()>;
    fn train(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<()>;
    fn export_workspace(
        &self,
        workspace: &str,
        path: &Path,
        include_images: bool,
    ) -> VendorResult<()>;
    fn export_runtime_workspace(&self, workspace: &str, path: &Path) -> VendorResult<()>;
    fn save_workspace(&self, workspace: &str) -> VendorResult<()>;
    fn close_training_workspace(&self, workspace: &str, discard_autosave: bool)
        -> VendorResult<()>;
}
