//! Safe adapter over the proprietary vendor SDK.
//!
//! Marshals every [`Backend`] call onto the raw `vidi_*` C API. Query
//! payloads are copied out of the vendor buffer and the buffer freed
//! immediately, so no vendor allocation outlives the call that produced it.
//! Library-owned images stay on the vendor side; the adapter tracks them
//! under integer handles.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use deepsight_core::{
    status, Backend, DebugSink, DeviceSelector, GpuMode, ImageDesc, ImageFormat, ImageHandle,
    ImageRef, PixelDepth, RawStatus, ToolKind, TrainingBackend, VendorResult,
};
use deepsight_vidi_sys as sys;

/// [`Backend`] implementation over the vendor SDK.
///
/// The vendor library is a process singleton: create exactly one
/// `FfiBackend` per process. A second instance would share the underlying
/// global state and the already-initialized check would misfire.
pub struct FfiBackend {
    /// Library-owned `VIDI_IMAGE` descriptors by handle.
    images: Mutex<HashMap<ImageHandle, sys::VIDI_IMAGE>>,
    next_handle: AtomicU64,
}

// The vendor contract permits concurrent calls against distinct names; the
// registry itself is lock-protected.
unsafe impl Send for FfiBackend {}
unsafe impl Sync for FfiBackend {}

impl FfiBackend {
    pub fn new() -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn register_image(&self, raw: sys::VIDI_IMAGE) -> ImageHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.images.lock().insert(handle, raw);
        handle
    }

    fn lookup_image(&self, handle: ImageHandle) -> VendorResult<sys::VIDI_IMAGE> {
        self.images
            .lock()
            .get(&handle)
            .copied()
            .ok_or(RawStatus(status::RESOURCE_NOT_FOUND))
    }

    /// Run `f` against a borrowed `VIDI_IMAGE` view of `image`. Raw
    /// caller pixels are wrapped in a stack descriptor the vendor never
    /// frees; handles resolve through the registry.
    fn with_vidi_image<T>(
        &self,
        image: ImageRef<'_>,
        f: impl FnOnce(*const sys::VIDI_IMAGE) -> T,
    ) -> VendorResult<T> {
        match image {
            ImageRef::Raw { desc, data } => {
                let raw = sys::VIDI_IMAGE {
                    width: desc.width,
                    height: desc.height,
                    channels: desc.channels,
                    channel_depth: depth_to_vidi(desc.depth),
                    step: desc.step as sys::VIDI_UINT,
                    data: data.as_ptr() as *mut c_void,
                };
                Ok(f(&raw))
            }
            ImageRef::Handle(handle) => {
                let raw = self.lookup_image(handle)?;
                Ok(f(&raw))
            }
        }
    }
}

impl Default for FfiBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check(status: sys::VIDI_UINT) -> VendorResult<()> {
    if status == sys::VIDI_SUCCESS {
        Ok(())
    } else {
        Err(RawStatus(status))
    }
}

/// NUL-safe CString; interior NUL is unrepresentable in the C API.
fn cstr(s: &str) -> VendorResult<CString> {
    CString::new(s).map_err(|_| RawStatus(status::INVALID_ARGUMENT))
}

fn cpath(path: &Path) -> VendorResult<CString> {
    cstr(&path.to_string_lossy())
}

fn depth_to_vidi(depth: PixelDepth) -> sys::VIDI_UINT {
    match depth {
        PixelDepth::U8 => sys::VIDI_IMG_8U,
        PixelDepth::U16 => sys::VIDI_IMG_16U,
    }
}

fn depth_from_vidi(depth: sys::VIDI_UINT) -> PixelDepth {
    if depth == sys::VIDI_IMG_16U {
        PixelDepth::U16
    } else {
        PixelDepth::U8
    }
}

fn desc_from_vidi(raw: &sys::VIDI_IMAGE) -> ImageDesc {
    ImageDesc {
        width: raw.width,
        height: raw.height,
        channels: raw.channels,
        depth: depth_from_vidi(raw.channel_depth),
        step: raw.step as usize,
    }
}

/// Copy the payload out of a query call and free the vendor buffer.
///
/// `f` receives an initialized `VIDI_BUFFER` and must leave it either
/// untouched or filled by the vendor.
fn query(f: impl FnOnce(*mut sys::VIDI_BUFFER) -> sys::VIDI_UINT) -> VendorResult<Vec<u8>> {
    let mut buffer = sys::VIDI_BUFFER {
        data: std::ptr::null_mut(),
        size: 0,
    };
    // Init is the cheap, must-not-fail call of the vendor contract.
    check(unsafe { sys::vidi_init_buffer(&mut buffer) })?;

    let status = f(&mut buffer);
    if status != sys::VIDI_SUCCESS {
        unsafe { sys::vidi_free_buffer(&mut buffer) };
        return Err(RawStatus(status));
    }

    let bytes = if buffer.data.is_null() || buffer.size == 0 {
        Vec::new()
    } else {
        let mut copied = unsafe {
            std::slice::from_raw_parts(buffer.data as *const u8, buffer.size as usize).to_vec()
        };
        // The vendor NUL-terminates text payloads; size includes it.
        while copied.last() == Some(&0) {
            copied.pop();
        }
        copied
    };
    unsafe { sys::vidi_free_buffer(&mut buffer) };
    Ok(bytes)
}

impl Backend for FfiBackend {
    fn initialize(&self, mode: GpuMode, devices: &DeviceSelector) -> VendorResult<()> {
        let mode = match mode {
            GpuMode::NoGpu => sys::VIDI_GPU_MODE_NO_SUPPORT,
            GpuMode::SingleDevicePerTool => sys::VIDI_GPU_SINGLE_DEVICE_PER_TOOL,
            GpuMode::MultipleDevicesPerTool => sys::VIDI_GPU_MULTIPLE_DEVICES_PER_TOOL,
        };
        let devices = cstr(&devices.as_arg())?;
        check(unsafe { sys::vidi_initialize(mode, devices.as_ptr()) })?;
        tracing::info!("vendor runtime initialized");
        Ok(())
    }

    fn deinitialize(&self) -> VendorResult<()> {
        // The vendor sweep frees every image it still owns.
        self.images.lock().clear();
        check(unsafe { sys::vidi_deinitialize() })
    }

    fn set_debug_sink(&self, sink: &DebugSink) -> VendorResult<()> {
        match sink {
            DebugSink::Console => {
                check(unsafe { sys::vidi_debug_infos(sys::VIDI_DEBUG_SINK_CONSOLE, std::ptr::null()) })
            }
            DebugSink::File(path) => {
                let path = cpath(path)?;
                check(unsafe { sys::vidi_debug_infos(sys::VIDI_DEBUG_SINK_FILE, path.as_ptr()) })
            }
        }
    }

    fn set_optimized_gpu_memory(&self, limit_bytes: u64) -> VendorResult<()> {
        check(unsafe { sys::vidi_optimized_gpu_memory(limit_bytes) })
    }

    fn version(&self) -> VendorResult<Vec<u8>> {
        query(|buf| unsafe { sys::vidi_version(buf) })
    }

    fn license_info(&self) -> VendorResult<Vec<u8>> {
        query(|buf| unsafe { sys::vidi_license_get_info(buf) })
    }

    fn list_compute_devices(&self) -> VendorResult<Vec<u8>> {
        query(|buf| unsafe { sys::vidi_list_compute_devices(buf) })
    }

    fn error_message(&self, status_code: u32) -> VendorResult<Vec<u8>> {
        query(|buf| unsafe { sys::vidi_get_error_message(status_code, buf) })
    }

    fn load_image(&self, path: &Path) -> VendorResult<(ImageHandle, ImageDesc)> {
        let cpath = cpath(path)?;
        let mut raw = sys::VIDI_IMAGE {
            width: 0,
            height: 0,
            channels: 0,
            channel_depth: 0,
            step: 0,
            data: std::ptr::null_mut(),
        };
        check(unsafe { sys::vidi_init_image(&mut raw) })?;
        if let Err(status) = check(unsafe { sys::vidi_load_image(cpath.as_ptr(), &mut raw) }) {
            unsafe { sys::vidi_free_image(&mut raw) };
            return Err(status);
        }
        let desc = desc_from_vidi(&raw);
        Ok((self.register_image(raw), desc))
    }

    fn load_image_from_memory(
        &self,
        encoded: &[u8],
        format: ImageFormat,
    ) -> VendorResult<(ImageHandle, ImageDesc)> {
        let format = match format {
            ImageFormat::Png => sys::VIDI_IMAGE_FORMAT_PNG,
            ImageFormat::Bmp => sys::VIDI_IMAGE_FORMAT_BMP,
            ImageFormat::Tiff => sys::VIDI_IMAGE_FORMAT_TIFF,
        };
        let buffer = sys::VIDI_BUFFER {
            data: encoded.as_ptr() as *mut c_char,
            size: encoded.len() as sys::VIDI_UINT,
        };
        let mut raw = sys::VIDI_IMAGE {
            width: 0,
            height: 0,
            channels: 0,
            channel_depth: 0,
            step: 0,
            data: std::ptr::null_mut(),
        };
        check(unsafe { sys::vidi_init_image(&mut raw) })?;
        if let Err(status) =
            check(unsafe { sys::vidi_load_image_from_memory(&buffer, format, &mut raw) })
        {
            unsafe { sys::vidi_free_image(&mut raw) };
            return Err(status);
        }
        let desc = desc_from_vidi(&raw);
        Ok((self.register_image(raw), desc))
    }

    fn save_image(&self, path: &Path, image: ImageRef<'_>) -> VendorResult<()> {
        let cpath = cpath(path)?;
        self.with_vidi_image(image, |raw| {
            check(unsafe { sys::vidi_save_image(cpath.as_ptr(), raw) })
        })?
    }

    fn image_pixels(&self, handle: ImageHandle) -> VendorResult<Vec<u8>> {
        let raw = self.lookup_image(handle)?;
        if raw.data.is_null() {
            return Err(RawStatus(status::INTERNAL_ERROR));
        }
        let len = raw.step as usize * raw.height as usize;
        Ok(unsafe { std::slice::from_raw_parts(raw.data as *const u8, len).to_vec() })
    }

    fn free_image(&self, handle: ImageHandle) -> VendorResult<()> {
        let mut raw = self
            .images
            .lock()
            .remove(&handle)
            .ok_or(RawStatus(status::RESOURCE_NOT_FOUND))?;
        check(unsafe { sys::vidi_free_image(&mut raw) })
    }

    fn open_workspace_from_file(&self, workspace: &str, path: &Path) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let path = cpath(path)?;
        check(unsafe {
            sys::vidi_runtime_open_workspace_from_file(workspace.as_ptr(), path.as_ptr())
        })
    }

    fn close_workspace(&self, workspace: &str) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        check(unsafe { sys::vidi_runtime_close_workspace(workspace.as_ptr()) })
    }

    fn list_streams(&self, workspace: &str) -> VendorResult<Vec<u8>> {
        let workspace = cstr(workspace)?;
        query(|buf| unsafe { sys::vidi_runtime_list_streams(workspace.as_ptr(), buf) })
    }

    fn list_tools(&self, workspace: &str, stream: &str) -> VendorResult<Vec<u8>> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        query(|buf| unsafe {
            sys::vidi_runtime_list_tools(workspace.as_ptr(), stream.as_ptr(), buf)
        })
    }

    fn create_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let sample = cstr(sample)?;
        check(unsafe {
            sys::vidi_runtime_create_sample(workspace.as_ptr(), stream.as_ptr(), sample.as_ptr())
        })
    }

    fn sample_add_image(
        &self,
        workspace: &str,
        stream: &str,
        sample: &str,
        image: ImageRef<'_>,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let sample = cstr(sample)?;
        self.with_vidi_image(image, |raw| {
            check(unsafe {
                sys::vidi_runtime_sample_add_image(
                    workspace.as_ptr(),
                    stream.as_ptr(),
                    sample.as_ptr(),
                    raw,
                )
            })
        })?
    }

    fn sample_process(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        sample: &str,
        parameters: &str,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        let sample = cstr(sample)?;
        let parameters = cstr(parameters)?;
        check(unsafe {
            sys::vidi_runtime_sample_process(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                sample.as_ptr(),
                parameters.as_ptr(),
            )
        })
    }

    fn read_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<Vec<u8>> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let sample = cstr(sample)?;
        query(|buf| unsafe {
            sys::vidi_runtime_get_sample(
                workspace.as_ptr(),
                stream.as_ptr(),
                sample.as_ptr(),
                buf,
            )
        })
    }

    fn free_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let sample = cstr(sample)?;
        check(unsafe {
            sys::vidi_runtime_free_sample(workspace.as_ptr(), stream.as_ptr(), sample.as_ptr())
        })
    }
}

impl TrainingBackend for FfiBackend {
    fn create_workspace(&self, workspace: &str, path: &Path) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let path = cpath(path)?;
        check(unsafe { sys::vidi_training_create_workspace(workspace.as_ptr(), path.as_ptr()) })
    }

    fn add_stream(&self, workspace: &str, stream: &str) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        check(unsafe {
            sys::vidi_training_workspace_add_stream(workspace.as_ptr(), stream.as_ptr())
        })
    }

    fn add_tool(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        after: &str,
        kind: ToolKind,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        let after = cstr(after)?;
        let kind = cstr(kind.as_str())?;
        check(unsafe {
            sys::vidi_training_stream_add_tool(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                after.as_ptr(),
                kind.as_ptr(),
            )
        })
    }

    fn add_image_to_database(
        &self,
        workspace: &str,
        stream: &str,
        image: ImageRef<'_>,
        name: &str,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let name = cstr(name)?;
        self.with_vidi_image(image, |raw| {
            check(unsafe {
                sys::vidi_training_stream_add_image_to_database(
                    workspace.as_ptr(),
                    stream.as_ptr(),
                    raw,
                    name.as_ptr(),
                )
            })
        })?
    }

    fn process_database(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        let empty = cstr("")?;
        check(unsafe {
            sys::vidi_training_tool_process_database(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                empty.as_ptr(),
                empty.as_ptr(),
            )
        })
    }

    fn tool_wait(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        timeout_ms: u32,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        check(unsafe {
            sys::vidi_training_tool_wait(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                timeout_ms,
            )
        })
    }

    fn tool_status(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<Vec<u8>> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        query(|buf| unsafe {
            sys::vidi_training_tool_get_status(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                buf,
            )
        })
    }

    fn get_parameter(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        path: &str,
    ) -> VendorResult<Vec<u8>> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        let path = cstr(path)?;
        query(|buf| unsafe {
            sys::vidi_training_tool_get_parameter(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                path.as_ptr(),
                buf,
            )
        })
    }

    fn set_parameter(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        path: &str,
        value: &str,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        let path = cstr(path)?;
        let value = cstr(value)?;
        check(unsafe {
            sys::vidi_training_tool_set_parameter(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                path.as_ptr(),
                value.as_ptr(),
            )
        })
    }

    fn label_views(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        selector: &str,
        label: &str,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        let selector = cstr(selector)?;
        let label = cstr(label)?;
        check(unsafe {
            sys::vidi_training_red_label_views(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                selector.as_ptr(),
                label.as_ptr(),
            )
        })
    }

    fn train(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let stream = cstr(stream)?;
        let tool = cstr(tool)?;
        let empty = cstr("")?;
        check(unsafe {
            sys::vidi_training_tool_train(
                workspace.as_ptr(),
                stream.as_ptr(),
                tool.as_ptr(),
                empty.as_ptr(),
            )
        })
    }

    fn export_workspace(
        &self,
        workspace: &str,
        path: &Path,
        include_images: bool,
    ) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let path = cpath(path)?;
        check(unsafe {
            sys::vidi_training_export_workspace_to_file(
                workspace.as_ptr(),
                path.as_ptr(),
                include_images as sys::VIDI_UINT,
            )
        })
    }

    fn export_runtime_workspace(&self, workspace: &str, path: &Path) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        let path = cpath(path)?;
        check(unsafe {
            sys::vidi_training_export_runtime_workspace_to_file(workspace.as_ptr(), path.as_ptr())
        })
    }

    fn save_workspace(&self, workspace: &str) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        check(unsafe { sys::vidi_training_save_workspace(workspace.as_ptr(), 0) })
    }

    fn close_training_workspace(&self, workspace: &str, discard_autosave: bool) -> VendorResult<()> {
        let workspace = cstr(workspace)?;
        check(unsafe {
            sys::vidi_training_close_workspace(
                workspace.as_ptr(),
                discard_autosave as sys::VIDI_UINT,
            )
        })
    }
}
