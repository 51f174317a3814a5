use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use deepsight_core::{
    Backend, ComputeDevice, DebugSink, DeviceSelector, GpuMode, ImageFormat, ImageHandle,
    RawStatus, Result, TrainingBackend, VendorResult, VisionError, WorkspaceName,
};

use crate::buffer::Buffer;
use crate::image::Image;
use crate::resolver::ErrorResolver;

/// Configuration for opening a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub gpu_mode: GpuMode,
    pub devices: DeviceSelector,
    pub debug_sink: DebugSink,
    /// Cap on the per-device memory the runtime pre-allocates, in bytes.
    /// `None` leaves the runtime default; `Some(0)` selects automatic
    /// sizing.
    pub optimized_gpu_memory: Option<u64>,
}

impl SessionConfig {
    /// CPU-only session (device selector ignored by the runtime).
    pub fn cpu_only() -> Self {
        Self {
            gpu_mode: GpuMode::NoGpu,
            ..Self::default()
        }
    }

    /// One device per tool across the given devices — maximizes
    /// throughput when paired with one worker per device.
    pub fn throughput(devices: DeviceSelector) -> Self {
        Self {
            gpu_mode: GpuMode::SingleDevicePerTool,
            devices,
            ..Self::default()
        }
    }

    /// All given devices fan out on a single tool — minimizes latency.
    pub fn low_latency(devices: DeviceSelector) -> Self {
        Self {
            gpu_mode: GpuMode::MultipleDevicesPerTool,
            devices,
            ..Self::default()
        }
    }
}

/// State shared between a `Session` and the resources it handed out.
pub(crate) struct Shared {
    backend: Arc<dyn Backend>,
    training: Option<Arc<dyn TrainingBackend>>,
    resolver: ErrorResolver,
    closed: AtomicBool,
    /// Library-owned image handles the session still tracks.
    images: Mutex<HashSet<ImageHandle>>,
    /// Names of runtime workspaces currently open under this session.
    workspaces: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("closed", &self.closed)
            .field("images", &self.images)
            .field("workspaces", &self.workspaces)
            .finish_non_exhaustive()
    }
}

impl Shared {
    pub(crate) fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(VisionError::NotInitialized)
        }
    }

    pub(crate) fn fault(&self, status: RawStatus) -> VisionError {
        self.resolver.fault(status)
    }

    pub(crate) fn library_image_pixels(&self, handle: ImageHandle) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.backend
            .image_pixels(handle)
            .map_err(|s| self.fault(s))
    }

    /// Release a library-owned image. After close this is a no-op: the
    /// deinitialize sweep already reclaimed the allocation.
    pub(crate) fn free_library_image(&self, handle: ImageHandle) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.images.lock().remove(&handle);
        self.backend.free_image(handle).map_err(|s| self.fault(s))
    }

    fn close_impl(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let leftover: Vec<ImageHandle> = self.images.lock().drain().collect();
        if !leftover.is_empty() {
            tracing::debug!(count = leftover.len(), "sweeping images at session close");
        }
        for handle in leftover {
            if let Err(status) = self.backend.free_image(handle) {
                tracing::warn!(handle, status = status.0, "image sweep failed");
            }
        }
        self.workspaces.lock().clear();

        self.backend.deinitialize().map_err(|s| self.fault(s))
    }
}

/// An initialized instance of the vision runtime.
///
/// Holds the process-wide library handle between initialize and
/// deinitialize. The backend is injected, so tests can run several logical
/// sessions against independent simulated runtimes even though the real
/// vendor library is a process singleton.
///
/// Closing (or dropping) the session releases every library-owned image it
/// still tracks. Callers may rely on that as last-resort cleanup, but
/// resources they need to inspect must be read before teardown.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Initialize the runtime with the runtime-only interface.
    pub fn open<B: Backend + 'static>(backend: Arc<B>, config: &SessionConfig) -> Result<Self> {
        Self::open_parts(backend, None, config)
    }

    /// Initialize a runtime that also exposes the training interface.
    pub fn open_training<B: TrainingBackend + 'static>(
        backend: Arc<B>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let training: Arc<dyn TrainingBackend> = backend.clone();
        Self::open_parts(backend, Some(training), config)
    }

    fn open_parts<B: Backend + 'static>(
        backend: Arc<B>,
        training: Option<Arc<dyn TrainingBackend>>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let backend: Arc<dyn Backend> = backend;
        let resolver = ErrorResolver::new(backend.clone());

        backend
            .set_debug_sink(&config.debug_sink)
            .map_err(|s| resolver.fault(s))?;

        backend
            .initialize(config.gpu_mode, &config.devices)
            .map_err(|s| resolver.fault(s))?;

        if let Some(limit) = config.optimized_gpu_memory {
            if let Err(status) = backend.set_optimized_gpu_memory(limit) {
                let err = resolver.fault(status);
                if let Err(st) = backend.deinitialize() {
                    tracing::warn!(status = st.0, "deinitialize failed during open rollback");
                }
                return Err(err);
            }
        }

        tracing::info!(
            mode = ?config.gpu_mode,
            devices = %config.devices,
            "session opened"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                training,
                resolver,
                closed: AtomicBool::new(false),
                images: Mutex::new(HashSet::new()),
                workspaces: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Deinitialize the runtime, sweeping any still-tracked images first.
    pub fn close(self) -> Result<()> {
        let result = self.shared.close_impl();
        tracing::info!("session closed");
        result
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    pub fn ensure_open(&self) -> Result<()> {
        self.shared.ensure_open()
    }

    /// The injected backend, for the workspace/sample layers.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.shared.backend
    }

    /// The training interface, if the session was opened with one.
    pub fn training_backend(&self) -> Result<Arc<dyn TrainingBackend>> {
        self.shared
            .training
            .clone()
            .ok_or(VisionError::TrainingUnavailable)
    }

    /// Resolve a raw backend fault into the public error type.
    pub fn fault(&self, status: RawStatus) -> VisionError {
        self.shared.fault(status)
    }

    // --- queries ---

    /// Runtime version string.
    pub fn version(&self, buf: &mut Buffer) -> Result<()> {
        self.query_into(buf, |b| b.version())
    }

    /// License information.
    pub fn license_info(&self, buf: &mut Buffer) -> Result<()> {
        self.query_into(buf, |b| b.license_info())
    }

    fn query_into(
        &self,
        buf: &mut Buffer,
        f: impl FnOnce(&dyn Backend) -> VendorResult<Vec<u8>>,
    ) -> Result<()> {
        self.shared.ensure_open()?;
        let bytes = f(self.shared.backend.as_ref()).map_err(|s| self.fault(s))?;
        buf.fill(bytes);
        Ok(())
    }

    /// Compute devices the runtime can see, parsed from its XML list.
    pub fn compute_devices(&self) -> Result<Vec<ComputeDevice>> {
        self.shared.ensure_open()?;
        let payload = self
            .shared
            .backend
            .list_compute_devices()
            .map_err(|s| self.fault(s))?;
        parse_device_list(&payload)
    }

    // --- images ---

    /// Decode an image file (PNG/BMP/TIFF) into a library-owned image.
    pub fn load_image(&self, path: impl AsRef<Path>) -> Result<Image> {
        let path = path.as_ref();
        self.shared.ensure_open()?;
        let (handle, desc) = self
            .shared
            .backend
            .load_image(path)
            .map_err(|s| self.fault(s))?;
        self.shared.images.lock().insert(handle);
        tracing::debug!(
            path = %path.display(),
            width = desc.width,
            height = desc.height,
            channels = desc.channels,
            "image loaded"
        );
        Ok(Image::from_library(self.shared.clone(), handle, desc))
    }

    /// Decode an encoded in-memory blob into a library-owned image.
    pub fn load_image_from_memory(&self, encoded: &[u8], format: ImageFormat) -> Result<Image> {
        self.shared.ensure_open()?;
        let (handle, desc) = self
            .shared
            .backend
            .load_image_from_memory(encoded, format)
            .map_err(|s| self.fault(s))?;
        self.shared.images.lock().insert(handle);
        Ok(Image::from_library(self.shared.clone(), handle, desc))
    }

    /// Encode an image (either ownership class) to a file; the format
    /// follows the file extension.
    pub fn save_image(&self, path: impl AsRef<Path>, image: &Image) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared
            .backend
            .save_image(path.as_ref(), image.as_image_ref())
            .map_err(|s| self.fault(s))
    }

    // --- workspace registry ---

    /// Reserve a workspace name. Fails fast on double-open before the
    /// backend is ever consulted.
    pub fn register_workspace(&self, name: &WorkspaceName) -> Result<()> {
        self.shared.ensure_open()?;
        if !self.shared.workspaces.lock().insert(name.as_str().to_string()) {
            return Err(VisionError::InvalidState(format!(
                "workspace '{name}' is already open"
            )));
        }
        Ok(())
    }

    pub fn unregister_workspace(&self, name: &WorkspaceName) {
        self.shared.workspaces.lock().remove(name.as_str());
    }

    pub fn workspace_is_open(&self, name: &WorkspaceName) -> bool {
        self.shared.workspaces.lock().contains(name.as_str())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shared.is_open() {
            if let Err(err) = self.shared.close_impl() {
                tracing::warn!(error = %err, "session teardown failed on drop");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Parse `<devices><device id=".." index=".."/>..</devices>`.
fn parse_device_list(payload: &[u8]) -> Result<Vec<ComputeDevice>> {
    let mut reader = Reader::from_reader(payload);
    reader.config_mut().trim_text(true);

    let mut devices = Vec::new();
    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| VisionError::MalformedResponse(format!("device list: {e}")))?;
        match event {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"device" => {
                let mut index = None;
                let mut name = None;
                for attr in e.attributes() {
                    let attr = attr
                        .map_err(|e| VisionError::MalformedResponse(format!("device list: {e}")))?;
                    let value = attr.unescape_value().map_err(|e| {
                        VisionError::MalformedResponse(format!("device list: {e}"))
                    })?;
                    match attr.key.as_ref() {
                        b"index" => {
                            index = Some(value.parse::<u32>().map_err(|_| {
                                VisionError::MalformedResponse(format!(
                                    "device index '{value}' is not an ordinal"
                                ))
                            })?);
                        }
                        b"id" => name = Some(value.into_owned()),
                        _ => {}
                    }
                }
                match (index, name) {
                    (Some(index), Some(name)) => devices.push(ComputeDevice { index, name }),
                    _ => {
                        return Err(VisionError::MalformedResponse(
                            "device entry missing id or index".into(),
                        ))
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_list() {
        let xml = br#"<devices>
            <device id="SIM GPU 0" index="0"/>
            <device id="SIM GPU 1" index="1"/>
        </devices>"#;
        let devices = parse_device_list(xml).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[1].name, "SIM GPU 1");
    }

    #[test]
    fn rejects_incomplete_device_entries() {
        assert!(parse_device_list(b"<devices><device id=\"x\"/></devices>").is_err());
        assert!(parse_device_list(b"<devices><device index=\"zero\" id=\"x\"/></devices>").is_err());
    }

    #[test]
    fn empty_list_is_no_devices() {
        assert!(parse_device_list(b"<devices/>").unwrap().is_empty());
    }

    #[test]
    fn config_presets() {
        assert_eq!(SessionConfig::cpu_only().gpu_mode, GpuMode::NoGpu);
        let cfg = SessionConfig::throughput(DeviceSelector::list(["0", "1"]));
        assert_eq!(cfg.devices.as_arg(), "0,1");
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = SessionConfig {
            gpu_mode: GpuMode::MultipleDevicesPerTool,
            devices: DeviceSelector::single("1"),
            debug_sink: DebugSink::File("messages.log".into()),
            optimized_gpu_memory: Some(1 << 30),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.gpu_mode, GpuMode::MultipleDevicesPerTool);
        assert_eq!(back.devices.as_arg(), "1");
        assert_eq!(back.optimized_gpu_memory, Some(1 << 30));
    }
}
