use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use deepsight_core::{
    status, Backend, DebugSink, DeviceSelector, GpuMode, ImageDesc, ImageFormat, ImageHandle,
    ImageRef, RawStatus, VendorResult,
};

use crate::imageio::{self, SimImage};
use crate::manifest::{ToolEntry, WorkspaceManifest};
use crate::payload;
use crate::training::TrainingWs;

/// In-process software implementation of the vendor runtime.
///
/// One value corresponds to one logical library instance: initializing
/// twice without deinitializing reports `ALREADY_INITIALIZED`, exactly like
/// the process-wide singleton it stands in for. Unlike the real library,
/// any number of independent instances can coexist, which is what lets
/// tests run several logical sessions at once.
pub struct SimRuntime {
    devices: Vec<String>,
    pub(crate) state: Mutex<State>,
    next_image: AtomicU64,
}

pub(crate) struct State {
    pub initialized: bool,
    /// Detail for the most recent fault, surfaced by the error-message
    /// query.
    pub last_error: Option<(u32, String)>,
    pub images: HashMap<ImageHandle, SimImage>,
    pub runtime: HashMap<String, RuntimeWs>,
    pub training: HashMap<String, TrainingWs>,
}

pub(crate) type ErrorSlot = Option<(u32, String)>;

/// An open runtime workspace: stream chains plus live samples.
pub(crate) struct RuntimeWs {
    pub streams: BTreeMap<String, Vec<ToolEntry>>,
    /// Unfreed samples keyed by (stream, sample).
    pub samples: HashMap<(String, String), SimSample>,
}

#[derive(Default)]
pub(crate) struct SimSample {
    pub image: Option<SimImage>,
    pub results: HashMap<String, f64>,
}

/// Record a fault so the error-message query can report its detail.
pub(crate) fn fail(slot: &mut ErrorSlot, code: u32, message: impl Into<String>) -> RawStatus {
    let message = message.into();
    tracing::debug!(code, message, "simulated fault");
    *slot = Some((code, message));
    RawStatus(code)
}

pub(crate) fn ensure_init(state: &mut State) -> VendorResult<()> {
    if state.initialized {
        Ok(())
    } else {
        Err(fail(
            &mut state.last_error,
            status::NOT_INITIALIZED,
            "the runtime is not initialized",
        ))
    }
}

impl SimRuntime {
    /// Two virtual devices, the typical dual-GPU bench box.
    pub fn new() -> Self {
        Self::with_devices(2)
    }

    pub fn with_devices(count: usize) -> Self {
        let devices = (0..count).map(|i| format!("SIM GPU {i}")).collect();
        Self {
            devices,
            state: Mutex::new(State {
                initialized: false,
                last_error: None,
                images: HashMap::new(),
                runtime: HashMap::new(),
                training: HashMap::new(),
            }),
            next_image: AtomicU64::new(1),
        }
    }

    /// Library-owned images currently alive. Tests assert this reaches
    /// zero after session teardown.
    pub fn live_images(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn register_image(&self, state: &mut State, img: SimImage) -> (ImageHandle, ImageDesc) {
        let handle = self.next_image.fetch_add(1, Ordering::Relaxed);
        let desc = img.desc;
        state.images.insert(handle, img);
        (handle, desc)
    }

    /// Materialize either ownership class into simulation pixels.
    pub(crate) fn resolve_image(state: &mut State, image: ImageRef<'_>) -> VendorResult<SimImage> {
        match image {
            ImageRef::Raw { desc, data } => {
                if let Err(err) = desc.validate(data.len()) {
                    return Err(fail(
                        &mut state.last_error,
                        status::INVALID_ARGUMENT,
                        err.to_string(),
                    ));
                }
                Ok(SimImage {
                    desc: *desc,
                    pixels: data.to_vec(),
                })
            }
            ImageRef::Handle(handle) => match state.images.get(&handle) {
                Some(img) => Ok(img.clone()),
                None => Err(fail(
                    &mut state.last_error,
                    status::RESOURCE_NOT_FOUND,
                    format!("no image with handle {handle}"),
                )),
            },
        }
    }
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SimRuntime {
    fn initialize(&self, mode: GpuMode, devices: &DeviceSelector) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.initialized {
            return Err(fail(
                &mut state.last_error,
                status::ALREADY_INITIALIZED,
                "the runtime is already initialized",
            ));
        }
        if mode != GpuMode::NoGpu {
            for id in devices.ids() {
                let valid = id
                    .parse::<usize>()
                    .map(|idx| idx < self.devices.len())
                    .unwrap_or(false);
                if !valid {
                    return Err(fail(
                        &mut state.last_error,
                        status::INVALID_ARGUMENT,
                        format!("unknown compute device '{id}'"),
                    ));
                }
            }
        }
        state.initialized = true;
        tracing::debug!(?mode, devices = %devices, "simulated runtime initialized");
        Ok(())
    }

    fn deinitialize(&self) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        // The deinitialize sweep: everything still owned by the library
        // goes away with it.
        let swept = state.images.len();
        state.images.clear();
        state.runtime.clear();
        state.training.clear();
        state.initialized = false;
        tracing::debug!(swept_images = swept, "simulated runtime deinitialized");
        Ok(())
    }

    fn set_debug_sink(&self, sink: &DebugSink) -> VendorResult<()> {
        // The simulation already routes its diagnostics through tracing;
        // the sink selection is accepted and logged.
        tracing::debug!(?sink, "debug sink selected");
        Ok(())
    }

    fn set_optimized_gpu_memory(&self, limit_bytes: u64) -> VendorResult<()> {
        let mut guard = self.state.lock();
        ensure_init(&mut guard)?;
        tracing::debug!(limit_bytes, "optimized GPU memory limit set");
        Ok(())
    }

    fn version(&self) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        ensure_init(&mut guard)?;
        Ok(format!("deepsight simulated runtime {}", env!("CARGO_PKG_VERSION")).into_bytes())
    }

    fn license_info(&self) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        ensure_init(&mut guard)?;
        Ok(br#"<license type="simulation" expires="never"/>"#.to_vec())
    }

    fn list_compute_devices(&self) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        ensure_init(&mut guard)?;
        Ok(payload::device_list(&self.devices))
    }

    fn error_message(&self, status_code: u32) -> VendorResult<Vec<u8>> {
        // Deliberately valid even before initialization: error resolution
        // must never itself fail.
        let guard = self.state.lock();
        let message = match &guard.last_error {
            Some((code, detail)) if *code == status_code => detail.clone(),
            _ => status::describe(status_code).to_string(),
        };
        Ok(payload::error_payload(&message))
    }

    fn load_image(&self, path: &Path) -> VendorResult<(ImageHandle, ImageDesc)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                return Err(fail(
                    &mut state.last_error,
                    status::RESOURCE_NOT_FOUND,
                    format!("failed to read image '{}': {err}", path.display()),
                ))
            }
        };
        let img = imageio::decode(&data)
            .map_err(|err| fail(&mut state.last_error, status::INTERNAL_ERROR, err))?;
        Ok(self.register_image(state, img))
    }

    fn load_image_from_memory(
        &self,
        encoded: &[u8],
        format: ImageFormat,
    ) -> VendorResult<(ImageHandle, ImageDesc)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        imageio::verify_format(encoded, format)
            .map_err(|err| fail(&mut state.last_error, status::INVALID_ARGUMENT, err))?;
        let img = imageio::decode(encoded)
            .map_err(|err| fail(&mut state.last_error, status::INTERNAL_ERROR, err))?;
        Ok(self.register_image(state, img))
    }

    fn save_image(&self, path: &Path, image: ImageRef<'_>) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let img = Self::resolve_image(state, image)?;
        imageio::encode_to_path(path, &img.desc, &img.pixels)
            .map_err(|err| fail(&mut state.last_error, status::INTERNAL_ERROR, err))
    }

    fn image_pixels(&self, handle: ImageHandle) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        match state.images.get(&handle) {
            Some(img) => Ok(img.pixels.clone()),
            None => Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no image with handle {handle}"),
            )),
        }
    }

    fn free_image(&self, handle: ImageHandle) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        if state.images.remove(&handle).is_none() {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no image with handle {handle}"),
            ));
        }
        Ok(())
    }

    fn open_workspace_from_file(&self, workspace: &str, path: &Path) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        if state.runtime.contains_key(workspace) {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("workspace '{workspace}' is already open"),
            ));
        }
        if !path.exists() {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace archive '{}' not found", path.display()),
            ));
        }
        let manifest = WorkspaceManifest::read_from(path)
            .map_err(|err| fail(&mut state.last_error, status::INTERNAL_ERROR, err.to_string()))?;
        state.runtime.insert(
            workspace.to_string(),
            RuntimeWs {
                streams: manifest.streams,
                samples: HashMap::new(),
            },
        );
        tracing::debug!(workspace, path = %path.display(), "runtime workspace opened");
        Ok(())
    }

    fn close_workspace(&self, workspace: &str) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        if state.runtime.remove(workspace).is_none() {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace '{workspace}' is not open"),
            ));
        }
        Ok(())
    }

    fn list_streams(&self, workspace: &str) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        match state.runtime.get(workspace) {
            Some(ws) => Ok(payload::stream_list(ws.streams.keys().map(String::as_str))),
            None => Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace '{workspace}' is not open"),
            )),
        }
    }

    fn list_tools(&self, workspace: &str, stream: &str) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let Some(ws) = state.runtime.get(workspace) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace '{workspace}' is not open"),
            ));
        };
        match ws.streams.get(stream) {
            Some(tools) => Ok(payload::tool_list(tools)),
            None => Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no stream '{stream}' in workspace '{workspace}'"),
            )),
        }
    }

    fn create_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let Some(ws) = state.runtime.get_mut(workspace) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace '{workspace}' is not open"),
            ));
        };
        if !ws.streams.contains_key(stream) {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no stream '{stream}' in workspace '{workspace}'"),
            ));
        }
        let key = (stream.to_string(), sample.to_string());
        if ws.samples.contains_key(&key) {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("sample '{sample}' already exists in stream '{stream}'"),
            ));
        }
        ws.samples.insert(key, SimSample::default());
        Ok(())
    }

    fn sample_add_image(
        &self,
        workspace: &str,
        stream: &str,
        sample: &str,
        image: ImageRef<'_>,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let img = Self::resolve_image(state, image)?;
        let Some(slot) = state
            .runtime
            .get_mut(workspace)
            .and_then(|ws| ws.samples.get_mut(&(stream.to_string(), sample.to_string())))
        else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no sample '{sample}' in {workspace}/{stream}"),
            ));
        };
        if slot.image.is_some() {
            // The vendor contract has no image replacement.
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("sample '{sample}' already has an image attached"),
            ));
        }
        slot.image = Some(img);
        Ok(())
    }

    fn sample_process(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        sample: &str,
        _parameters: &str,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let Some(ws) = state.runtime.get_mut(workspace) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace '{workspace}' is not open"),
            ));
        };
        let Some(chain) = ws.streams.get(stream).cloned() else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no stream '{stream}' in workspace '{workspace}'"),
            ));
        };
        let Some(position) = chain.iter().position(|t| t.name == tool) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no tool '{tool}' in stream '{stream}'"),
            ));
        };
        let Some(slot) = ws.samples.get_mut(&(stream.to_string(), sample.to_string())) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no sample '{sample}' in {workspace}/{stream}"),
            ));
        };
        let Some(img) = &slot.image else {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("sample '{sample}' has no image attached"),
            ));
        };

        // Unprocessed predecessors in the chain run first; the requested
        // tool itself always recomputes, overwriting its stored result.
        for entry in &chain[..position] {
            slot.results
                .entry(entry.name.clone())
                .or_insert_with(|| payload::tool_score(&entry.name, &img.pixels));
        }
        let score = payload::tool_score(tool, &img.pixels);
        slot.results.insert(tool.to_string(), score);
        Ok(())
    }

    fn read_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let Some(ws) = state.runtime.get(workspace) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace '{workspace}' is not open"),
            ));
        };
        let chain = ws.streams.get(stream).cloned().unwrap_or_default();
        let Some(slot) = ws.samples.get(&(stream.to_string(), sample.to_string())) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no sample '{sample}' in {workspace}/{stream}"),
            ));
        };
        if slot.results.is_empty() {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("sample '{sample}' has not been processed"),
            ));
        }
        // Chain order, not insertion order.
        let markings: Vec<(String, f64)> = chain
            .iter()
            .filter_map(|entry| {
                slot.results
                    .get(&entry.name)
                    .map(|score| (entry.name.clone(), *score))
            })
            .collect();
        Ok(payload::sample_result(sample, &markings))
    }

    fn free_sample(&self, workspace: &str, stream: &str, sample: &str) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let Some(ws) = state.runtime.get_mut(workspace) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("workspace '{workspace}' is not open"),
            ));
        };
        if ws
            .samples
            .remove(&(stream.to_string(), sample.to_string()))
            .is_none()
        {
            // A second free of the same name is a sequencing error, not a
            // missing resource.
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("sample '{sample}' is not allocated in {workspace}/{stream}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsight_core::{PixelDepth, ToolKind};

    fn manifest_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("textile.vrws");
        WorkspaceManifest::single_tool("default", "analyze", ToolKind::Red)
            .write_to(&path)
            .unwrap();
        path
    }

    fn raw_image() -> (ImageDesc, Vec<u8>) {
        let desc = ImageDesc::packed(4, 4, 1, PixelDepth::U8);
        (desc, vec![7u8; 16])
    }

    #[test]
    fn double_initialize_is_reported() {
        let sim = SimRuntime::new();
        sim.initialize(GpuMode::NoGpu, &DeviceSelector::auto()).unwrap();
        let err = sim
            .initialize(GpuMode::NoGpu, &DeviceSelector::auto())
            .unwrap_err();
        assert_eq!(err.0, status::ALREADY_INITIALIZED);

        sim.deinitialize().unwrap();
        sim.initialize(GpuMode::NoGpu, &DeviceSelector::auto()).unwrap();
    }

    #[test]
    fn unknown_device_rejected() {
        let sim = SimRuntime::with_devices(1);
        let err = sim
            .initialize(GpuMode::SingleDevicePerTool, &DeviceSelector::single("3"))
            .unwrap_err();
        assert_eq!(err.0, status::INVALID_ARGUMENT);
    }

    #[test]
    fn deinitialize_sweeps_images() {
        let sim = SimRuntime::new();
        sim.initialize(GpuMode::NoGpu, &DeviceSelector::auto()).unwrap();

        let (desc, data) = raw_image();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        sim.save_image(&path, ImageRef::Raw { desc: &desc, data: &data })
            .unwrap();
        sim.load_image(&path).unwrap();
        assert_eq!(sim.live_images(), 1);

        sim.deinitialize().unwrap();
        assert_eq!(sim.live_images(), 0);
    }

    #[test]
    fn sample_state_machine_faults() {
        let sim = SimRuntime::new();
        sim.initialize(GpuMode::NoGpu, &DeviceSelector::auto()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let archive = manifest_file(dir.path());
        sim.open_workspace_from_file("ws", &archive).unwrap();

        // Process before attach.
        sim.create_sample("ws", "default", "s1").unwrap();
        let err = sim
            .sample_process("ws", "default", "analyze", "s1", "")
            .unwrap_err();
        assert_eq!(err.0, status::INVALID_STATE);

        // Duplicate create.
        let err = sim.create_sample("ws", "default", "s1").unwrap_err();
        assert_eq!(err.0, status::INVALID_STATE);

        // Second attach.
        let (desc, data) = raw_image();
        let image = ImageRef::Raw { desc: &desc, data: &data };
        sim.sample_add_image("ws", "default", "s1", image).unwrap();
        let err = sim.sample_add_image("ws", "default", "s1", image).unwrap_err();
        assert_eq!(err.0, status::INVALID_STATE);

        // Double free.
        sim.free_sample("ws", "default", "s1").unwrap();
        let err = sim.free_sample("ws", "default", "s1").unwrap_err();
        assert_eq!(err.0, status::INVALID_STATE);
    }

    #[test]
    fn reprocess_overwrites_result() {
        let sim = SimRuntime::new();
        sim.initialize(GpuMode::NoGpu, &DeviceSelector::auto()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let archive = manifest_file(dir.path());
        sim.open_workspace_from_file("ws", &archive).unwrap();

        let (desc, data) = raw_image();
        sim.create_sample("ws", "default", "s1").unwrap();
        sim.sample_add_image("ws", "default", "s1", ImageRef::Raw { desc: &desc, data: &data })
            .unwrap();
        sim.sample_process("ws", "default", "analyze", "s1", "").unwrap();
        let first = sim.read_sample("ws", "default", "s1").unwrap();
        sim.sample_process("ws", "default", "analyze", "s1", "").unwrap();
        let second = sim.read_sample("ws", "default", "s1").unwrap();

        assert_eq!(first, second);
        assert_eq!(
            String::from_utf8(second).unwrap().matches("<marking").count(),
            1
        );
    }

    #[test]
    fn error_message_reports_last_detail() {
        let sim = SimRuntime::new();
        sim.initialize(GpuMode::NoGpu, &DeviceSelector::auto()).unwrap();
        let err = sim
            .open_workspace_from_file("ws", Path::new("/definitely/missing.vrws"))
            .unwrap_err();
        assert_eq!(err.0, status::RESOURCE_NOT_FOUND);

        let payload = sim.error_message(err.0).unwrap();
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains("missing.vrws"), "{text}");
    }
}
