//! Training-interface implementation of the simulated runtime.
//!
//! Training jobs (database processing, tool training) are modeled as
//! deterministic background work: starting an operation parks a job on the
//! tool, and every wait call advances it a fixed step. A wait with timeout
//! zero drives the job to completion, matching the blocking form of the
//! vendor call.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use deepsight_core::{status, ImageRef, ToolKind, TrainingBackend, VendorResult};

use crate::manifest::{ToolEntry, WorkspaceManifest};
use crate::payload;
use crate::runtime::{ensure_init, fail, SimRuntime};

/// Progress a single wait call contributes, in percent.
const WAIT_STEP: u32 = 25;

pub(crate) struct TrainingWs {
    pub path: PathBuf,
    pub streams: BTreeMap<String, TrainingStream>,
}

#[derive(Default)]
pub(crate) struct TrainingStream {
    pub tools: Vec<TrainingTool>,
    pub database: Vec<ViewRecord>,
}

pub(crate) struct TrainingTool {
    pub name: String,
    pub kind: ToolKind,
    pub params: BTreeMap<String, String>,
    pub job: Option<Job>,
    pub trained: bool,
    pub error: Option<String>,
}

pub(crate) struct ViewRecord {
    pub name: String,
    pub label: Option<String>,
    pub processed: bool,
}

pub(crate) struct Job {
    pub kind: JobKind,
    pub progress: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    ProcessDatabase,
    Train,
}

impl TrainingTool {
    fn new(name: &str, kind: ToolKind) -> Self {
        let mut params = BTreeMap::new();
        params.insert("sampling/feature_size".to_string(), "60x60".to_string());
        params.insert("training/count_epochs".to_string(), "50".to_string());
        Self {
            name: name.to_string(),
            kind,
            params,
            job: None,
            trained: false,
            error: None,
        }
    }
}

/// Serialized form of a full training workspace (`export_workspace`).
#[derive(Serialize, Deserialize)]
struct TrainingArchive {
    manifest: WorkspaceManifest,
    views: BTreeMap<String, Vec<ViewArchive>>,
    include_images: bool,
}

#[derive(Serialize, Deserialize)]
struct ViewArchive {
    name: String,
    label: Option<String>,
}

type Located<'a, T> = Result<&'a mut T, (u32, String)>;

fn ws_mut<'a>(training: &'a mut HashMap<String, TrainingWs>, name: &str) -> Located<'a, TrainingWs> {
    training.get_mut(name).ok_or_else(|| {
        (
            status::RESOURCE_NOT_FOUND,
            format!("training workspace '{name}' is not open"),
        )
    })
}

fn stream_mut<'a>(
    training: &'a mut HashMap<String, TrainingWs>,
    workspace: &str,
    stream: &str,
) -> Located<'a, TrainingStream> {
    let ws = ws_mut(training, workspace)?;
    ws.streams.get_mut(stream).ok_or_else(|| {
        (
            status::RESOURCE_NOT_FOUND,
            format!("no stream '{stream}' in training workspace '{workspace}'"),
        )
    })
}

fn tool_mut<'a>(
    training: &'a mut HashMap<String, TrainingWs>,
    workspace: &str,
    stream: &str,
    tool: &str,
) -> Located<'a, TrainingTool> {
    let st = stream_mut(training, workspace, stream)?;
    st.tools.iter_mut().find(|t| t.name == tool).ok_or_else(|| {
        (
            status::RESOURCE_NOT_FOUND,
            format!("no tool '{tool}' in stream '{stream}'"),
        )
    })
}

fn manifest_of(ws: &TrainingWs) -> WorkspaceManifest {
    let streams = ws
        .streams
        .iter()
        .map(|(name, st)| {
            let tools = st
                .tools
                .iter()
                .map(|t| ToolEntry {
                    name: t.name.clone(),
                    kind: t.kind,
                })
                .collect();
            (name.clone(), tools)
        })
        .collect();
    WorkspaceManifest { streams }
}

fn archive_of(ws: &TrainingWs, include_images: bool) -> TrainingArchive {
    let views = ws
        .streams
        .iter()
        .map(|(name, st)| {
            let views = st
                .database
                .iter()
                .map(|v| ViewArchive {
                    name: v.name.clone(),
                    label: v.label.clone(),
                })
                .collect();
            (name.clone(), views)
        })
        .collect();
    TrainingArchive {
        manifest: manifest_of(ws),
        views,
        include_images,
    }
}

/// Finish the effects of a completed job.
fn complete_job(stream_db: &mut [ViewRecord], tool: &mut TrainingTool, kind: JobKind) {
    match kind {
        JobKind::ProcessDatabase => {
            for view in stream_db.iter_mut() {
                view.processed = true;
            }
        }
        JobKind::Train => {
            if stream_db.iter().any(|v| !v.processed) {
                tool.error = Some("database contains unprocessed views".to_string());
                tool.trained = false;
            } else {
                tool.trained = true;
            }
        }
    }
}

impl TrainingBackend for SimRuntime {
    fn create_workspace(&self, workspace: &str, path: &Path) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        if state.training.contains_key(workspace) {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("training workspace '{workspace}' is already open"),
            ));
        }
        // The vendor requires a fresh directory for a new workspace.
        let occupied = path.exists()
            && path
                .read_dir()
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(true);
        if occupied {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_ARGUMENT,
                format!(
                    "workspace path '{}' must be an empty or absent directory",
                    path.display()
                ),
            ));
        }
        if let Err(err) = std::fs::create_dir_all(path) {
            return Err(fail(
                &mut state.last_error,
                status::INTERNAL_ERROR,
                format!("failed to create workspace directory: {err}"),
            ));
        }
        state.training.insert(
            workspace.to_string(),
            TrainingWs {
                path: path.to_path_buf(),
                streams: BTreeMap::new(),
            },
        );
        tracing::debug!(workspace, path = %path.display(), "training workspace created");
        Ok(())
    }

    fn add_stream(&self, workspace: &str, stream: &str) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let ws = match ws_mut(&mut state.training, workspace) {
            Ok(ws) => ws,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        if ws.streams.contains_key(stream) {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("stream '{stream}' already exists"),
            ));
        }
        ws.streams
            .insert(stream.to_string(), TrainingStream::default());
        Ok(())
    }

    fn add_tool(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        after: &str,
        kind: ToolKind,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let st = match stream_mut(&mut state.training, workspace, stream) {
            Ok(st) => st,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        if st.tools.iter().any(|t| t.name == tool) {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("tool '{tool}' already exists in stream '{stream}'"),
            ));
        }
        let insert_at = if after.is_empty() {
            st.tools.len()
        } else {
            match st.tools.iter().position(|t| t.name == after) {
                Some(pos) => pos + 1,
                None => {
                    return Err(fail(
                        &mut state.last_error,
                        status::RESOURCE_NOT_FOUND,
                        format!("no tool '{after}' to insert after"),
                    ))
                }
            }
        };
        st.tools.insert(insert_at, TrainingTool::new(tool, kind));
        Ok(())
    }

    fn add_image_to_database(
        &self,
        workspace: &str,
        stream: &str,
        image: ImageRef<'_>,
        name: &str,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        // Resolves the handle (or validates raw pixels) before the record
        // is created.
        SimRuntime::resolve_image(state, image)?;
        let st = match stream_mut(&mut state.training, workspace, stream) {
            Ok(st) => st,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        if st.database.iter().any(|v| v.name == name) {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("image '{name}' is already in the database"),
            ));
        }
        st.database.push(ViewRecord {
            name: name.to_string(),
            label: None,
            processed: false,
        });
        Ok(())
    }

    fn process_database(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let t = match tool_mut(&mut state.training, workspace, stream, tool) {
            Ok(t) => t,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        if t.job.is_some() {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("tool '{tool}' is busy"),
            ));
        }
        t.job = Some(Job {
            kind: JobKind::ProcessDatabase,
            progress: 0,
        });
        Ok(())
    }

    fn tool_wait(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        timeout_ms: u32,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let st = match stream_mut(&mut state.training, workspace, stream) {
            Ok(st) => st,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        let Some(idx) = st.tools.iter().position(|t| t.name == tool) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no tool '{tool}' in stream '{stream}'"),
            ));
        };
        let t = &mut st.tools[idx];
        let Some(job) = &mut t.job else {
            // Nothing running; the wait returns immediately.
            return Ok(());
        };
        // Timeout zero blocks until the job is done; a bounded wait
        // advances one deterministic step.
        job.progress = if timeout_ms == 0 {
            100
        } else {
            (job.progress + WAIT_STEP).min(100)
        };
        if job.progress >= 100 {
            let kind = job.kind;
            t.job = None;
            complete_job(&mut st.database, &mut st.tools[idx], kind);
        }
        Ok(())
    }

    fn tool_status(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let t = match tool_mut(&mut state.training, workspace, stream, tool) {
            Ok(t) => t,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        let busy = t.job.is_some();
        let error = t.error.clone().unwrap_or_default();
        let progress = match &t.job {
            Some(job) if job.kind == JobKind::Train => format!("training {}%", job.progress),
            Some(job) => format!("processing database {}%", job.progress),
            None if t.trained => "trained".to_string(),
            None => "idle".to_string(),
        };
        Ok(payload::tool_status(busy, t.trained, &error, &progress))
    }

    fn get_parameter(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        path: &str,
    ) -> VendorResult<Vec<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let t = match tool_mut(&mut state.training, workspace, stream, tool) {
            Ok(t) => t,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        match t.params.get(path) {
            Some(value) => Ok(value.clone().into_bytes()),
            None => Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("tool '{tool}' has no parameter '{path}'"),
            )),
        }
    }

    fn set_parameter(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        path: &str,
        value: &str,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let t = match tool_mut(&mut state.training, workspace, stream, tool) {
            Ok(t) => t,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        t.params.insert(path.to_string(), value.to_string());
        Ok(())
    }

    fn label_views(
        &self,
        workspace: &str,
        stream: &str,
        tool: &str,
        selector: &str,
        label: &str,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        // The tool addresses the labeling pass even though labels live on
        // the stream's views.
        if let Err((code, msg)) = tool_mut(&mut state.training, workspace, stream, tool) {
            return Err(fail(&mut state.last_error, code, msg));
        }
        let st = match stream_mut(&mut state.training, workspace, stream) {
            Ok(st) => st,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        // Selector grammar of the vendor query language, reduced to the
        // two forms the drivers use: `not labeled`, or a quoted substring
        // of the view's image name.
        if selector == "not labeled" {
            for view in st.database.iter_mut().filter(|v| v.label.is_none()) {
                view.label = Some(label.to_string());
            }
            return Ok(());
        }
        if selector.len() >= 2 && selector.starts_with('\'') && selector.ends_with('\'') {
            let needle = &selector[1..selector.len() - 1];
            for view in st.database.iter_mut().filter(|v| v.name.contains(needle)) {
                view.label = Some(label.to_string());
            }
            return Ok(());
        }
        Err(fail(
            &mut state.last_error,
            status::INVALID_ARGUMENT,
            format!("unsupported view selector '{selector}'"),
        ))
    }

    fn train(&self, workspace: &str, stream: &str, tool: &str) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let st = match stream_mut(&mut state.training, workspace, stream) {
            Ok(st) => st,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        if st.database.is_empty() {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("stream '{stream}' has an empty image database"),
            ));
        }
        let Some(t) = st.tools.iter_mut().find(|t| t.name == tool) else {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("no tool '{tool}' in stream '{stream}'"),
            ));
        };
        if t.job.is_some() {
            return Err(fail(
                &mut state.last_error,
                status::INVALID_STATE,
                format!("tool '{tool}' is busy"),
            ));
        }
        t.error = None;
        t.trained = false;
        t.job = Some(Job {
            kind: JobKind::Train,
            progress: 0,
        });
        tracing::debug!(workspace, stream, tool, "training started");
        Ok(())
    }

    fn export_workspace(
        &self,
        workspace: &str,
        path: &Path,
        include_images: bool,
    ) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let ws = match ws_mut(&mut state.training, workspace) {
            Ok(ws) => ws,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        let archive = archive_of(ws, include_images);
        let data = match serde_json::to_vec_pretty(&archive) {
            Ok(data) => data,
            Err(err) => {
                return Err(fail(
                    &mut state.last_error,
                    status::INTERNAL_ERROR,
                    format!("failed to serialize workspace archive: {err}"),
                ))
            }
        };
        if let Err(err) = std::fs::write(path, data) {
            return Err(fail(
                &mut state.last_error,
                status::INTERNAL_ERROR,
                format!("failed to write '{}': {err}", path.display()),
            ));
        }
        Ok(())
    }

    fn export_runtime_workspace(&self, workspace: &str, path: &Path) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let ws = match ws_mut(&mut state.training, workspace) {
            Ok(ws) => ws,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        // Only a fully trained chain exports as a runtime archive.
        for (stream, st) in &ws.streams {
            if let Some(t) = st.tools.iter().find(|t| !t.trained) {
                let msg = format!("tool '{}' in stream '{stream}' is not trained", t.name);
                return Err(fail(&mut state.last_error, status::INVALID_STATE, msg));
            }
        }
        let manifest = manifest_of(ws);
        if let Err(err) = manifest.write_to(path) {
            return Err(fail(
                &mut state.last_error,
                status::INTERNAL_ERROR,
                err.to_string(),
            ));
        }
        tracing::debug!(workspace, path = %path.display(), "runtime workspace exported");
        Ok(())
    }

    fn save_workspace(&self, workspace: &str) -> VendorResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        let ws = match ws_mut(&mut state.training, workspace) {
            Ok(ws) => ws,
            Err((code, msg)) => return Err(fail(&mut state.last_error, code, msg)),
        };
        let archive = archive_of(ws, false);
        let target = ws.path.join("workspace.json");
        let data = match serde_json::to_vec_pretty(&archive) {
            Ok(data) => data,
            Err(err) => {
                return Err(fail(
                    &mut state.last_error,
                    status::INTERNAL_ERROR,
                    format!("failed to serialize workspace: {err}"),
                ))
            }
        };
        if let Err(err) = std::fs::write(&target, data) {
            return Err(fail(
                &mut state.last_error,
                status::INTERNAL_ERROR,
                format!("failed to write '{}': {err}", target.display()),
            ));
        }
        Ok(())
    }

    fn close_training_workspace(&self, workspace: &str, discard_autosave: bool) -> VendorResult<()> {
        if !discard_autosave {
            self.save_workspace(workspace)?;
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        ensure_init(state)?;
        if state.training.remove(workspace).is_none() {
            return Err(fail(
                &mut state.last_error,
                status::RESOURCE_NOT_FOUND,
                format!("training workspace '{workspace}' is not open"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsight_core::{Backend, DeviceSelector, GpuMode, ImageDesc, PixelDepth};

    fn ready_runtime() -> SimRuntime {
        let sim = SimRuntime::new();
        sim.initialize(GpuMode::NoGpu, &DeviceSelector::auto()).unwrap();
        sim
    }

    fn raw_image() -> (ImageDesc, Vec<u8>) {
        let desc = ImageDesc::packed(4, 4, 1, PixelDepth::U8);
        (desc, vec![9u8; 16])
    }

    fn workspace_with_tool(sim: &SimRuntime, dir: &Path) {
        sim.create_workspace("textile", &dir.join("ws")).unwrap();
        sim.add_stream("textile", "default").unwrap();
        sim.add_tool("textile", "default", "analyze", "", ToolKind::Red)
            .unwrap();
    }

    #[test]
    fn create_requires_empty_directory() {
        let sim = ready_runtime();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("occupied"), b"x").unwrap();
        let err = sim.create_workspace("textile", dir.path()).unwrap_err();
        assert_eq!(err.0, status::INVALID_ARGUMENT);

        sim.create_workspace("textile", &dir.path().join("fresh"))
            .unwrap();
    }

    #[test]
    fn bounded_wait_advances_training_in_steps() {
        let sim = ready_runtime();
        let dir = tempfile::tempdir().unwrap();
        workspace_with_tool(&sim, dir.path());

        let (desc, data) = raw_image();
        sim.add_image_to_database(
            "textile",
            "default",
            ImageRef::Raw { desc: &desc, data: &data },
            "000000.png",
        )
        .unwrap();
        sim.process_database("textile", "default", "analyze").unwrap();
        sim.tool_wait("textile", "default", "analyze", 0).unwrap();

        sim.train("textile", "default", "analyze").unwrap();
        let mut waits = 0;
        loop {
            sim.tool_wait("textile", "default", "analyze", 1000).unwrap();
            waits += 1;
            let xml =
                String::from_utf8(sim.tool_status("textile", "default", "analyze").unwrap())
                    .unwrap();
            if xml.contains(r#"busy="false""#) {
                assert!(xml.contains(r#"ready="true""#), "{xml}");
                break;
            }
            assert!(waits < 10, "training never finished");
        }
        assert_eq!(waits, 100 / WAIT_STEP);
    }

    #[test]
    fn training_unprocessed_database_reports_error_attribute() {
        let sim = ready_runtime();
        let dir = tempfile::tempdir().unwrap();
        workspace_with_tool(&sim, dir.path());

        let (desc, data) = raw_image();
        sim.add_image_to_database(
            "textile",
            "default",
            ImageRef::Raw { desc: &desc, data: &data },
            "000000.png",
        )
        .unwrap();
        // Train without processing the database first.
        sim.train("textile", "default", "analyze").unwrap();
        sim.tool_wait("textile", "default", "analyze", 0).unwrap();

        let xml = String::from_utf8(sim.tool_status("textile", "default", "analyze").unwrap())
            .unwrap();
        assert!(xml.contains("unprocessed"), "{xml}");
        assert!(xml.contains(r#"ready="false""#), "{xml}");
    }

    #[test]
    fn label_selectors() {
        let sim = ready_runtime();
        let dir = tempfile::tempdir().unwrap();
        workspace_with_tool(&sim, dir.path());

        let (desc, data) = raw_image();
        for name in ["000000.png", "bad000001.png"] {
            sim.add_image_to_database(
                "textile",
                "default",
                ImageRef::Raw { desc: &desc, data: &data },
                name,
            )
            .unwrap();
        }
        sim.label_views("textile", "default", "analyze", "'bad'", "Bad")
            .unwrap();
        sim.label_views("textile", "default", "analyze", "not labeled", "")
            .unwrap();

        let guard = sim.state.lock();
        let db = &guard.training["textile"].streams["default"].database;
        assert_eq!(db[0].label.as_deref(), Some(""));
        assert_eq!(db[1].label.as_deref(), Some("Bad"));
        drop(guard);

        let err = sim
            .label_views("textile", "default", "analyze", "unknown-form", "x")
            .unwrap_err();
        assert_eq!(err.0, status::INVALID_ARGUMENT);
    }

    #[test]
    fn untrained_tool_blocks_runtime_export() {
        let sim = ready_runtime();
        let dir = tempfile::tempdir().unwrap();
        workspace_with_tool(&sim, dir.path());
        let err = sim
            .export_runtime_workspace("textile", &dir.path().join("textile.vrws"))
            .unwrap_err();
        assert_eq!(err.0, status::INVALID_STATE);
    }
}
