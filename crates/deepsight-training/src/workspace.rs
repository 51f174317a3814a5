use std::path::Path;
use std::sync::Arc;

use deepsight_client::{Image, Session};
use deepsight_core::{
    status, Result, StreamName, ToolKind, ToolName, TrainingBackend, VisionError, WorkspaceName,
};

use crate::status::ToolStatus;

/// A training workspace under construction: streams, tool chains, an image
/// database, labels, and trained models.
///
/// Created on an empty (or absent) directory; everything the workspace
/// accumulates lives there. `close` is terminal; dropping an unclosed
/// workspace closes it best-effort, discarding autosaves.
pub struct TrainingWorkspace<'s> {
    session: &'s Session,
    backend: Arc<dyn TrainingBackend>,
    name: WorkspaceName,
    closed: bool,
}

impl<'s> TrainingWorkspace<'s> {
    /// Create a fresh workspace at `path`. The directory must be empty or
    /// absent. Requires a session opened with the training interface.
    pub fn create(
        session: &'s Session,
        name: WorkspaceName,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let backend = session.training_backend()?;
        session.register_workspace(&name)?;
        if let Err(status) = backend.create_workspace(name.as_str(), path) {
            session.unregister_workspace(&name);
            return Err(session.fault(status));
        }
        tracing::info!(workspace = %name, path = %path.display(), "training workspace created");
        Ok(Self {
            session,
            backend,
            name,
            closed: false,
        })
    }

    pub fn name(&self) -> &WorkspaceName {
        &self.name
    }

    fn call(&self, f: impl FnOnce(&dyn TrainingBackend) -> deepsight_core::VendorResult<()>) -> Result<()> {
        self.ensure_open()?;
        f(self.backend.as_ref()).map_err(|s| self.session.fault(s))
    }

    fn query(
        &self,
        f: impl FnOnce(&dyn TrainingBackend) -> deepsight_core::VendorResult<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        self.ensure_open()?;
        f(self.backend.as_ref()).map_err(|s| self.session.fault(s))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VisionError::InvalidState(format!(
                "training workspace '{}' is closed",
                self.name
            )));
        }
        self.session.ensure_open()
    }

    pub fn add_stream(&self, stream: &StreamName) -> Result<()> {
        self.call(|b| b.add_stream(self.name.as_str(), stream.as_str()))
    }

    /// Append a tool to the stream's chain, or insert it after `after`.
    pub fn add_tool(
        &self,
        stream: &StreamName,
        tool: &ToolName,
        after: Option<&ToolName>,
        kind: ToolKind,
    ) -> Result<()> {
        let after = after.map(ToolName::as_str).unwrap_or("");
        self.call(|b| b.add_tool(self.name.as_str(), stream.as_str(), tool.as_str(), after, kind))
    }

    /// Add one image to the stream's database under `name` (typically the
    /// source file name; label selectors match against it).
    pub fn add_image_to_database(
        &self,
        stream: &StreamName,
        image: &Image,
        name: &str,
    ) -> Result<()> {
        self.call(|b| {
            b.add_image_to_database(
                self.name.as_str(),
                stream.as_str(),
                image.as_image_ref(),
                name,
            )
        })
    }

    /// Process the database to build the tool's views (regions of
    /// interest). Runs in the background; `wait` for completion.
    pub fn process_database(&self, stream: &StreamName, tool: &ToolName) -> Result<()> {
        self.call(|b| b.process_database(self.name.as_str(), stream.as_str(), tool.as_str()))
    }

    /// Wait up to `timeout_ms` for the tool's background job; zero blocks
    /// until the job is done.
    pub fn wait(&self, stream: &StreamName, tool: &ToolName, timeout_ms: u32) -> Result<()> {
        self.call(|b| b.tool_wait(self.name.as_str(), stream.as_str(), tool.as_str(), timeout_ms))
    }

    pub fn status(&self, stream: &StreamName, tool: &ToolName) -> Result<ToolStatus> {
        let payload =
            self.query(|b| b.tool_status(self.name.as_str(), stream.as_str(), tool.as_str()))?;
        ToolStatus::parse(&payload)
    }

    /// Read a tool parameter by its slash-separated path (e.g.
    /// `sampling/feature_size`, `training/count_epochs`).
    pub fn get_parameter(
        &self,
        stream: &StreamName,
        tool: &ToolName,
        path: &str,
    ) -> Result<String> {
        let payload = self.query(|b| {
            b.get_parameter(self.name.as_str(), stream.as_str(), tool.as_str(), path)
        })?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    pub fn set_parameter(
        &self,
        stream: &StreamName,
        tool: &ToolName,
        path: &str,
        value: &str,
    ) -> Result<()> {
        self.call(|b| {
            b.set_parameter(self.name.as_str(), stream.as_str(), tool.as_str(), path, value)
        })
    }

    /// Label views selected by the vendor query grammar: `not labeled`,
    /// or a quoted substring of the view's image name (e.g. `'bad'`).
    /// The empty label marks a view Good.
    pub fn label_views(
        &self,
        stream: &StreamName,
        tool: &ToolName,
        selector: &str,
        label: &str,
    ) -> Result<()> {
        self.call(|b| {
            b.label_views(self.name.as_str(), stream.as_str(), tool.as_str(), selector, label)
        })
    }

    /// Start training in the background; `wait`/`status` track progress.
    pub fn train(&self, stream: &StreamName, tool: &ToolName) -> Result<()> {
        self.call(|b| b.train(self.name.as_str(), stream.as_str(), tool.as_str()))
    }

    /// Train and poll to completion: wait `poll_ms` per round, read the
    /// status, fail on its error attribute, stop once the tool goes idle.
    pub fn train_blocking(
        &self,
        stream: &StreamName,
        tool: &ToolName,
        poll_ms: u32,
    ) -> Result<ToolStatus> {
        self.train(stream, tool)?;
        loop {
            self.wait(stream, tool, poll_ms)?;
            let current = self.status(stream, tool)?;
            if let Some(message) = &current.error {
                return Err(VisionError::Vendor {
                    status: status::INTERNAL_ERROR,
                    message: format!("training failed: {message}"),
                });
            }
            tracing::info!(tool = %tool, progress = %current.progress, "training");
            if !current.busy {
                return Ok(current);
            }
        }
    }

    /// Export the full workspace archive, optionally with the image
    /// database.
    pub fn export(&self, path: impl AsRef<Path>, include_images: bool) -> Result<()> {
        self.call(|b| b.export_workspace(self.name.as_str(), path.as_ref(), include_images))
    }

    /// Export a runtime archive openable by
    /// `RuntimeWorkspace::open_from_file`. Every tool must be trained.
    pub fn export_runtime(&self, path: impl AsRef<Path>) -> Result<()> {
        self.call(|b| b.export_runtime_workspace(self.name.as_str(), path.as_ref()))
    }

    /// Persist the workspace to its directory.
    pub fn save(&self) -> Result<()> {
        self.call(|b| b.save_workspace(self.name.as_str()))
    }

    /// Close the workspace. `discard_autosave` drops unsaved in-memory
    /// state instead of persisting it.
    pub fn close(mut self, discard_autosave: bool) -> Result<()> {
        self.closed = true;
        let result = self
            .backend
            .close_training_workspace(self.name.as_str(), discard_autosave)
            .map_err(|s| self.session.fault(s));
        self.session.unregister_workspace(&self.name);
        tracing::info!(workspace = %self.name, "training workspace closed");
        result
    }
}

impl Drop for TrainingWorkspace<'_> {
    fn drop(&mut self) {
        if self.closed || !self.session.is_open() {
            return;
        }
        if let Err(status) = self.backend.close_training_workspace(self.name.as_str(), true) {
            tracing::warn!(workspace = %self.name, status = status.0, "close on drop failed");
        }
        self.session.unregister_workspace(&self.name);
    }
}

impl std::fmt::Debug for TrainingWorkspace<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingWorkspace")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .finish()
    }
}
