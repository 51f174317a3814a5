use deepsight_client::{Buffer, Image};
use deepsight_core::{Result, SampleName, StreamName, ToolName, VisionError};

use crate::result::SampleResult;
use crate::workspace::RuntimeWorkspace;

/// Lifecycle position of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    ImageAttached,
    Processed,
}

/// One unit of inference work: an image plus accumulated per-tool results.
///
/// The vendor-side state machine is `Created -> ImageAttached ->
/// Processed -> Freed`; [`Sample::free`] consumes the handle, so a second
/// free is unrepresentable here (the backend additionally rejects it for
/// raw callers). Results read into a [`Buffer`] stay valid after the
/// sample is freed.
pub struct Sample<'w> {
    workspace: &'w RuntimeWorkspace<'w>,
    stream: StreamName,
    name: SampleName,
    state: State,
    freed: bool,
}

impl<'w> Sample<'w> {
    pub(crate) fn new(
        workspace: &'w RuntimeWorkspace<'w>,
        stream: StreamName,
        name: SampleName,
    ) -> Self {
        Self {
            workspace,
            stream,
            name,
            state: State::Created,
            freed: false,
        }
    }

    pub fn name(&self) -> &SampleName {
        &self.name
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    /// Attach the image to process. The vendor contract supports exactly
    /// one image per sample and no replacement.
    pub fn attach_image(&mut self, image: &Image) -> Result<()> {
        if self.state != State::Created {
            return Err(VisionError::InvalidState(format!(
                "sample '{}' already has an image attached",
                self.name
            )));
        }
        self.backend_call(|ws, stream, name| {
            ws.session().backend().sample_add_image(
                ws.name().as_str(),
                stream,
                name,
                image.as_image_ref(),
            )
        })?;
        self.state = State::ImageAttached;
        Ok(())
    }

    /// Run one named tool. Unprocessed predecessors in the chain run
    /// first, so invoking the last tool processes the whole chain;
    /// re-running a tool overwrites its stored result.
    pub fn process(&mut self, tool: &ToolName, parameters: &str) -> Result<()> {
        if self.state == State::Created {
            return Err(VisionError::InvalidState(format!(
                "sample '{}' has no image attached",
                self.name
            )));
        }
        self.backend_call(|ws, stream, name| {
            ws.session().backend().sample_process(
                ws.name().as_str(),
                stream,
                tool.as_str(),
                name,
                parameters,
            )
        })?;
        self.state = State::Processed;
        tracing::debug!(sample = %self.name, tool = %tool, "sample processed");
        Ok(())
    }

    /// Fill `buf` with the accumulated result set as structured XML.
    pub fn read_result(&self, buf: &mut Buffer) -> Result<()> {
        if self.state != State::Processed {
            return Err(VisionError::InvalidState(format!(
                "sample '{}' has not been processed",
                self.name
            )));
        }
        let ws = self.workspace;
        let payload = ws
            .session()
            .backend()
            .read_sample(ws.name().as_str(), self.stream.as_str(), self.name.as_str())
            .map_err(|s| ws.session().fault(s))?;
        buf.fill(payload);
        Ok(())
    }

    /// Read and parse the result set.
    pub fn result(&self) -> Result<SampleResult> {
        let mut buf = Buffer::new();
        self.read_result(&mut buf)?;
        SampleResult::parse(buf.as_bytes())
    }

    /// Release vendor-side state for this sample and retire its name.
    pub fn free(mut self) -> Result<()> {
        self.freed = true;
        self.backend_call(|ws, stream, name| {
            ws.session()
                .backend()
                .free_sample(ws.name().as_str(), stream, name)
        })
    }

    fn backend_call(
        &self,
        f: impl FnOnce(&RuntimeWorkspace<'_>, &str, &str) -> deepsight_core::VendorResult<()>,
    ) -> Result<()> {
        let ws = self.workspace;
        ws.session().ensure_open()?;
        f(ws, self.stream.as_str(), self.name.as_str()).map_err(|s| ws.session().fault(s))
    }
}

impl Drop for Sample<'_> {
    fn drop(&mut self) {
        if self.freed || !self.workspace.session().is_open() {
            return;
        }
        let ws = self.workspace;
        if let Err(status) = ws.session().backend().free_sample(
            ws.name().as_str(),
            self.stream.as_str(),
            self.name.as_str(),
        ) {
            tracing::warn!(sample = %self.name, status = status.0, "free on drop failed");
        }
    }
}

impl std::fmt::Debug for Sample<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("name", &self.name)
            .field("stream", &self.stream)
            .field("state", &self.state)
            .finish()
    }
}
