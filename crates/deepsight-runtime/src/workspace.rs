use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use deepsight_client::Session;
use deepsight_core::{Result, SampleName, StreamName, ToolName, VisionError, WorkspaceName};

use crate::sample::Sample;

/// An open runtime workspace: a named, loaded pipeline of tools.
///
/// The name is reserved in the session's workspace registry before the
/// backend is consulted, so double-opening the same name fails fast at the
/// client boundary. Closing is terminal; dropping an unclosed workspace
/// performs a best-effort close.
pub struct RuntimeWorkspace<'s> {
    session: &'s Session,
    name: WorkspaceName,
    closed: bool,
}

impl<'s> RuntimeWorkspace<'s> {
    /// Load a workspace archive under `name`.
    pub fn open_from_file(
        session: &'s Session,
        name: WorkspaceName,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        session.register_workspace(&name)?;
        if let Err(status) = session
            .backend()
            .open_workspace_from_file(name.as_str(), path)
        {
            session.unregister_workspace(&name);
            return Err(session.fault(status));
        }
        tracing::info!(workspace = %name, path = %path.display(), "workspace opened");
        Ok(Self {
            session,
            name,
            closed: false,
        })
    }

    pub fn name(&self) -> &WorkspaceName {
        &self.name
    }

    pub(crate) fn session(&self) -> &'s Session {
        self.session
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VisionError::InvalidState(format!(
                "workspace '{}' is closed",
                self.name
            )));
        }
        self.session.ensure_open()
    }

    /// Streams defined by the workspace.
    pub fn streams(&self) -> Result<Vec<StreamName>> {
        self.ensure_open()?;
        let payload = self
            .session
            .backend()
            .list_streams(self.name.as_str())
            .map_err(|s| self.session.fault(s))?;
        parse_named_list(&payload, b"stream")?
            .into_iter()
            .map(StreamName::new)
            .collect()
    }

    /// Tools of one stream, in chain order.
    pub fn tools(&self, stream: &StreamName) -> Result<Vec<ToolName>> {
        self.ensure_open()?;
        let payload = self
            .session
            .backend()
            .list_tools(self.name.as_str(), stream.as_str())
            .map_err(|s| self.session.fault(s))?;
        parse_named_list(&payload, b"tool")?
            .into_iter()
            .map(ToolName::new)
            .collect()
    }

    /// Allocate a sample. The name must be unique among unfreed samples of
    /// the stream; concurrent callers are responsible for using distinct
    /// names (the vendor contract leaves colliding names undefined).
    pub fn create_sample(&self, stream: &StreamName, name: SampleName) -> Result<Sample<'_>> {
        self.ensure_open()?;
        self.session
            .backend()
            .create_sample(self.name.as_str(), stream.as_str(), name.as_str())
            .map_err(|s| self.session.fault(s))?;
        Ok(Sample::new(self, stream.clone(), name))
    }

    /// Close the workspace and release its name for reuse.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let result = self
            .session
            .backend()
            .close_workspace(self.name.as_str())
            .map_err(|s| self.session.fault(s));
        self.session.unregister_workspace(&self.name);
        tracing::info!(workspace = %self.name, "workspace closed");
        result
    }
}

impl Drop for RuntimeWorkspace<'_> {
    fn drop(&mut self) {
        if self.closed || !self.session.is_open() {
            return;
        }
        if let Err(status) = self.session.backend().close_workspace(self.name.as_str()) {
            tracing::warn!(workspace = %self.name, status = status.0, "close on drop failed");
        }
        self.session.unregister_workspace(&self.name);
    }
}

impl std::fmt::Debug for RuntimeWorkspace<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeWorkspace")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Parse `<parent><elem name=".."/>..</parent>` into the `name` values,
/// preserving document order.
fn parse_named_list(payload: &[u8], element: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(payload);
    reader.config_mut().trim_text(true);

    let mut names = Vec::new();
    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| VisionError::MalformedResponse(format!("name list: {e}")))?;
        match event {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == element => {
                let mut name = None;
                for attr in e.attributes() {
                    let attr = attr
                        .map_err(|e| VisionError::MalformedResponse(format!("name list: {e}")))?;
                    if attr.key.as_ref() == b"name" {
                        let value = attr.unescape_value().map_err(|e| {
                            VisionError::MalformedResponse(format!("name list: {e}"))
                        })?;
                        name = Some(value.into_owned());
                    }
                }
                match name {
                    Some(name) => names.push(name),
                    None => {
                        return Err(VisionError::MalformedResponse(format!(
                            "{} entry missing name attribute",
                            String::from_utf8_lossy(element)
                        )))
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_list_in_order() {
        let xml = br#"<tools><tool name="locate" type="blue"/><tool name="analyze" type="red"/></tools>"#;
        assert_eq!(
            parse_named_list(xml, b"tool").unwrap(),
            vec!["locate".to_string(), "analyze".to_string()]
        );
    }

    #[test]
    fn empty_list_parses() {
        assert!(parse_named_list(b"<streams/>", b"stream").unwrap().is_empty());
    }

    #[test]
    fn missing_name_attribute_is_malformed() {
        assert!(parse_named_list(b"<tools><tool type=\"red\"/></tools>", b"tool").is_err());
    }
}
