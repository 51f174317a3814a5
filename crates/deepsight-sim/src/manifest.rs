use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use deepsight_core::{Result, ToolKind, VisionError};

/// One tool in a stream's chain, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEntry {
    pub name: String,
    pub kind: ToolKind,
}

/// On-disk form of a simulated runtime workspace archive.
///
/// The real vendor archive is an opaque binary; the simulation persists the
/// part the runtime contract actually observes — named streams, each with
/// an ordered tool chain — as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    pub streams: BTreeMap<String, Vec<ToolEntry>>,
}

impl WorkspaceManifest {
    /// A single-stream, single-tool workspace, the shape of the tutorial
    /// archives (`default` stream, one `analyze` tool).
    pub fn single_tool(stream: &str, tool: &str, kind: ToolKind) -> Self {
        let mut streams = BTreeMap::new();
        streams.insert(
            stream.to_string(),
            vec![ToolEntry {
                name: tool.to_string(),
                kind,
            }],
        );
        Self { streams }
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data).map_err(|e| {
            VisionError::MalformedResponse(format!(
                "workspace archive '{}': {e}",
                path.display()
            ))
        })
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| VisionError::MalformedResponse(format!("workspace archive: {e}")))?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textile.vrws");

        let manifest = WorkspaceManifest::single_tool("default", "analyze", ToolKind::Red);
        manifest.write_to(&path).unwrap();

        let back = WorkspaceManifest::read_from(&path).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.streams["default"][0].name, "analyze");
    }

    #[test]
    fn garbage_archive_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vrws");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            WorkspaceManifest::read_from(&path),
            Err(VisionError::MalformedResponse(_))
        ));
    }
}
