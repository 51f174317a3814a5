use quick_xml::events::Event;
use quick_xml::Reader;

use deepsight_core::{Result, VisionError};

/// Parsed state of a training tool, from the vendor's status payload:
/// `<status busy=".." ready=".." error=".."><progress>..</progress></status>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    /// A background job (database processing or training) is running.
    pub busy: bool,
    /// The tool is trained and loadable by the runtime.
    pub ready: bool,
    /// Failure reported by the most recent job, if any.
    pub error: Option<String>,
    /// Human-readable progress description.
    pub progress: String,
}

impl ToolStatus {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let malformed =
            |e: &dyn std::fmt::Display| VisionError::MalformedResponse(format!("tool status: {e}"));

        let mut reader = Reader::from_reader(payload);
        reader.config_mut().trim_text(true);

        let mut busy = None;
        let mut ready = None;
        let mut error = None;
        let mut progress = String::new();
        let mut in_progress = false;
        let mut buf = Vec::new();
        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| malformed(&e))?;
            match event {
                Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                    b"status" => {
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| malformed(&e))?;
                            let value = attr.unescape_value().map_err(|e| malformed(&e))?;
                            match attr.key.as_ref() {
                                b"busy" => busy = Some(parse_bool(&value)?),
                                b"ready" => ready = Some(parse_bool(&value)?),
                                b"error" if !value.is_empty() => {
                                    error = Some(value.into_owned());
                                }
                                _ => {}
                            }
                        }
                    }
                    b"progress" => in_progress = true,
                    _ => {}
                },
                Event::Text(t) if in_progress => {
                    progress = t.unescape().map_err(|e| malformed(&e))?.into_owned();
                }
                Event::End(e) if e.name().as_ref() == b"progress" => in_progress = false,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        match (busy, ready) {
            (Some(busy), Some(ready)) => Ok(Self {
                busy,
                ready,
                error,
                progress,
            }),
            _ => Err(malformed(&"status element missing busy or ready attribute")),
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(VisionError::MalformedResponse(format!(
            "tool status: '{other}' is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_busy_status_with_progress() {
        let status = ToolStatus::parse(
            br#"<status busy="true" ready="false" error=""><progress>training 50%</progress></status>"#,
        )
        .unwrap();
        assert!(status.busy);
        assert!(!status.ready);
        assert_eq!(status.error, None);
        assert_eq!(status.progress, "training 50%");
    }

    #[test]
    fn empty_error_attribute_is_no_error() {
        let status = ToolStatus::parse(
            br#"<status busy="false" ready="true" error=""><progress>trained</progress></status>"#,
        )
        .unwrap();
        assert_eq!(status.error, None);
        assert!(status.ready);
    }

    #[test]
    fn error_attribute_is_surfaced() {
        let status = ToolStatus::parse(
            br#"<status busy="false" ready="false" error="out of GPU memory"><progress/></status>"#,
        )
        .unwrap();
        assert_eq!(status.error.as_deref(), Some("out of GPU memory"));
    }

    #[test]
    fn rejects_malformed_status() {
        assert!(ToolStatus::parse(b"<status busy=\"true\"/>").is_err());
        assert!(ToolStatus::parse(b"<status busy=\"yes\" ready=\"false\"/>").is_err());
        assert!(ToolStatus::parse(b"not xml").is_err());
    }
}
