use std::sync::Arc;

use quick_xml::events::Event;
use quick_xml::Reader;

use deepsight_core::{Backend, RawStatus, VisionError};

/// Returned when the error-message query itself fails or yields an
/// unusable payload. Error resolution must never become a second fatal
/// failure.
pub const RESOLVE_FALLBACK: &str = "failed to retrieve last error message";

/// Translates opaque status codes into human-readable messages by issuing
/// the runtime's error-message query and extracting the `<error>` text.
#[derive(Clone)]
pub struct ErrorResolver {
    backend: Arc<dyn Backend>,
}

impl ErrorResolver {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Resolve `status` to a message. Infallible by contract: any failure
    /// along the way collapses to the fixed sentinel string.
    pub fn resolve(&self, status: u32) -> String {
        match self.backend.error_message(status) {
            Ok(payload) => {
                extract_error_text(&payload).unwrap_or_else(|| RESOLVE_FALLBACK.to_string())
            }
            Err(_) => RESOLVE_FALLBACK.to_string(),
        }
    }

    /// Resolve a raw fault into the public error type.
    pub fn fault(&self, status: RawStatus) -> VisionError {
        VisionError::from_status(status.0, self.resolve(status.0))
    }
}

impl std::fmt::Debug for ErrorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorResolver").finish_non_exhaustive()
    }
}

/// Pull the text content of the first `<error>` element out of a payload.
fn extract_error_text(payload: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(payload);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut in_error = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"error" => in_error = true,
            Ok(Event::Text(t)) if in_error => {
                let text = t.unescape().ok()?;
                if text.is_empty() {
                    return None;
                }
                return Some(text.into_owned());
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"error" => return None,
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_error_text() {
        assert_eq!(
            extract_error_text(b"<error>workspace is already open</error>").as_deref(),
            Some("workspace is already open")
        );
    }

    #[test]
    fn unescapes_entities() {
        assert_eq!(
            extract_error_text(b"<error>bad &lt;tool&gt;</error>").as_deref(),
            Some("bad <tool>")
        );
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert_eq!(extract_error_text(b"not xml at all"), None);
        assert_eq!(extract_error_text(b"<error></error>"), None);
        assert_eq!(extract_error_text(b"<status ok=\"1\"/>"), None);
    }
}
