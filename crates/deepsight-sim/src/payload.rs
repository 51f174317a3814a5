//! XML payload builders for the simulated runtime.
//!
//! The vendor protocol answers every query with a small XML document; the
//! simulation reproduces the shapes the client parses (device list, stream
//! and tool lists, sample results, training status, error payloads).

use std::fmt::Write as _;

use quick_xml::escape::escape;

use crate::manifest::ToolEntry;

pub(crate) fn error_payload(message: &str) -> Vec<u8> {
    format!("<error>{}</error>", escape(message)).into_bytes()
}

pub(crate) fn device_list(devices: &[String]) -> Vec<u8> {
    let mut xml = String::from("<devices>");
    for (index, id) in devices.iter().enumerate() {
        let _ = write!(xml, r#"<device id="{}" index="{index}"/>"#, escape(id.as_str()));
    }
    xml.push_str("</devices>");
    xml.into_bytes()
}

pub(crate) fn stream_list<'a>(names: impl Iterator<Item = &'a str>) -> Vec<u8> {
    let mut xml = String::from("<streams>");
    for name in names {
        let _ = write!(xml, r#"<stream name="{}"/>"#, escape(name));
    }
    xml.push_str("</streams>");
    xml.into_bytes()
}

pub(crate) fn tool_list(tools: &[ToolEntry]) -> Vec<u8> {
    let mut xml = String::from("<tools>");
    for tool in tools {
        let _ = write!(
            xml,
            r#"<tool name="{}" type="{}"/>"#,
            escape(tool.name.as_str()),
            tool.kind.as_str()
        );
    }
    xml.push_str("</tools>");
    xml.into_bytes()
}

/// Per-tool result set of a sample, in chain order.
pub(crate) fn sample_result(sample: &str, markings: &[(String, f64)]) -> Vec<u8> {
    let mut xml = format!(r#"<sample name="{}">"#, escape(sample));
    for (tool, score) in markings {
        let _ = write!(
            xml,
            r#"<marking tool="{}" score="{score:.4}"/>"#,
            escape(tool.as_str())
        );
    }
    xml.push_str("</sample>");
    xml.into_bytes()
}

pub(crate) fn tool_status(busy: bool, ready: bool, error: &str, progress: &str) -> Vec<u8> {
    format!(
        r#"<status busy="{busy}" ready="{ready}" error="{}"><progress>{}</progress></status>"#,
        escape(error),
        escape(progress)
    )
    .into_bytes()
}

/// FNV-1a over the pixel bytes and the tool name; the low digits become the
/// deterministic score in `[0, 1)`.
pub(crate) fn tool_score(tool: &str, pixels: &[u8]) -> f64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for &byte in tool.as_bytes().iter().chain(pixels) {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    (hash % 10_000) as f64 / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsight_core::ToolKind;

    #[test]
    fn escapes_attribute_values() {
        let xml = String::from_utf8(error_payload("bad <tool> & worse")).unwrap();
        assert_eq!(xml, "<error>bad &lt;tool&gt; &amp; worse</error>");
    }

    #[test]
    fn device_list_is_indexed() {
        let xml = String::from_utf8(device_list(&["SIM GPU 0".into(), "SIM GPU 1".into()])).unwrap();
        assert!(xml.contains(r#"<device id="SIM GPU 0" index="0"/>"#));
        assert!(xml.contains(r#"<device id="SIM GPU 1" index="1"/>"#));
    }

    #[test]
    fn tool_list_carries_kind() {
        let tools = vec![ToolEntry {
            name: "analyze".into(),
            kind: ToolKind::Red,
        }];
        let xml = String::from_utf8(tool_list(&tools)).unwrap();
        assert!(xml.contains(r#"<tool name="analyze" type="red"/>"#));
    }

    #[test]
    fn score_is_deterministic_and_tool_sensitive() {
        let pixels = [1u8, 2, 3, 4];
        let a = tool_score("analyze", &pixels);
        assert_eq!(a, tool_score("analyze", &pixels));
        assert_ne!(a, tool_score("locate", &pixels));
        assert!((0.0..1.0).contains(&a));
    }
}
