use quick_xml::events::Event;
use quick_xml::Reader;

use deepsight_core::{Result, VisionError};
use serde::Serialize;

/// Parsed result set of a processed sample.
///
/// The vendor reports one marking per processed tool:
/// `<sample name=".."><marking tool=".." score=".."/>..</sample>`, in
/// chain order. Parsing is isolated here so call sites never touch the
/// serialization format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    pub sample: String,
    pub markings: Vec<Marking>,
}

/// One tool's contribution to a sample's result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marking {
    pub tool: String,
    pub score: f64,
}

impl SampleResult {
    /// Find the marking a given tool produced, if it ran.
    pub fn marking(&self, tool: &str) -> Option<&Marking> {
        self.markings.iter().find(|m| m.tool == tool)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let malformed = |e: &dyn std::fmt::Display| {
            VisionError::MalformedResponse(format!("sample result: {e}"))
        };

        let mut reader = Reader::from_reader(payload);
        reader.config_mut().trim_text(true);

        let mut sample = None;
        let mut markings = Vec::new();
        let mut buf = Vec::new();
        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| malformed(&e))?;
            match event {
                Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                    b"sample" => {
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| malformed(&e))?;
                            if attr.key.as_ref() == b"name" {
                                let value =
                                    attr.unescape_value().map_err(|e| malformed(&e))?;
                                sample = Some(value.into_owned());
                            }
                        }
                    }
                    b"marking" => {
                        let mut tool = None;
                        let mut score = None;
                        for attr in e.attributes() {
                            let attr = attr.map_err(|e| malformed(&e))?;
                            let value = attr.unescape_value().map_err(|e| malformed(&e))?;
                            match attr.key.as_ref() {
                                b"tool" => tool = Some(value.into_owned()),
                                b"score" => {
                                    score = Some(value.parse::<f64>().map_err(|_| {
                                        malformed(&format!("score '{value}' is not a number"))
                                    })?)
                                }
                                _ => {}
                            }
                        }
                        match (tool, score) {
                            (Some(tool), Some(score)) => markings.push(Marking { tool, score }),
                            _ => {
                                return Err(malformed(&"marking missing tool or score"));
                            }
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let sample = sample.ok_or_else(|| malformed(&"no sample element"))?;
        Ok(Self { sample, markings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_results() {
        let xml = br#"<sample name="s1">
            <marking tool="locate" score="0.9112"/>
            <marking tool="analyze" score="0.1408"/>
        </sample>"#;
        let result = SampleResult::parse(xml).unwrap();
        assert_eq!(result.sample, "s1");
        assert_eq!(result.markings.len(), 2);
        assert_eq!(result.markings[0].tool, "locate");
        assert_eq!(result.marking("analyze").unwrap().score, 0.1408);
        assert!(result.marking("missing").is_none());
    }

    #[test]
    fn empty_marking_set_is_valid() {
        let result = SampleResult::parse(br#"<sample name="s1"/>"#).unwrap();
        assert!(result.markings.is_empty());
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(SampleResult::parse(b"<markings/>").is_err());
        assert!(SampleResult::parse(br#"<sample name="s1"><marking tool="a"/></sample>"#).is_err());
        assert!(SampleResult::parse(
            br#"<sample name="s1"><marking tool="a" score="high"/></sample>"#
        )
        .is_err());
    }
}
