use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};

const MAX_NAME_LEN: usize = 128;

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VisionError::InvalidIdentifier(format!(
            "{kind} name must not be empty"
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(VisionError::InvalidIdentifier(format!(
            "{kind} name exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if name.trim() != name {
        return Err(VisionError::InvalidIdentifier(format!(
            "{kind} name '{name}' has leading or trailing whitespace"
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(VisionError::InvalidIdentifier(format!(
            "{kind} name contains control characters"
        )));
    }
    Ok(())
}

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Result<Self> {
                let name = name.into();
                validate_name($kind, &name)?;
                Ok(Self(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = VisionError;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = VisionError;

            fn try_from(s: String) -> Result<Self> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(n: $name) -> String {
                n.0
            }
        }
    };
}

name_type!(
    /// Name under which a workspace is opened; unique within a session.
    WorkspaceName,
    "workspace"
);
name_type!(
    /// Name of a stream (a configuration context) within a workspace.
    StreamName,
    "stream"
);
name_type!(
    /// Name of a processing tool within a stream's chain.
    ToolName,
    "tool"
);
name_type!(
    /// Name of a sample; unique among unfreed samples of a stream.
    SampleName,
    "sample"
);

/// GPU utilization mode requested at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuMode {
    /// CPU-only operation; the device selector is ignored.
    NoGpu,
    /// Each tool is dispatched to a single device (maximizes throughput).
    #[default]
    SingleDevicePerTool,
    /// A tool may fan out over several devices (minimizes latency).
    MultipleDevicesPerTool,
}

/// Which compute devices the runtime may use.
///
/// Recognized forms mirror the runtime's device-list argument: empty
/// (library default), a single ordinal, or a comma-separated ordinal list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceSelector {
    ids: Vec<String>,
}

impl DeviceSelector {
    /// Let the runtime choose devices on its own.
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn single(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
        }
    }

    pub fn list<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_auto(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The comma-separated form passed down to the runtime.
    pub fn as_arg(&self) -> String {
        self.ids.join(",")
    }
}

impl FromStr for DeviceSelector {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::auto());
        }
        let mut ids = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(VisionError::InvalidIdentifier(format!(
                    "device selector '{s}' contains an empty entry"
                )));
            }
            ids.push(part.to_string());
        }
        Ok(Self { ids })
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_arg())
    }
}

impl TryFrom<String> for DeviceSelector {
    type Error = VisionError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DeviceSelector> for String {
    fn from(sel: DeviceSelector) -> String {
        sel.as_arg()
    }
}

/// Destination for the runtime's own debug messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugSink {
    #[default]
    Console,
    File(PathBuf),
}

/// Encoded image container formats the runtime accepts from memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Png,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// Detect the container format from magic bytes.
    pub fn from_magic(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Some(ImageFormat::Png);
        }
        if data.starts_with(b"BM") {
            return Some(ImageFormat::Bmp);
        }
        // TIFF magic: II*\0 (little endian) or MM\0* (big endian)
        if data.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || data.starts_with(&[0x4D, 0x4D, 0x00, 0x2A])
        {
            return Some(ImageFormat::Tiff);
        }
        None
    }
}

/// Per-channel bit depth of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelDepth {
    U8,
    U16,
}

impl PixelDepth {
    pub fn bytes_per_channel(self) -> usize {
        match self {
            PixelDepth::U8 => 1,
            PixelDepth::U16 => 2,
        }
    }
}

/// Geometry of an in-memory image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub depth: PixelDepth,
    /// Row stride in bytes. Must be >= width * channels * bytes-per-channel.
    pub step: usize,
}

impl ImageDesc {
    /// Descriptor for tightly packed pixel rows.
    pub fn packed(width: u32, height: u32, channels: u32, depth: PixelDepth) -> Self {
        let step = width as usize * channels as usize * depth.bytes_per_channel();
        Self {
            width,
            height,
            channels,
            depth,
            step,
        }
    }

    /// Minimum legal row stride for this geometry.
    pub fn min_step(&self) -> usize {
        self.width as usize * self.channels as usize * self.depth.bytes_per_channel()
    }

    /// Total bytes a pixel buffer with this descriptor must hold.
    pub fn data_len(&self) -> usize {
        self.step * self.height as usize
    }

    /// Check the stride invariant and that `data_len` bytes of pixel data
    /// are enough to back this descriptor.
    pub fn validate(&self, data_len: usize) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(VisionError::InvalidImage(format!(
                "zero-sized image: {}x{}",
                self.width, self.height
            )));
        }
        if !(1..=4).contains(&self.channels) {
            return Err(VisionError::InvalidImage(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if self.step < self.min_step() {
            return Err(VisionError::InvalidImage(format!(
                "row stride {} below minimum {} for {}x{}x{}",
                self.step,
                self.min_step(),
                self.width,
                self.height,
                self.channels
            )));
        }
        if data_len < self.data_len() {
            return Err(VisionError::InvalidImage(format!(
                "pixel buffer holds {data_len} bytes, descriptor needs {}",
                self.data_len()
            )));
        }
        Ok(())
    }
}

/// A compute device reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeDevice {
    /// Device ordinal, as used in a `DeviceSelector`.
    pub index: u32,
    /// Human-readable device identifier.
    pub name: String,
}

/// Kind of a trainable tool in a stream's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Anomaly detection / supervised defect analysis.
    Red,
    /// Feature localization.
    Blue,
    /// Classification.
    Green,
}

impl ToolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Red => "red",
            ToolKind::Blue => "blue",
            ToolKind::Green => "green",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_reject_empty_and_control() {
        assert!(WorkspaceName::new("").is_err());
        assert!(ToolName::new("anal\tyze").is_err());
        assert!(SampleName::new(" padded ").is_err());
        assert!(StreamName::new("default").is_ok());
    }

    #[test]
    fn name_rejects_overlong() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(WorkspaceName::new(long).is_err());
    }

    #[test]
    fn device_selector_forms() {
        assert!(DeviceSelector::auto().is_auto());
        assert_eq!("".parse::<DeviceSelector>().unwrap(), DeviceSelector::auto());
        assert_eq!("0".parse::<DeviceSelector>().unwrap().as_arg(), "0");
        assert_eq!(
            "0, 1,2".parse::<DeviceSelector>().unwrap().as_arg(),
            "0,1,2"
        );
        assert!("0,,1".parse::<DeviceSelector>().is_err());
    }

    #[test]
    fn image_format_magic() {
        assert_eq!(
            ImageFormat::from_magic(&[0x89, b'P', b'N', b'G', 0x0D]),
            Some(ImageFormat::Png)
        );
        assert_eq!(ImageFormat::from_magic(b"BM6"), Some(ImageFormat::Bmp));
        assert_eq!(
            ImageFormat::from_magic(&[0x49, 0x49, 0x2A, 0x00]),
            Some(ImageFormat::Tiff)
        );
        assert_eq!(ImageFormat::from_magic(b"GIF89a"), None);
    }

    #[test]
    fn image_desc_stride_invariant() {
        let desc = ImageDesc::packed(255, 255, 1, PixelDepth::U8);
        assert_eq!(desc.step, 255);
        assert!(desc.validate(255 * 255).is_ok());

        let bad = ImageDesc {
            step: 100,
            ..desc
        };
        assert!(bad.validate(255 * 255).is_err());

        // Padded rows are legal as long as the buffer covers them.
        let padded = ImageDesc {
            step: 256,
            ..desc
        };
        assert!(padded.validate(256 * 255).is_ok());
        assert!(padded.validate(255 * 255).is_err());
    }
}
