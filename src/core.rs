//! Frame data types shared by the engine and the processing pipeline.
//!
//! # Data Flow
//!
//! ```text
//! HardwareCore --[RawImage]--> hardware-control worker --[FrameMessage]-->
//!     processor 1 --> ... --> processor N --> saving worker --> DataSink
//! ```
//!
//! Every queue in the chain carries [`FrameMessage`]. The
//! [`FrameMessage::EndOfAcquisition`] sentinel is pushed exactly once, when
//! the acquisition-finished event executes, and each stage forwards it before
//! stopping so shutdown propagates down the chain.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Memory-efficient pixel buffer supporting multiple bit depths.
///
/// `PixelBuffer` stores image data in its native format to avoid unnecessary
/// type conversions. Camera sensors typically output 8-bit or 16-bit
/// unsigned integers.
///
/// # Variants
///
/// * `U8` - 8-bit unsigned integer pixels (0-255)
/// * `U16` - 16-bit unsigned integer pixels (0-65535)
/// * `F64` - 64-bit floating point pixels (for computed images)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    /// 8-bit unsigned integer pixels (1 byte/pixel)
    U8(Vec<u8>),
    /// 16-bit unsigned integer pixels (2 bytes/pixel)
    U16(Vec<u16>),
    /// 64-bit floating point pixels (8 bytes/pixel)
    F64(Vec<f64>),
}

impl PixelBuffer {
    /// Returns the number of pixels in the buffer.
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len(),
            PixelBuffer::F64(data) => data.len(),
        }
    }

    /// Returns true if the buffer contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the memory size in bytes.
    pub fn memory_bytes(&self) -> usize {
        match self {
            PixelBuffer::U8(data) => data.len(),
            PixelBuffer::U16(data) => data.len() * 2,
            PixelBuffer::F64(data) => data.len() * 8,
        }
    }

    /// Pixel type name written into image metadata.
    pub fn pixel_type(&self) -> &'static str {
        match self {
            PixelBuffer::U8(_) => "GRAY8",
            PixelBuffer::U16(_) => "GRAY16",
            PixelBuffer::F64(_) => "GRAYF64",
        }
    }
}

/// One captured frame: pixels plus its metadata tags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedImage {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixel data in native format (row-major order)
    pub pixels: PixelBuffer,
    /// Metadata stamped by the engine and any processors
    pub tags: Map<String, Value>,
}

impl TaggedImage {
    /// Image with no tags yet.
    pub fn new(width: u32, height: u32, pixels: PixelBuffer) -> Self {
        Self {
            width,
            height,
            pixels,
            tags: Map::new(),
        }
    }

    /// Look up a single metadata tag.
    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.get(key)
    }
}

/// Item carried by every image queue in the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameMessage {
    /// A frame on its way to the sink
    Frame(Box<TaggedImage>),
    /// No more frames will follow
    EndOfAcquisition,
}

impl FrameMessage {
    /// Boxes `image` as a frame message.
    pub fn frame(image: TaggedImage) -> Self {
        FrameMessage::Frame(Box::new(image))
    }

    /// True for the end-of-acquisition marker.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, FrameMessage::EndOfAcquisition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_sizes() {
        let buffer = PixelBuffer::U16(vec![0; 16]);
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.memory_bytes(), 32);
        assert_eq!(buffer.pixel_type(), "GRAY16");
        assert!(PixelBuffer::U8(Vec::new()).is_empty());
    }

    #[test]
    fn test_sentinel_detection() {
        let frame = FrameMessage::frame(TaggedImage::new(2, 2, PixelBuffer::U8(vec![0; 4])));
        assert!(!frame.is_sentinel());
        assert!(FrameMessage::EndOfAcquisition.is_sentinel());
    }
}
