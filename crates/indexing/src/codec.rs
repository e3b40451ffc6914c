//! Resource payload encoding.
//!
//! Resource text is stored gzip-compressed. The current format is UTF-8
//! without a byte-order mark. Older payloads carry a UTF-8 byte-order mark;
//! they still decode, and are rewritten in the current format the next time
//! the resource is written. Reads never rewrite in place. Text that itself
//! begins with a byte-order mark is written behind one more, so reading
//! returns it unchanged.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::warn;

use crate::error::CodecError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Text encoding of a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// UTF-8 without a byte-order mark.
    #[default]
    Current,
    /// UTF-8 prefixed with a byte-order mark.
    Legacy,
}

/// Compresses and decompresses resource payloads.
#[derive(Debug, Clone, Copy)]
pub struct ResourceCodec {
    compression: Compression,
}

impl Default for ResourceCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCodec {
    /// Creates a codec with the default compression level.
    pub fn new() -> Self {
        Self {
            compression: Compression::default(),
        }
    }

    /// Sets the compression level (0-9).
    pub fn with_level(mut self, level: u32) -> Self {
        self.compression = Compression::new(level.min(9));
        self
    }

    /// Encodes text in the current format.
    pub fn write(&self, text: &str) -> Result<Vec<u8>, CodecError> {
        self.write_with_format(text, PayloadFormat::Current)
    }

    /// Encodes text in the given format.
    pub fn write_with_format(
        &self,
        text: &str,
        format: PayloadFormat,
    ) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        self.write_to(&mut out, text, format)?;
        Ok(out)
    }

    /// Encodes text into a writer.
    pub fn write_to<W: Write>(
        &self,
        writer: W,
        text: &str,
        format: PayloadFormat,
    ) -> Result<(), CodecError> {
        let mut encoder = GzEncoder::new(writer, self.compression);
        // Readers strip one leading mark, so text that starts with one needs another
        if format == PayloadFormat::Legacy || text.starts_with('\u{FEFF}') {
            encoder.write_all(UTF8_BOM).map_err(CodecError::Compress)?;
        }
        encoder
            .write_all(text.as_bytes())
            .map_err(CodecError::Compress)?;
        encoder.finish().map_err(CodecError::Compress)?;
        Ok(())
    }

    /// Decodes a payload written in either format.
    pub fn read(&self, bytes: &[u8]) -> Result<String, CodecError> {
        self.read_with_format(bytes).map(|(text, _)| text)
    }

    /// Decodes a payload and reports which format it was stored in.
    pub fn read_with_format(&self, bytes: &[u8]) -> Result<(String, PayloadFormat), CodecError> {
        self.read_from(bytes)
    }

    /// Decodes a payload from a reader.
    pub fn read_from<R: Read>(&self, reader: R) -> Result<(String, PayloadFormat), CodecError> {
        let mut raw = Vec::new();
        GzDecoder::new(reader)
            .read_to_end(&mut raw)
            .map_err(CodecError::Decompress)?;

        match String::from_utf8(raw) {
            Ok(text) if !text.starts_with('\u{FEFF}') => Ok((text, PayloadFormat::Current)),
            Ok(text) => {
                warn!("Decoded resource payload in legacy format");
                let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string();
                Ok((text, PayloadFormat::Legacy))
            }
            Err(e) => {
                let utf8_error = e.utf8_error();
                let raw = e.into_bytes();
                let Some(stripped) = raw.strip_prefix(UTF8_BOM) else {
                    return Err(CodecError::Encoding(utf8_error));
                };
                warn!("Decoded resource payload in legacy format");
                let text = std::str::from_utf8(stripped).map_err(CodecError::Encoding)?;
                Ok((text.to_string(), PayloadFormat::Legacy))
            }
        }
    }
}
