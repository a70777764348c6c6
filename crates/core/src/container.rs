//! Versioned container artifacts: a fixed header followed by a serialized code object.
//!
//! Layout, all integers `u32` little-endian:
//!
//! | version | fields after the 4-byte magic             |
//! |---------|-------------------------------------------|
//! | V1      | timestamp                                 |
//! | V2      | flags, timestamp                          |
//! | V3      | flags, timestamp, source size             |
//!
//! The magic is `MRK` followed by the version byte, so a reader knows which fields follow
//! before interpreting any of them.

use crate::code::CodeObject;
use crate::marshal::{dumps, loads};
use chrono::{DateTime, Utc};
use murk_utils::errors::{ContainerError, DecodeError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// First three bytes of every container.
pub const MAGIC_PREFIX: &[u8; 3] = b"MRK";

/// Container header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    V1,
    V2,
    #[default]
    V3,
}

impl FormatVersion {
    /// Version byte written after the magic prefix.
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Parses a version byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    /// Full four-byte magic for this version.
    pub const fn magic(self) -> [u8; 4] {
        [MAGIC_PREFIX[0], MAGIC_PREFIX[1], MAGIC_PREFIX[2], self.to_byte()]
    }

    /// Returns true if the header carries a flags word.
    pub const fn has_flags(self) -> bool {
        !matches!(self, Self::V1)
    }

    /// Returns true if the header carries the source size.
    pub const fn has_source_size(self) -> bool {
        matches!(self, Self::V3)
    }

    /// Header length in bytes, magic included.
    pub const fn header_len(self) -> usize {
        match self {
            Self::V1 => 8,
            Self::V2 => 12,
            Self::V3 => 16,
        }
    }
}

/// Fields written ahead of the serialized object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    /// Layout the header was written with.
    pub version: FormatVersion,
    /// Reserved; always zero when written by this crate.
    pub flags: u32,
    /// Seconds since the Unix epoch, truncated to 32 bits.
    pub timestamp: u32,
    /// Byte length of the originating source; present from V3 on.
    pub source_size: Option<u32>,
}

impl ContainerHeader {
    /// Header stamped with the current time.
    pub fn new(version: FormatVersion, source_size: usize) -> Self {
        Self::with_timestamp(version, Utc::now().timestamp() as u32, source_size)
    }

    /// Header with an explicit timestamp.
    pub fn with_timestamp(version: FormatVersion, timestamp: u32, source_size: usize) -> Self {
        Self {
            version,
            flags: 0,
            timestamp,
            source_size: version.has_source_size().then_some(source_size as u32),
        }
    }

    /// Timestamp as a UTC date, if representable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }

    /// Encodes the fields the version declares.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.version.header_len());
        out.extend_from_slice(&self.version.magic());
        if self.version.has_flags() {
            out.extend_from_slice(&self.flags.to_le_bytes());
        }
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        if self.version.has_source_size() {
            out.extend_from_slice(&self.source_size.unwrap_or(0).to_le_bytes());
        }
        out
    }

    /// Parses a header from the start of `bytes`, returning it with its length.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let magic: [u8; 4] = bytes
            .get(..4)
            .and_then(|m| m.try_into().ok())
            .ok_or(DecodeError::UnexpectedEof(bytes.len()))?;
        let version = match (&magic[..3] == MAGIC_PREFIX, FormatVersion::from_byte(magic[3])) {
            (true, Some(version)) => version,
            _ => return Err(DecodeError::BadMagic(magic)),
        };

        let len = version.header_len();
        if bytes.len() < len {
            return Err(DecodeError::UnexpectedEof(bytes.len()));
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let header = match version {
            FormatVersion::V1 => Self {
                version,
                flags: 0,
                timestamp: word(4),
                source_size: None,
            },
            FormatVersion::V2 => Self {
                version,
                flags: word(4),
                timestamp: word(8),
                source_size: None,
            },
            FormatVersion::V3 => Self {
                version,
                flags: word(4),
                timestamp: word(8),
                source_size: Some(word(12)),
            },
        };
        Ok((header, len))
    }
}

/// Writes the header and then the serialized object.
pub fn write_container<W: Write>(
    writer: &mut W,
    code: &CodeObject,
    header: &ContainerHeader,
) -> Result<(), ContainerError> {
    writer.write_all(&header.to_bytes())?;
    writer.write_all(&dumps(code))?;
    writer.flush()?;
    Ok(())
}

/// Convenience wrapper producing the artifact in memory.
pub fn container_bytes(code: &CodeObject, header: &ContainerHeader) -> Vec<u8> {
    let mut out = header.to_bytes();
    out.extend_from_slice(&dumps(code));
    out
}

/// Parses the header, then the serialized object after it.
pub fn read_container(bytes: &[u8]) -> Result<(ContainerHeader, CodeObject), ContainerError> {
    let (header, len) = ContainerHeader::parse(bytes)?;
    let code = loads(&bytes[len..])?;
    Ok((header, code))
}

/// Returns true if `bytes` start with a recognized container magic.
pub fn is_container(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && &bytes[..3] == MAGIC_PREFIX
        && FormatVersion::from_byte(bytes[3]).is_some()
}

/// Replaces `path` with `bytes` through a temporary file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ContainerError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| ContainerError::Persist {
        path: path.display().to_string(),
        source: err.error,
    })?;
    tracing::debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::parser::parse;

    fn sample() -> CodeObject {
        compile(&parse("x = 1\nprint(x + 1)\n").unwrap(), "c.mk").unwrap()
    }

    #[test]
    fn header_fields_follow_version() {
        let v1 = ContainerHeader::with_timestamp(FormatVersion::V1, 7, 99);
        let v2 = ContainerHeader::with_timestamp(FormatVersion::V2, 7, 99);
        let v3 = ContainerHeader::with_timestamp(FormatVersion::V3, 7, 99);
        assert_eq!(v1.to_bytes(), [b'M', b'R', b'K', 1, 7, 0, 0, 0]);
        assert_eq!(v2.to_bytes().len(), 12);
        assert_eq!(&v3.to_bytes()[12..], &99u32.to_le_bytes());
        assert_eq!(v1.source_size, None);
    }

    #[test]
    fn header_precedes_payload() {
        let code = sample();
        let header = ContainerHeader::with_timestamp(FormatVersion::V3, 1, 10);
        let mut out = Vec::new();
        write_container(&mut out, &code, &header).unwrap();
        assert_eq!(&out[..16], header.to_bytes().as_slice());
        assert_eq!(&out[16..], dumps(&code).as_slice());
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let mut bytes = container_bytes(&sample(), &ContainerHeader::new(FormatVersion::V2, 0));
        bytes[3] = 9;
        assert!(matches!(
            read_container(&bytes),
            Err(ContainerError::Decode(DecodeError::BadMagic(_)))
        ));
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mrk");
        std::fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new contents").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new contents");
    }
}
