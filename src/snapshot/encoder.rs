use crate::error::{Result, StoreError};
use crate::types::PropertyValue;

/// File magic prefixed to every snapshot.
pub(crate) const SNAPSHOT_MAGIC: &[u8; 8] = b"TENEBRA1";

pub(crate) const SECTION_NAMES: u8 = 0x01;
pub(crate) const SECTION_VERTICES: u8 = 0x02;
pub(crate) const SECTION_EDGES: u8 = 0x03;
pub(crate) const SECTION_INDEXES: u8 = 0x04;
pub(crate) const SECTION_END: u8 = 0xFF;

pub(crate) const TAG_BOOL: u8 = 0x01;
pub(crate) const TAG_INT: u8 = 0x02;
pub(crate) const TAG_FLOAT: u8 = 0x03;
pub(crate) const TAG_STRING: u8 = 0x04;
pub(crate) const TAG_BYTES: u8 = 0x05;

/// Builds the body of a snapshot file section by section.
///
/// Sections must be written in the fixed order: names, vertices, edges,
/// indexes, end. The caller frames the finished body with the magic and
/// a crc32 trailer.
pub(crate) struct SnapshotEncoder {
    buf: Vec<u8>,
}

impl SnapshotEncoder {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn write_string(&mut self, value: &str) -> Result<()> {
        let bytes = value.as_bytes();
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| StoreError::InvalidArgument("string too long to serialize".into()))?;
        self.write_u32(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_value(&mut self, value: &PropertyValue) -> Result<()> {
        match value {
            PropertyValue::Bool(b) => {
                self.write_u8(TAG_BOOL);
                self.write_u8(u8::from(*b));
            }
            PropertyValue::Int(i) => {
                self.write_u8(TAG_INT);
                self.buf.extend_from_slice(&i.to_le_bytes());
            }
            PropertyValue::Float(f) => {
                self.write_u8(TAG_FLOAT);
                self.buf.extend_from_slice(&f.to_le_bytes());
            }
            PropertyValue::String(s) => {
                self.write_u8(TAG_STRING);
                self.write_string(s)?;
            }
            PropertyValue::Bytes(b) => {
                self.write_u8(TAG_BYTES);
                let len: u32 = b.len().try_into().map_err(|_| {
                    StoreError::InvalidArgument("byte blob too long to serialize".into())
                })?;
                self.write_u32(len);
                self.buf.extend_from_slice(b);
            }
        }
        Ok(())
    }

    /// Writes the name-dictionary section: property names, label names,
    /// and edge-type names, each as `(id, name)` pairs in id order.
    pub(crate) fn names(
        &mut self,
        properties: &[(u32, String)],
        labels: &[(u32, String)],
        edge_types: &[(u32, String)],
    ) -> Result<()> {
        self.write_u8(SECTION_NAMES);
        for dict in [properties, labels, edge_types] {
            self.write_u32(dict.len() as u32);
            for (id, name) in dict {
                self.write_u32(*id);
                self.write_string(name)?;
            }
        }
        Ok(())
    }

    pub(crate) fn start_vertices(&mut self, count: u64) {
        self.write_u8(SECTION_VERTICES);
        self.write_u64(count);
    }

    pub(crate) fn start_edges(&mut self, count: u64) {
        self.write_u8(SECTION_EDGES);
        self.write_u64(count);
    }

    pub(crate) fn start_indexes(&mut self, count: u32) {
        self.write_u8(SECTION_INDEXES);
        self.write_u32(count);
    }

    /// Terminates the body and returns the framed file contents:
    /// magic, body, crc32 of the body.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.write_u8(SECTION_END);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.buf);
        let crc = hasher.finalize();
        let mut out = Vec::with_capacity(SNAPSHOT_MAGIC.len() + self.buf.len() + 4);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&self.buf);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }
}
