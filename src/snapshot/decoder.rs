use crate::error::{Result, StoreError};
use crate::types::PropertyValue;

use super::encoder::{
    SNAPSHOT_MAGIC, TAG_BOOL, TAG_BYTES, TAG_FLOAT, TAG_INT, TAG_STRING,
};

/// Cursor over a verified snapshot body.
///
/// [`SnapshotDecoder::new`] checks the magic and the crc32 trailer up
/// front, so every later read failure means a logic-level mismatch, not
/// bit rot.
pub(crate) struct SnapshotDecoder<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> SnapshotDecoder<'a> {
    pub(crate) fn new(file: &'a [u8]) -> Result<Self> {
        let min_len = SNAPSHOT_MAGIC.len() + 4;
        if file.len() < min_len {
            return Err(StoreError::Corruption("snapshot file truncated".into()));
        }
        let (magic, rest) = file.split_at(SNAPSHOT_MAGIC.len());
        if magic != SNAPSHOT_MAGIC {
            return Err(StoreError::Corruption("snapshot magic mismatch".into()));
        }
        let (body, trailer) = rest.split_at(rest.len() - 4);
        let stored = u32::from_le_bytes(trailer.try_into().expect("four byte trailer"));
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return Err(StoreError::Corruption("snapshot checksum mismatch".into()));
        }
        Ok(Self { body, pos: 0 })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.body.len())
            .ok_or_else(|| StoreError::Corruption("snapshot body truncated".into()))?;
        let slice = &self.body[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("four bytes")))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("eight bytes")))
    }

    pub(crate) fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StoreError::Corruption("snapshot string is not utf-8".into()))
    }

    pub(crate) fn read_value(&mut self) -> Result<PropertyValue> {
        let tag = self.read_u8()?;
        match tag {
            TAG_BOOL => Ok(PropertyValue::Bool(self.read_u8()? != 0)),
            TAG_INT => {
                let raw = self.take(8)?;
                Ok(PropertyValue::Int(i64::from_le_bytes(
                    raw.try_into().expect("eight bytes"),
                )))
            }
            TAG_FLOAT => {
                let raw = self.take(8)?;
                Ok(PropertyValue::Float(f64::from_le_bytes(
                    raw.try_into().expect("eight bytes"),
                )))
            }
            TAG_STRING => Ok(PropertyValue::String(self.read_string()?)),
            TAG_BYTES => {
                let len = self.read_u32()? as usize;
                Ok(PropertyValue::Bytes(self.take(len)?.to_vec()))
            }
            other => Err(StoreError::Corruption(format!(
                "unknown property value tag 0x{other:02x}"
            ))),
        }
    }

    /// Consumes the expected section tag or fails.
    pub(crate) fn expect_section(&mut self, expected: u8) -> Result<()> {
        let got = self.read_u8()?;
        if got != expected {
            return Err(StoreError::Corruption(format!(
                "expected section 0x{expected:02x}, found 0x{got:02x}"
            )));
        }
        Ok(())
    }

    /// Reads one name dictionary as `(id, name)` pairs.
    pub(crate) fn read_dict(&mut self) -> Result<Vec<(u32, String)>> {
        let count = self.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.read_u32()?;
            let name = self.read_string()?;
            entries.push((id, name));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::encoder::{SnapshotEncoder, SECTION_END, SECTION_NAMES};
    use super::*;

    #[test]
    fn round_trips_primitives_and_values() {
        let mut enc = SnapshotEncoder::new();
        enc.write_u64(42);
        enc.write_value(&PropertyValue::String("mira".into())).unwrap();
        enc.write_value(&PropertyValue::Float(2.5)).unwrap();
        let file = enc.finish();

        let mut dec = SnapshotDecoder::new(&file).unwrap();
        assert_eq!(dec.read_u64().unwrap(), 42);
        assert_eq!(
            dec.read_value().unwrap(),
            PropertyValue::String("mira".into())
        );
        assert_eq!(dec.read_value().unwrap(), PropertyValue::Float(2.5));
        dec.expect_section(SECTION_END).unwrap();
    }

    #[test]
    fn rejects_bad_magic() {
        let file = b"NOTASNAP\x00\x00\x00\x00".to_vec();
        assert!(matches!(
            SnapshotDecoder::new(&file),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn rejects_flipped_bit() {
        let mut enc = SnapshotEncoder::new();
        enc.write_u8(SECTION_NAMES);
        enc.write_u32(7);
        let mut file = enc.finish();
        let mid = SNAPSHOT_MAGIC.len() + 1;
        file[mid] ^= 0x40;
        assert!(matches!(
            SnapshotDecoder::new(&file),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn rejects_truncated_body() {
        let mut enc = SnapshotEncoder::new();
        enc.write_string("orphan").unwrap();
        let file = enc.finish();
        let mut dec = SnapshotDecoder::new(&file).unwrap();
        assert_eq!(dec.read_string().unwrap(), "orphan");
        dec.read_u8().unwrap(); // section end
        assert!(dec.read_u64().is_err());
    }
}
