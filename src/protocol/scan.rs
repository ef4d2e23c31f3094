//! Structural MessagePack walk over already-marshalled messages.
//!
//! The scanner extracts the chunk id from a serialised message without
//! decoding the record payload; it runs on every ACK-matching path.
//! The cursor borrows the input slice and allocates only the returned
//! chunk string, so repeated scans cost no per-call heap traffic.

use rmp::Marker;

use crate::{Error, Result};

const CHUNK_KEY: &[u8] = b"chunk";

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(Error::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn peek_marker(&self) -> Result<Marker> {
        if self.pos >= self.buf.len() {
            return Err(Error::Incomplete);
        }
        Ok(Marker::from_u8(self.buf[self.pos]))
    }

    fn read_marker(&mut self) -> Result<Marker> {
        Ok(Marker::from_u8(self.read_u8()?))
    }

    fn read_array_len(&mut self) -> Result<u32> {
        match self.read_marker()? {
            Marker::FixArray(n) => Ok(u32::from(n)),
            Marker::Array16 => Ok(u32::from(self.read_u16()?)),
            Marker::Array32 => self.read_u32(),
            other => Err(Error::Codec(format!("expected array, got marker {other:?}"))),
        }
    }

    fn read_map_len(&mut self) -> Result<u32> {
        match self.read_marker()? {
            Marker::FixMap(n) => Ok(u32::from(n)),
            Marker::Map16 => Ok(u32::from(self.read_u16()?)),
            Marker::Map32 => self.read_u32(),
            other => Err(Error::Codec(format!("expected map, got marker {other:?}"))),
        }
    }

    fn read_str_bytes(&mut self) -> Result<&'a [u8]> {
        let len = match self.read_marker()? {
            Marker::FixStr(n) => usize::from(n),
            Marker::Str8 => usize::from(self.read_u8()?),
            Marker::Str16 => usize::from(self.read_u16()?),
            Marker::Str32 => self.read_u32()? as usize,
            other => {
                return Err(Error::Codec(format!(
                    "expected string, got marker {other:?}"
                )))
            }
        };
        self.take(len)
    }

    /// Skips exactly one value, recursing through containers.
    fn skip_value(&mut self) -> Result<()> {
        let extra = match self.read_marker()? {
            Marker::Null
            | Marker::True
            | Marker::False
            | Marker::FixPos(_)
            | Marker::FixNeg(_) => 0,
            Marker::U8 | Marker::I8 => 1,
            Marker::U16 | Marker::I16 => 2,
            Marker::U32 | Marker::I32 | Marker::F32 => 4,
            Marker::U64 | Marker::I64 | Marker::F64 => 8,
            Marker::FixStr(n) => usize::from(n),
            Marker::Str8 | Marker::Bin8 => usize::from(self.read_u8()?),
            Marker::Str16 | Marker::Bin16 => usize::from(self.read_u16()?),
            Marker::Str32 | Marker::Bin32 => self.read_u32()? as usize,
            Marker::FixExt1 => 2,
            Marker::FixExt2 => 3,
            Marker::FixExt4 => 5,
            Marker::FixExt8 => 9,
            Marker::FixExt16 => 17,
            Marker::Ext8 => usize::from(self.read_u8()?) + 1,
            Marker::Ext16 => usize::from(self.read_u16()?) + 1,
            Marker::Ext32 => self.read_u32()? as usize + 1,
            Marker::FixArray(n) => {
                for _ in 0..n {
                    self.skip_value()?;
                }
                0
            }
            Marker::Array16 => {
                let n = self.read_u16()?;
                for _ in 0..n {
                    self.skip_value()?;
                }
                0
            }
            Marker::Array32 => {
                let n = self.read_u32()?;
                for _ in 0..n {
                    self.skip_value()?;
                }
                0
            }
            Marker::FixMap(n) => {
                for _ in 0..u32::from(n) * 2 {
                    self.skip_value()?;
                }
                0
            }
            Marker::Map16 => {
                let n = self.read_u16()?;
                for _ in 0..u32::from(n) * 2 {
                    self.skip_value()?;
                }
                0
            }
            Marker::Map32 => {
                let n = self.read_u32()?;
                for _ in 0..n.saturating_mul(2) {
                    self.skip_value()?;
                }
                0
            }
            Marker::Reserved => return Err(Error::Codec("reserved marker".into())),
        };
        self.take(extra)?;
        Ok(())
    }
}

fn is_int(marker: Marker) -> bool {
    matches!(
        marker,
        Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64
    )
}

fn is_ext(marker: Marker) -> bool {
    matches!(
        marker,
        Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32
    )
}

/// Extracts the chunk id from the marshalled bytes of any message
/// variant.
///
/// Classification follows the outer array shape: a timestamp (integer
/// or extension) after the tag marks the single-event variants, which
/// carry their options in the fourth slot; everything else is a
/// forward/packed variant with options in the third slot. The short
/// arity in either family means no options were encoded.
pub fn chunk_from_bytes(buf: &[u8]) -> Result<String> {
    let mut cur = Cursor::new(buf);
    let sz = cur.read_array_len()?;
    // Tag.
    cur.skip_value()?;

    let next = cur.peek_marker()?;
    if is_ext(next) || is_int(next) {
        // Message / MessageExt: [tag, ts, record, options?]
        if sz == 3 {
            return Err(Error::ChunkNotFound);
        }
        cur.skip_value()?; // timestamp
        cur.skip_value()?; // record
    } else {
        // Forward / PackedForward: [tag, entries | stream, options?]
        if sz == 2 {
            return Err(Error::ChunkNotFound);
        }
        cur.skip_value()?;
    }

    if cur.peek_marker()? == Marker::Null {
        return Err(Error::ChunkNotFound);
    }
    let fields = cur.read_map_len()?;
    for _ in 0..fields {
        let key = cur.read_str_bytes()?;
        if key == CHUNK_KEY {
            let value = cur.read_str_bytes()?;
            return String::from_utf8(value.to_vec())
                .map_err(|_| Error::Codec("chunk value is not valid UTF-8".into()));
        }
        cur.skip_value()?;
    }
    Err(Error::ChunkNotFound)
}

/// Length of the first complete MessagePack value in `buf`, or `None`
/// if more bytes are needed.
pub fn value_len(buf: &[u8]) -> Result<Option<usize>> {
    let mut cur = Cursor::new(buf);
    match cur.skip_value() {
        Ok(()) => Ok(Some(cur.pos)),
        Err(Error::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{Message, MessageOptions, Sendable};
    use crate::protocol::record::Record;

    #[test]
    fn finds_chunk_in_single_event_message() {
        let mut msg = Message::new("t", 0, Record::new());
        let chunk = msg.chunk().expect("chunk");
        let bytes = msg.to_bytes().expect("marshal");
        assert_eq!(chunk_from_bytes(&bytes).expect("scan"), chunk);
    }

    #[test]
    fn reports_chunk_not_found_without_options() {
        let msg = Message::new("t", 0, Record::new());
        let bytes = msg.to_bytes().expect("marshal");
        let err = chunk_from_bytes(&bytes).expect_err("no chunk");
        assert!(err.to_string().contains("chunk not found"));
    }

    #[test]
    fn skips_unrelated_option_keys() {
        let mut msg = Message::new("t", 5, Record::new());
        msg.options = Some(MessageOptions {
            size: Some(12),
            chunk: Some("abc".into()),
            compressed: Some("gzip".into()),
        });
        let bytes = msg.to_bytes().expect("marshal");
        assert_eq!(chunk_from_bytes(&bytes).expect("scan"), "abc");
    }

    #[test]
    fn options_without_chunk_field() {
        let mut msg = Message::new("t", 5, Record::new());
        msg.options = Some(MessageOptions {
            size: Some(12),
            ..Default::default()
        });
        let bytes = msg.to_bytes().expect("marshal");
        assert!(matches!(
            chunk_from_bytes(&bytes),
            Err(Error::ChunkNotFound)
        ));
    }

    #[test]
    fn value_len_on_truncated_input() {
        let mut msg = Message::new("tag", 1, Record::new());
        msg.options = Some(MessageOptions {
            chunk: Some("abcd".into()),
            ..Default::default()
        });
        let bytes = msg.to_bytes().expect("marshal");
        assert_eq!(value_len(&bytes).expect("scan"), Some(bytes.len()));
        assert_eq!(value_len(&bytes[..bytes.len() - 1]).expect("scan"), None);
    }
}
