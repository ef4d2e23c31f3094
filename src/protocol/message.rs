//! The Forward message family.
//!
//! Five wire shapes share one capability surface: marshal into a byte
//! buffer (or encode onto a writer) and produce a stable chunk id for
//! acknowledgement matching. Variants are distinguished on the wire by
//! the outer array's element types, never by a tag byte. The outer
//! array takes the short length when no options are present; a literal
//! nil in the options slot is tolerated on decode and clears them.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rmpv::Value;
use uuid::Uuid;

use crate::protocol::record::{
    pack_entries, read_entries, read_record, record_size_hint, write_entries, write_record,
    EntryExt, Record,
};
use crate::protocol::scan;
use crate::protocol::time::EventTime;
use crate::{Error, Result};

pub const OPT_SIZE: &str = "size";
pub const OPT_CHUNK: &str = "chunk";
pub const OPT_COMPRESSED: &str = "compressed";
pub const COMPRESSION_GZIP: &str = "gzip";

/// Capability surface shared by every message variant.
pub trait Sendable: Send {
    /// Appends the MessagePack encoding to `buf`.
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Upper-bound byte estimate used to pre-size buffers.
    fn size_hint(&self) -> usize;

    /// Chunk id for acknowledgement matching, memoised in the options
    /// on first call.
    fn chunk(&mut self) -> Result<String>;

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size_hint());
        self.marshal(&mut buf)?;
        Ok(buf)
    }
}

/// The option map embedded in a message's trailing slot.
///
/// Fields equal to their zero value are omitted from the wire; the map
/// header counts only the populated fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOptions {
    /// Number of entries packed into the event stream.
    pub size: Option<usize>,
    /// Base64-encoded 16-byte UUID; its presence requests an ACK.
    pub chunk: Option<String>,
    /// `"gzip"` when the event stream is compressed.
    pub compressed: Option<String>,
}

impl MessageOptions {
    fn field_count(&self) -> u32 {
        u32::from(self.size.is_some())
            + u32::from(self.chunk.is_some())
            + u32::from(self.compressed.is_some())
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        rmp::encode::write_map_len(wr, self.field_count())?;
        if let Some(size) = self.size {
            rmp::encode::write_str(wr, OPT_SIZE)?;
            rmp::encode::write_uint(wr, size as u64)?;
        }
        if let Some(chunk) = &self.chunk {
            rmp::encode::write_str(wr, OPT_CHUNK)?;
            rmp::encode::write_str(wr, chunk)?;
        }
        if let Some(compressed) = &self.compressed {
            rmp::encode::write_str(wr, OPT_COMPRESSED)?;
            rmp::encode::write_str(wr, compressed)?;
        }
        Ok(())
    }

    /// Builds options from the decoded trailing slot. Nil clears the
    /// options; unknown keys are skipped.
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let pairs = match value {
            Value::Nil => return Ok(None),
            Value::Map(pairs) => pairs,
            other => {
                return Err(Error::Codec(format!(
                    "expected a map in the options slot, got {other}"
                )))
            }
        };
        let mut options = MessageOptions::default();
        for (key, value) in pairs {
            let key = match key.as_str() {
                Some(key) => key,
                None => continue,
            };
            match key {
                OPT_SIZE => {
                    options.size = Some(value.as_u64().ok_or_else(|| {
                        Error::Codec("size option is not an unsigned integer".into())
                    })? as usize);
                }
                OPT_CHUNK => {
                    options.chunk = Some(
                        value
                            .as_str()
                            .ok_or_else(|| Error::Codec("chunk option is not a string".into()))?
                            .to_owned(),
                    );
                }
                OPT_COMPRESSED => {
                    options.compressed = Some(
                        value
                            .as_str()
                            .ok_or_else(|| {
                                Error::Codec("compressed option is not a string".into())
                            })?
                            .to_owned(),
                    );
                }
                _ => {}
            }
        }
        Ok(Some(options))
    }

    pub fn size_hint(&self) -> usize {
        let mut size = 1;
        if self.size.is_some() {
            size += 5 + OPT_SIZE.len() + 9;
        }
        if let Some(chunk) = &self.chunk {
            size += 5 + OPT_CHUNK.len() + 5 + chunk.len();
        }
        if let Some(compressed) = &self.compressed {
            size += 5 + OPT_COMPRESSED.len() + 5 + compressed.len();
        }
        size
    }
}

fn read_string<R: Read>(rd: &mut R) -> Result<String> {
    let len = rmp::decode::read_str_len(rd)?;
    let mut bytes = vec![0u8; len as usize];
    rd.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| Error::Codec("string is not valid UTF-8".into()))
}

fn read_options_slot<R: Read>(rd: &mut R) -> Result<Option<MessageOptions>> {
    MessageOptions::from_value(rmpv::decode::read_value(rd)?)
}

fn new_chunk_id() -> String {
    BASE64.encode(Uuid::new_v4().as_bytes())
}

/// Memoises a chunk id in the options, creating them if absent.
fn ensure_chunk(options: &mut Option<MessageOptions>) -> Result<String> {
    let options = options.get_or_insert_with(MessageOptions::default);
    if let Some(chunk) = &options.chunk {
        return Ok(chunk.clone());
    }
    let chunk = new_chunk_id();
    options.chunk = Some(chunk.clone());
    Ok(chunk)
}

/// Single event with second-precision timestamp:
/// `[tag, ts:int64, record, options?]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub tag: String,
    pub timestamp: i64,
    pub record: Record,
    pub options: Option<MessageOptions>,
}

impl Message {
    pub fn new(tag: impl Into<String>, timestamp: i64, record: Record) -> Self {
        Self {
            tag: tag.into(),
            timestamp,
            record,
            options: None,
        }
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        let len = if self.options.is_some() { 4 } else { 3 };
        rmp::encode::write_array_len(wr, len)?;
        rmp::encode::write_str(wr, &self.tag)?;
        rmp::encode::write_sint(wr, self.timestamp)?;
        write_record(wr, &self.record)?;
        if let Some(options) = &self.options {
            options.encode(wr)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let len = rmp::decode::read_array_len(rd)?;
        if len != 3 && len != 4 {
            return Err(Error::Codec(format!("message array has length {len}")));
        }
        let tag = read_string(rd)?;
        let timestamp = rmp::decode::read_int(rd)?;
        let record = read_record(rd)?;
        let options = if len == 4 { read_options_slot(rd)? } else { None };
        Ok(Self {
            tag,
            timestamp,
            record,
            options,
        })
    }

    pub fn unmarshal(buf: &[u8]) -> Result<(Self, &[u8])> {
        let mut rd = buf;
        let msg = Self::decode(&mut rd)?;
        Ok((msg, rd))
    }
}

impl Sendable for Message {
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.encode(buf)
    }

    fn size_hint(&self) -> usize {
        1 + 5
            + self.tag.len()
            + 9
            + record_size_hint(&self.record)
            + self.options.as_ref().map_or(0, MessageOptions::size_hint)
    }

    fn chunk(&mut self) -> Result<String> {
        ensure_chunk(&mut self.options)
    }
}

/// Single event with sub-second timestamp:
/// `[tag, ts:EventTime, record, options?]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageExt {
    pub tag: String,
    pub timestamp: EventTime,
    pub record: Record,
    pub options: Option<MessageOptions>,
}

impl MessageExt {
    pub fn new(tag: impl Into<String>, timestamp: EventTime, record: Record) -> Self {
        Self {
            tag: tag.into(),
            timestamp,
            record,
            options: None,
        }
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        let len = if self.options.is_some() { 4 } else { 3 };
        rmp::encode::write_array_len(wr, len)?;
        rmp::encode::write_str(wr, &self.tag)?;
        self.timestamp.encode(wr)?;
        write_record(wr, &self.record)?;
        if let Some(options) = &self.options {
            options.encode(wr)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let len = rmp::decode::read_array_len(rd)?;
        if len != 3 && len != 4 {
            return Err(Error::Codec(format!("message array has length {len}")));
        }
        let tag = read_string(rd)?;
        let timestamp = EventTime::decode(rd)?;
        let record = read_record(rd)?;
        let options = if len == 4 { read_options_slot(rd)? } else { None };
        Ok(Self {
            tag,
            timestamp,
            record,
            options,
        })
    }

    pub fn unmarshal(buf: &[u8]) -> Result<(Self, &[u8])> {
        let mut rd = buf;
        let msg = Self::decode(&mut rd)?;
        Ok((msg, rd))
    }
}

impl Sendable for MessageExt {
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.encode(buf)
    }

    fn size_hint(&self) -> usize {
        1 + 5
            + self.tag.len()
            + self.timestamp.size_hint()
            + record_size_hint(&self.record)
            + self.options.as_ref().map_or(0, MessageOptions::size_hint)
    }

    fn chunk(&mut self) -> Result<String> {
        ensure_chunk(&mut self.options)
    }
}

/// N events as a MessagePack array: `[tag, entries, options?]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardMessage {
    pub tag: String,
    pub entries: Vec<EntryExt>,
    pub options: Option<MessageOptions>,
}

impl ForwardMessage {
    pub fn new(tag: impl Into<String>, entries: Vec<EntryExt>) -> Self {
        Self {
            tag: tag.into(),
            entries,
            options: None,
        }
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        let len = if self.options.is_some() { 3 } else { 2 };
        rmp::encode::write_array_len(wr, len)?;
        rmp::encode::write_str(wr, &self.tag)?;
        write_entries(wr, &self.entries)?;
        if let Some(options) = &self.options {
            options.encode(wr)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let len = rmp::decode::read_array_len(rd)?;
        if len != 2 && len != 3 {
            return Err(Error::Codec(format!(
                "forward message array has length {len}"
            )));
        }
        let tag = read_string(rd)?;
        let entries = read_entries(rd)?;
        let options = if len == 3 { read_options_slot(rd)? } else { None };
        Ok(Self {
            tag,
            entries,
            options,
        })
    }

    pub fn unmarshal(buf: &[u8]) -> Result<(Self, &[u8])> {
        let mut rd = buf;
        let msg = Self::decode(&mut rd)?;
        Ok((msg, rd))
    }
}

impl Sendable for ForwardMessage {
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.encode(buf)
    }

    fn size_hint(&self) -> usize {
        1 + 5
            + self.tag.len()
            + 5
            + self.entries.iter().map(EntryExt::size_hint).sum::<usize>()
            + self.options.as_ref().map_or(0, MessageOptions::size_hint)
    }

    fn chunk(&mut self) -> Result<String> {
        ensure_chunk(&mut self.options)
    }
}

/// N events carried as a concatenated MessagePack byte stream:
/// `[tag, stream:bin, options?]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedForwardMessage {
    pub tag: String,
    pub stream: Vec<u8>,
    pub options: Option<MessageOptions>,
}

impl PackedForwardMessage {
    /// Builds the event stream from `entries` and records their count
    /// in `options.size`.
    pub fn new(tag: impl Into<String>, entries: &[EntryExt]) -> Result<Self> {
        let stream = pack_entries(entries)?;
        Ok(Self {
            tag: tag.into(),
            stream,
            options: Some(MessageOptions {
                size: Some(entries.len()),
                ..Default::default()
            }),
        })
    }

    pub fn from_stream(tag: impl Into<String>, stream: Vec<u8>, entry_count: usize) -> Self {
        Self {
            tag: tag.into(),
            stream,
            options: Some(MessageOptions {
                size: Some(entry_count),
                ..Default::default()
            }),
        }
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        let len = if self.options.is_some() { 3 } else { 2 };
        rmp::encode::write_array_len(wr, len)?;
        rmp::encode::write_str(wr, &self.tag)?;
        rmp::encode::write_bin(wr, &self.stream)?;
        if let Some(options) = &self.options {
            options.encode(wr)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let len = rmp::decode::read_array_len(rd)?;
        if len != 2 && len != 3 {
            return Err(Error::Codec(format!(
                "packed forward message array has length {len}"
            )));
        }
        let tag = read_string(rd)?;
        let stream_len = rmp::decode::read_bin_len(rd)?;
        let mut stream = vec![0u8; stream_len as usize];
        rd.read_exact(&mut stream)?;
        let options = if len == 3 { read_options_slot(rd)? } else { None };
        Ok(Self {
            tag,
            stream,
            options,
        })
    }

    pub fn unmarshal(buf: &[u8]) -> Result<(Self, &[u8])> {
        let mut rd = buf;
        let msg = Self::decode(&mut rd)?;
        Ok((msg, rd))
    }
}

impl Sendable for PackedForwardMessage {
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.encode(buf)
    }

    fn size_hint(&self) -> usize {
        1 + 5
            + self.tag.len()
            + 5
            + self.stream.len()
            + self.options.as_ref().map_or(0, MessageOptions::size_hint)
    }

    fn chunk(&mut self) -> Result<String> {
        ensure_chunk(&mut self.options)
    }
}

/// Gzips `stream` at the library default level.
pub fn compress_stream(stream: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(stream)?;
    Ok(encoder.finish()?)
}

pub fn decompress_stream(stream: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(stream);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// A packed forward message whose stream bytes are gzipped and whose
/// options carry `compressed = "gzip"`. `size` still counts the
/// uncompressed entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressedPackedForwardMessage {
    pub tag: String,
    pub stream: Vec<u8>,
    pub options: Option<MessageOptions>,
}

impl CompressedPackedForwardMessage {
    pub fn new(tag: impl Into<String>, entries: &[EntryExt]) -> Result<Self> {
        let stream = pack_entries(entries)?;
        Self::from_stream(tag, &stream, entries.len())
    }

    /// Compresses an already-packed (uncompressed) event stream.
    pub fn from_stream(
        tag: impl Into<String>,
        uncompressed: &[u8],
        entry_count: usize,
    ) -> Result<Self> {
        Ok(Self {
            tag: tag.into(),
            stream: compress_stream(uncompressed)?,
            options: Some(MessageOptions {
                size: Some(entry_count),
                compressed: Some(COMPRESSION_GZIP.into()),
                ..Default::default()
            }),
        })
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        let len = if self.options.is_some() { 3 } else { 2 };
        rmp::encode::write_array_len(wr, len)?;
        rmp::encode::write_str(wr, &self.tag)?;
        rmp::encode::write_bin(wr, &self.stream)?;
        if let Some(options) = &self.options {
            options.encode(wr)?;
        }
        Ok(())
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let packed = PackedForwardMessage::decode(rd)?;
        Ok(Self {
            tag: packed.tag,
            stream: packed.stream,
            options: packed.options,
        })
    }

    pub fn unmarshal(buf: &[u8]) -> Result<(Self, &[u8])> {
        let mut rd = buf;
        let msg = Self::decode(&mut rd)?;
        Ok((msg, rd))
    }

    pub fn entries(&self) -> Result<Vec<EntryExt>> {
        let stream = decompress_stream(&self.stream)?;
        let mut rd = &stream[..];
        let mut entries = Vec::new();
        while !rd.is_empty() {
            entries.push(EntryExt::decode(&mut rd)?);
        }
        Ok(entries)
    }
}

impl Sendable for CompressedPackedForwardMessage {
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.encode(buf)
    }

    fn size_hint(&self) -> usize {
        1 + 5
            + self.tag.len()
            + 5
            + self.stream.len()
            + self.options.as_ref().map_or(0, MessageOptions::size_hint)
    }

    fn chunk(&mut self) -> Result<String> {
        ensure_chunk(&mut self.options)
    }
}

/// Opaque pre-marshalled bytes, written verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage(pub Vec<u8>);

impl RawMessage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Sendable for RawMessage {
    fn marshal(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.0);
        Ok(())
    }

    fn size_hint(&self) -> usize {
        self.0.len()
    }

    /// Scans the stored bytes; raw messages are never rewritten, so
    /// there is nothing to memoise.
    fn chunk(&mut self) -> Result<String> {
        scan::chunk_from_bytes(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::record::Record;
    use rmpv::Value;

    fn sample_record() -> Record {
        let mut record = Record::new();
        record.insert("level".into(), Value::from("info"));
        record.insert(
            "nested".into(),
            Value::Map(vec![(Value::from("k"), Value::from(1))]),
        );
        record
    }

    fn sample_entries() -> Vec<EntryExt> {
        vec![
            EntryExt::new(EventTime::new(100, 1), sample_record()),
            EntryExt::new(EventTime::new(101, 2), sample_record()),
        ]
    }

    #[test]
    fn message_round_trip_without_options() {
        let msg = Message::new("app.log", 1_257_894_000, sample_record());
        let bytes = msg.to_bytes().expect("marshal");
        assert!(bytes.len() <= msg.size_hint());
        // Short outer array: 3 elements.
        assert_eq!(bytes[0], 0x93);
        let (back, rest) = Message::unmarshal(&bytes).expect("unmarshal");
        assert_eq!(msg, back);
        assert!(rest.is_empty());
    }

    #[test]
    fn message_round_trip_with_options() {
        let mut msg = Message::new("app.log", 7, sample_record());
        msg.options = Some(MessageOptions {
            chunk: Some("Y2h1bms=".into()),
            ..Default::default()
        });
        let bytes = msg.to_bytes().expect("marshal");
        assert_eq!(bytes[0], 0x94);
        let (back, _) = Message::unmarshal(&bytes).expect("unmarshal");
        assert_eq!(msg, back);
    }

    #[test]
    fn message_ext_round_trip() {
        let mut msg = MessageExt::new("app.log", EventTime::new(9, 125_000), sample_record());
        msg.options = Some(MessageOptions {
            size: Some(1),
            ..Default::default()
        });
        let bytes = msg.to_bytes().expect("marshal");
        assert!(bytes.len() <= msg.size_hint());
        let (back, _) = MessageExt::unmarshal(&bytes).expect("unmarshal");
        assert_eq!(msg, back);
    }

    #[test]
    fn forward_round_trip() {
        let msg = ForwardMessage::new("app.log", sample_entries());
        let bytes = msg.to_bytes().expect("marshal");
        assert_eq!(bytes[0], 0x92);
        let (back, _) = ForwardMessage::unmarshal(&bytes).expect("unmarshal");
        assert_eq!(msg, back);
    }

    #[test]
    fn packed_forward_round_trip() {
        let msg = PackedForwardMessage::new("app.log", &sample_entries()).expect("build");
        assert_eq!(
            msg.options.as_ref().and_then(|o| o.size),
            Some(sample_entries().len())
        );
        let bytes = msg.to_bytes().expect("marshal");
        assert!(bytes.len() <= msg.size_hint());
        let (back, _) = PackedForwardMessage::unmarshal(&bytes).expect("unmarshal");
        assert_eq!(msg, back);
    }

    #[test]
    fn packed_stream_decodes_back_to_entries() {
        let entries = sample_entries();
        let msg = PackedForwardMessage::new("app.log", &entries).expect("build");
        let mut rd = &msg.stream[..];
        let mut decoded = Vec::new();
        while !rd.is_empty() {
            decoded.push(EntryExt::decode(&mut rd).expect("entry"));
        }
        assert_eq!(decoded, entries);
    }

    #[test]
    fn compressed_matches_manual_gzip_of_packed_stream() {
        let entries = sample_entries();
        let msg = CompressedPackedForwardMessage::new("app.log", &entries).expect("build");

        let stream = pack_entries(&entries).expect("pack");
        let manual = PackedForwardMessage {
            tag: "app.log".into(),
            stream: compress_stream(&stream).expect("gzip"),
            options: Some(MessageOptions {
                size: Some(entries.len()),
                compressed: Some(COMPRESSION_GZIP.into()),
                ..Default::default()
            }),
        };
        assert_eq!(
            msg.to_bytes().expect("marshal"),
            manual.to_bytes().expect("marshal")
        );
        assert_eq!(msg.entries().expect("decompress"), entries);
    }

    #[test]
    fn options_omit_empty_fields() {
        let options = MessageOptions {
            size: Some(2),
            ..Default::default()
        };
        let mut buf = Vec::new();
        options.encode(&mut buf).expect("encode");
        // fixmap(1), fixstr(4) "size", positive fixint 2
        assert_eq!(buf, [0x81, 0xA4, b's', b'i', b'z', b'e', 0x02]);
    }

    #[test]
    fn nil_options_slot_clears_options() {
        let mut msg = Message::new("t", 1, Record::new());
        msg.options = Some(MessageOptions::default());
        let mut bytes = msg.to_bytes().expect("marshal");
        // Replace the trailing empty map (0x80) with nil (0xC0).
        let last = bytes.len() - 1;
        assert_eq!(bytes[last], 0x80);
        bytes[last] = 0xC0;
        let (back, _) = Message::unmarshal(&bytes).expect("unmarshal");
        assert!(back.options.is_none());
    }

    #[test]
    fn unknown_option_keys_are_skipped() {
        let mut bytes = Vec::new();
        rmp::encode::write_array_len(&mut bytes, 4).expect("array");
        rmp::encode::write_str(&mut bytes, "t").expect("tag");
        rmp::encode::write_sint(&mut bytes, 1).expect("ts");
        rmp::encode::write_map_len(&mut bytes, 0).expect("record");
        rmp::encode::write_map_len(&mut bytes, 2).expect("options");
        rmp::encode::write_str(&mut bytes, "future").expect("key");
        rmp::encode::write_uint(&mut bytes, 9).expect("value");
        rmp::encode::write_str(&mut bytes, "chunk").expect("key");
        rmp::encode::write_str(&mut bytes, "abc").expect("value");

        let (msg, _) = Message::unmarshal(&bytes).expect("unmarshal");
        let options = msg.options.expect("options");
        assert_eq!(options.chunk.as_deref(), Some("abc"));
        assert_eq!(options.size, None);
    }

    #[test]
    fn chunk_is_memoised_and_reversible() {
        let mut msg = ForwardMessage::new("t", sample_entries());
        let first = msg.chunk().expect("chunk");
        let second = msg.chunk().expect("chunk");
        assert_eq!(first, second);
        let decoded = BASE64.decode(&first).expect("base64");
        assert_eq!(decoded.len(), 16);
        // The memoised id survives serialisation.
        let bytes = msg.to_bytes().expect("marshal");
        let (back, _) = ForwardMessage::unmarshal(&bytes).expect("unmarshal");
        assert_eq!(back.options.and_then(|o| o.chunk), Some(first));
    }

    #[test]
    fn raw_message_is_written_verbatim() {
        let mut inner = Message::new("t", 3, sample_record());
        let chunk = inner.chunk().expect("chunk");
        let bytes = inner.to_bytes().expect("marshal");
        let mut raw = RawMessage::new(bytes.clone());
        assert_eq!(raw.to_bytes().expect("marshal"), bytes);
        assert_eq!(raw.chunk().expect("chunk"), chunk);
    }
}
