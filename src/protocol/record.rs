//! Records and entries.
//!
//! A record is a map from string keys to arbitrary MessagePack values.
//! An entry pairs a timestamp with a record and is serialised as a
//! 2-element MessagePack array; an entry list is a MessagePack array
//! of entries. Packed forward messages instead carry the byte-wise
//! concatenation of standalone entry encodings, built here.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use rmpv::Value;

use crate::protocol::time::EventTime;
use crate::{Error, Result};

/// Mapping from string keys to arbitrary MessagePack values.
pub type Record = BTreeMap<String, Value>;

pub fn write_record<W: Write>(wr: &mut W, record: &Record) -> Result<()> {
    rmp::encode::write_map_len(wr, record.len() as u32)?;
    for (key, value) in record {
        rmp::encode::write_str(wr, key)?;
        rmpv::encode::write_value(wr, value)?;
    }
    Ok(())
}

pub fn read_record<R: Read>(rd: &mut R) -> Result<Record> {
    record_from_value(rmpv::decode::read_value(rd)?)
}

pub fn record_from_value(value: Value) -> Result<Record> {
    let pairs = match value {
        Value::Map(pairs) => pairs,
        other => {
            return Err(Error::Codec(format!(
                "expected a map for the record, got {other}"
            )))
        }
    };
    let mut record = Record::new();
    for (key, value) in pairs {
        let key = match key {
            Value::String(s) => s
                .into_str()
                .ok_or_else(|| Error::Codec("record key is not valid UTF-8".into()))?,
            other => {
                return Err(Error::Codec(format!(
                    "record keys must be strings, got {other}"
                )))
            }
        };
        record.insert(key, value);
    }
    Ok(record)
}

/// Upper-bound byte estimate for one MessagePack value.
pub fn value_size_hint(value: &Value) -> usize {
    match value {
        Value::Nil | Value::Boolean(_) => 1,
        Value::Integer(_) | Value::F32(_) | Value::F64(_) => 9,
        Value::String(s) => 5 + s.as_bytes().len(),
        Value::Binary(b) => 5 + b.len(),
        Value::Array(items) => 5 + items.iter().map(value_size_hint).sum::<usize>(),
        Value::Map(pairs) => {
            5 + pairs
                .iter()
                .map(|(k, v)| value_size_hint(k) + value_size_hint(v))
                .sum::<usize>()
        }
        Value::Ext(_, data) => 6 + data.len(),
    }
}

pub fn record_size_hint(record: &Record) -> usize {
    5 + record
        .iter()
        .map(|(k, v)| 5 + k.len() + value_size_hint(v))
        .sum::<usize>()
}

/// One event with second-precision timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub timestamp: i64,
    pub record: Record,
}

impl Entry {
    pub fn new(timestamp: i64, record: Record) -> Self {
        Self { timestamp, record }
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        rmp::encode::write_array_len(wr, 2)?;
        rmp::encode::write_sint(wr, self.timestamp)?;
        write_record(wr, &self.record)
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let len = rmp::decode::read_array_len(rd)?;
        if len != 2 {
            return Err(Error::Codec(format!("entry array has length {len}")));
        }
        let timestamp = rmp::decode::read_int(rd)?;
        let record = read_record(rd)?;
        Ok(Self { timestamp, record })
    }

    pub fn size_hint(&self) -> usize {
        1 + 9 + record_size_hint(&self.record)
    }
}

/// One event with a sub-second `EventTime` timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryExt {
    pub timestamp: EventTime,
    pub record: Record,
}

impl EntryExt {
    pub fn new(timestamp: EventTime, record: Record) -> Self {
        Self { timestamp, record }
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        rmp::encode::write_array_len(wr, 2)?;
        self.timestamp.encode(wr)?;
        write_record(wr, &self.record)
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let len = rmp::decode::read_array_len(rd)?;
        if len != 2 {
            return Err(Error::Codec(format!("entry array has length {len}")));
        }
        let timestamp = EventTime::decode(rd)?;
        let record = read_record(rd)?;
        Ok(Self { timestamp, record })
    }

    pub fn size_hint(&self) -> usize {
        1 + self.timestamp.size_hint() + record_size_hint(&self.record)
    }
}

pub fn write_entries<W: Write>(wr: &mut W, entries: &[EntryExt]) -> Result<()> {
    rmp::encode::write_array_len(wr, entries.len() as u32)?;
    for entry in entries {
        entry.encode(wr)?;
    }
    Ok(())
}

pub fn read_entries<R: Read>(rd: &mut R) -> Result<Vec<EntryExt>> {
    let len = rmp::decode::read_array_len(rd)?;
    let mut entries = Vec::with_capacity(len as usize);
    for _ in 0..len {
        entries.push(EntryExt::decode(rd)?);
    }
    Ok(entries)
}

/// Concatenates the standalone encoding of each entry, in order.
///
/// Each entry emits its own 2-element array header (`0x92`); there is
/// no wrapping array around the stream.
pub fn pack_entries(entries: &[EntryExt]) -> Result<Vec<u8>> {
    let mut stream = Vec::with_capacity(entries.iter().map(EntryExt::size_hint).sum());
    for entry in entries {
        entry.encode(&mut stream)?;
    }
    Ok(stream)
}
