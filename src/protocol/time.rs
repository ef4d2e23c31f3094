//! Fluentd `EventTime`: a MessagePack fixext-8 timestamp, extension
//! type 0, with nanosecond precision.
//!
//! Wire layout is `{0xD7, 0x00}` followed by an 8-byte payload:
//! big-endian seconds, then big-endian nanoseconds.

use std::io::{Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

pub const EVENT_TIME_EXT_TYPE: i8 = 0;
pub const EVENT_TIME_LEN: u32 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTime {
    pub seconds: u32,
    pub nanoseconds: u32,
}

impl EventTime {
    pub fn new(seconds: u32, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Captures the current UTC time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            seconds: since_epoch.as_secs() as u32,
            nanoseconds: since_epoch.subsec_nanos(),
        }
    }

    pub fn encode<W: Write>(&self, wr: &mut W) -> Result<()> {
        rmp::encode::write_ext_meta(wr, EVENT_TIME_LEN, EVENT_TIME_EXT_TYPE)?;
        wr.write_all(&self.seconds.to_be_bytes())?;
        wr.write_all(&self.nanoseconds.to_be_bytes())?;
        Ok(())
    }

    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let meta = rmp::decode::read_ext_meta(rd)?;
        if meta.typeid != EVENT_TIME_EXT_TYPE {
            return Err(Error::Codec(format!(
                "unexpected extension type {} for event time",
                meta.typeid
            )));
        }
        if meta.size != EVENT_TIME_LEN {
            return Err(Error::Codec(format!(
                "unexpected extension length {} for event time",
                meta.size
            )));
        }
        let mut payload = [0u8; 8];
        rd.read_exact(&mut payload)?;
        let seconds = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let nanoseconds = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Ok(Self {
            seconds,
            nanoseconds,
        })
    }

    /// Marker byte, type byte, and the 8-byte payload.
    pub fn size_hint(&self) -> usize {
        10
    }
}

impl From<SystemTime> for EventTime {
    fn from(value: SystemTime) -> Self {
        let since_epoch = value.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        Self {
            seconds: since_epoch.as_secs() as u32,
            nanoseconds: since_epoch.subsec_nanos(),
        }
    }
}

impl From<EventTime> for SystemTime {
    fn from(value: EventTime) -> Self {
        UNIX_EPOCH + Duration::new(u64::from(value.seconds), value.nanoseconds)
    }
}
