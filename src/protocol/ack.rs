//! Per-chunk acknowledgement sent back by the collector.

use std::io::Read;

use rmpv::Value;

use crate::{Error, Result};

/// Response map whose `ack` field echoes the chunk id of the message
/// being acknowledged. Unknown keys are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub ack: String,
}

impl Ack {
    pub fn decode<R: Read>(rd: &mut R) -> Result<Self> {
        let pairs = match rmpv::decode::read_value(rd)? {
            Value::Map(pairs) => pairs,
            other => {
                return Err(Error::Codec(format!(
                    "expected a map for the ack, got {other}"
                )))
            }
        };
        for (key, value) in pairs {
            if key.as_str() == Some("ack") {
                let ack = value
                    .as_str()
                    .ok_or_else(|| Error::Codec("ack value is not a string".into()))?
                    .to_owned();
                return Ok(Self { ack });
            }
        }
        Err(Error::Codec("ack field missing from response".into()))
    }

    pub fn unmarshal(buf: &[u8]) -> Result<(Self, &[u8])> {
        let mut rd = buf;
        let ack = Self::decode(&mut rd)?;
        Ok((ack, rd))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(7 + self.ack.len());
        rmp::encode::write_map_len(&mut buf, 1)?;
        rmp::encode::write_str(&mut buf, "ack")?;
        rmp::encode::write_str(&mut buf, &self.ack)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::Ack;

    #[test]
    fn round_trip() {
        let ack = Ack { ack: "Y2h1bms=".into() };
        let bytes = ack.encode().expect("encode");
        let (back, rest) = Ack::unmarshal(&bytes).expect("decode");
        assert_eq!(ack, back);
        assert!(rest.is_empty());
    }

    #[test]
    fn skips_unknown_keys() {
        let mut buf = Vec::new();
        rmp::encode::write_map_len(&mut buf, 2).expect("map");
        rmp::encode::write_str(&mut buf, "extra").expect("key");
        rmp::encode::write_uint(&mut buf, 1).expect("value");
        rmp::encode::write_str(&mut buf, "ack").expect("key");
        rmp::encode::write_str(&mut buf, "abc").expect("value");
        let (ack, _) = Ack::unmarshal(&buf).expect("decode");
        assert_eq!(ack.ack, "abc");
    }

    #[test]
    fn missing_ack_field_is_an_error() {
        let mut buf = Vec::new();
        rmp::encode::write_map_len(&mut buf, 0).expect("map");
        assert!(Ack::unmarshal(&buf).is_err());
    }
}
