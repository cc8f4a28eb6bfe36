use bytes::{BufMut, BytesMut};

use crate::errors::EngineError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Frames are `[u32 big-endian payload length][payload]`.
pub const HEADER_LEN: usize = 4;

// -----------------------------------------------------------------------------
// ----- PacketHeader ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    payload_len: u32,
}

// -----------------------------------------------------------------------------
// ----- PacketHeader: Static --------------------------------------------------

impl PacketHeader {
    pub fn for_payload(payload_len: usize) -> Result<Self, EngineError> {
        let payload_len = u32::try_from(payload_len).map_err(|_| EngineError::FrameTooLarge {
            len: payload_len,
            max: u32::MAX as usize,
        })?;

        Ok(Self { payload_len })
    }

    /// Cheap, peeks at the header only. `None` until all header bytes are in.
    #[inline]
    pub fn peek(buf: &[u8]) -> Option<Self> {
        let raw: [u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;
        Some(Self {
            payload_len: u32::from_be_bytes(raw),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- PacketHeader: Public --------------------------------------------------

impl PacketHeader {
    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }

    #[inline]
    pub fn put(&self, dst: &mut BytesMut) {
        dst.put_u32(self.payload_len);
    }
}

// -----------------------------------------------------------------------------
// ----- Frame Helpers ---------------------------------------------------------

/// Append `[header][payload]` to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<PacketHeader, EngineError> {
    let header = PacketHeader::for_payload(payload.len())?;
    dst.reserve(header.frame_len());
    header.put(dst);
    dst.extend_from_slice(payload);
    Ok(header)
}

/// Validate an exact, complete frame and return a view over its payload.
pub fn decode_frame(frame: &[u8]) -> Result<(PacketHeader, &[u8]), EngineError> {
    let header =
        PacketHeader::peek(frame).ok_or(EngineError::MalformedFrame("shorter than header"))?;

    if frame.len() != header.frame_len() {
        return Err(EngineError::MalformedFrame(
            "length field does not match frame size",
        ));
    }

    Ok((header, &frame[HEADER_LEN..]))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_for_every_small_length() {
        for len in 0..=300usize {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let mut buf = BytesMut::new();
            let header = encode_frame(&payload, &mut buf).unwrap();
            assert_eq!(buf.len(), HEADER_LEN + len);
            assert_eq!(header.payload_len(), len);

            let (decoded, view) = decode_frame(&buf).unwrap();
            assert_eq!(decoded, header);
            assert_eq!(view, &payload[..]);
        }
    }

    #[test]
    fn length_is_big_endian() {
        let mut buf = BytesMut::new();
        encode_frame(&[0u8; 258], &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_LEN], &[0, 0, 1, 2]);
    }

    #[test]
    fn peek_waits_for_full_header() {
        assert!(PacketHeader::peek(&[0, 0, 1]).is_none());
        let header = PacketHeader::peek(&[0, 0, 0, 9, 0xAA]).unwrap();
        assert_eq!(header.payload_len(), 9);
        assert_eq!(header.frame_len(), 13);
    }

    #[test]
    fn decode_rejects_short_and_mismatched_frames() {
        assert!(matches!(
            decode_frame(&[0, 0]),
            Err(EngineError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(&[0, 0, 0, 3, 1, 2]),
            Err(EngineError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame(&[0, 0, 0, 1, 1, 2]),
            Err(EngineError::MalformedFrame(_))
        ));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
