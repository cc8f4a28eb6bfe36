//! framing/reader.rs
//!
//! Read side of the stream protocol as an explicit state machine. The caller
//! asks for the slice still to be filled, reads whatever the socket gives
//! into it, and reports the count back through `advance`. The machine never
//! touches the socket itself.

use bytes::BytesMut;

use super::header::{HEADER_LEN, PacketHeader};
use crate::errors::EngineError;
use crate::operation::{Progress, TransmissionState};
use crate::pool::BufferLease;

// -----------------------------------------------------------------------------
// ----- ReadState -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    AwaitingHeader(TransmissionState),
    AwaitingData {
        header: PacketHeader,
        progress: TransmissionState,
    },
    /// A complete frame sits in the buffer until `rearm`.
    Dispatch(PacketHeader),
    Closed,
}

impl ReadState {
    fn awaiting_header() -> Self {
        ReadState::AwaitingHeader(TransmissionState::new(HEADER_LEN))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReadState::AwaitingHeader(_) => "awaiting header",
            ReadState::AwaitingData { .. } => "awaiting data",
            ReadState::Dispatch(_) => "dispatching",
            ReadState::Closed => "closed",
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FrameReader -----------------------------------------------------------

#[derive(Debug)]
pub struct FrameReader {
    state: ReadState,
    buffer: BufferLease,
    max_payload: usize,
    /// Most payload bytes exposed to a single receive.
    chunk: usize,
}

// -----------------------------------------------------------------------------
// ----- FrameReader: Static ---------------------------------------------------

impl FrameReader {
    /// The payload is read in windows no larger than the buffer's capacity,
    /// so a large declared length only costs memory as its bytes arrive.
    pub fn new(mut buffer: BufferLease, max_payload: usize) -> Self {
        let chunk = buffer.capacity().max(MIN_READ_CHUNK);
        buffer.clear();
        buffer.resize(HEADER_LEN, 0);

        Self {
            state: ReadState::awaiting_header(),
            buffer,
            max_payload,
            chunk,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FrameReader: Public ---------------------------------------------------

impl FrameReader {
    pub fn state(&self) -> &ReadState {
        &self.state
    }

    /// Bytes of the current frame received so far, header included.
    pub fn buffered(&self) -> usize {
        match self.state {
            ReadState::AwaitingHeader(progress) => progress.transferred(),
            ReadState::AwaitingData { progress, .. } => HEADER_LEN + progress.transferred(),
            ReadState::Dispatch(header) => header.frame_len(),
            ReadState::Closed => 0,
        }
    }

    pub fn wants_bytes(&self) -> bool {
        matches!(
            self.state,
            ReadState::AwaitingHeader(_) | ReadState::AwaitingData { .. }
        )
    }

    /// The slice the next receive should fill. Empty unless `wants_bytes`.
    /// While awaiting data it covers at most one read window of the payload.
    pub fn unfilled(&mut self) -> &mut [u8] {
        let (start, end) = match self.state {
            ReadState::AwaitingHeader(progress) => (progress.transferred(), HEADER_LEN),
            ReadState::AwaitingData { progress, .. } => {
                let start = HEADER_LEN + progress.transferred();
                (start, start + progress.remaining().min(self.chunk))
            }
            ReadState::Dispatch(_) | ReadState::Closed => return &mut [],
        };

        grow_to(&mut self.buffer, end);
        &mut self.buffer[start..end]
    }

    /// Bytes currently allocated in the buffer, header included.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed back how many bytes the last receive placed in `unfilled()`.
    pub fn advance(&mut self, n: usize) -> Result<&ReadState, EngineError> {
        let next = match self.state {
            ReadState::AwaitingHeader(mut progress) => match self.step(&mut progress, n)? {
                Progress::Partial { .. } => ReadState::AwaitingHeader(progress),
                Progress::Complete => self.on_header()?,
            },

            ReadState::AwaitingData {
                header,
                mut progress,
            } => {
                let next = match self.step(&mut progress, n)? {
                    Progress::Partial { .. } => ReadState::AwaitingData { header, progress },
                    Progress::Complete => ReadState::Dispatch(header),
                };
                self.buffer.truncate(HEADER_LEN + progress.transferred());
                next
            }

            ReadState::Dispatch(_) | ReadState::Closed => {
                return Err(EngineError::protocol_violation(format!(
                    "receive completed while {}",
                    self.state.name()
                )));
            }
        };

        self.state = next;
        Ok(&self.state)
    }

    /// Header and payload of the frame awaiting dispatch.
    pub fn frame(&self) -> Option<(PacketHeader, &[u8])> {
        match self.state {
            ReadState::Dispatch(header) => Some((header, &self.buffer[HEADER_LEN..])),
            _ => None,
        }
    }

    /// Dispatch → AwaitingHeader, reusing the same buffer.
    pub fn rearm(&mut self) -> Result<(), EngineError> {
        if !matches!(self.state, ReadState::Dispatch(_)) {
            return Err(EngineError::protocol_violation(format!(
                "rearm while {}",
                self.state.name()
            )));
        }

        self.buffer.clear();
        self.buffer.resize(HEADER_LEN, 0);
        self.state = ReadState::awaiting_header();
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = ReadState::Closed;
    }

    /// Hand the buffer over once a frame is ready; payload starts at
    /// `HEADER_LEN`.
    pub fn into_frame(self) -> Result<(PacketHeader, BufferLease), EngineError> {
        match self.state {
            ReadState::Dispatch(header) => Ok((header, self.buffer)),
            state => Err(EngineError::protocol_violation(format!(
                "frame taken while {}",
                state.name()
            ))),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FrameReader: Private --------------------------------------------------

impl FrameReader {
    fn step(
        &mut self,
        progress: &mut TransmissionState,
        n: usize,
    ) -> Result<Progress, EngineError> {
        progress.advance(n).inspect_err(|_| self.state = ReadState::Closed)
    }

    fn on_header(&mut self) -> Result<ReadState, EngineError> {
        let header = PacketHeader::peek(&self.buffer)
            .ok_or_else(|| EngineError::protocol_violation("header complete but not decodable"))?;

        let len = header.payload_len();
        if len > self.max_payload {
            self.state = ReadState::Closed;
            return Err(EngineError::FrameTooLarge {
                len,
                max: self.max_payload,
            });
        }

        if len == 0 {
            return Ok(ReadState::Dispatch(header));
        }

        Ok(ReadState::AwaitingData {
            header,
            progress: TransmissionState::new(len),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

const MIN_READ_CHUNK: usize = 512;

#[inline]
fn grow_to(buf: &mut BytesMut, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::encode_frame;
    use crate::pool::BufferPool;
    use rand::Rng;

    fn pool() -> BufferPool {
        BufferPool::new(64, 1 << 20, 8)
    }

    fn frame_of(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(payload, &mut buf).unwrap();
        buf.to_vec()
    }

    /// Deliver `wire` in the given chunk sizes, as a socket would.
    fn deliver(reader: &mut FrameReader, wire: &[u8], chunks: &[usize]) -> Vec<u8> {
        let mut offset = 0;
        for &chunk in chunks {
            let mut chunk = chunk;
            while chunk > 0 {
                let slot = reader.unfilled();
                let take = slot.len().min(chunk);
                slot[..take].copy_from_slice(&wire[offset..offset + take]);
                reader.advance(take).unwrap();
                offset += take;
                chunk -= take;
            }
        }
        assert_eq!(offset, wire.len());
        let (_, payload) = reader.frame().expect("frame ready");
        payload.to_vec()
    }

    #[test]
    fn single_shot_delivery() {
        let pool = pool();
        let payload = b"hello framing".to_vec();
        let wire = frame_of(&payload);

        let mut reader = FrameReader::new(pool.rent(0), 1024);
        assert!(matches!(reader.state(), ReadState::AwaitingHeader(_)));
        assert_eq!(deliver(&mut reader, &wire, &[wire.len()]), payload);
        assert!(matches!(reader.state(), ReadState::Dispatch(_)));
    }

    #[test]
    fn every_two_way_split_matches_single_shot() {
        let pool = pool();
        let payload: Vec<u8> = (0..40u8).collect();
        let wire = frame_of(&payload);

        for cut in 1..wire.len() {
            let mut reader = FrameReader::new(pool.rent(0), 1024);
            let got = deliver(&mut reader, &wire, &[cut, wire.len() - cut]);
            assert_eq!(got, payload, "split at {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_single_shot() {
        let pool = pool();
        let payload = vec![0x5A; 17];
        let wire = frame_of(&payload);

        let mut reader = FrameReader::new(pool.rent(0), 1024);
        let got = deliver(&mut reader, &wire, &vec![1; wire.len()]);
        assert_eq!(got, payload);
    }

    #[test]
    fn random_k_way_splits_match_single_shot() {
        let pool = pool();
        let mut rng = rand::rng();

        for _ in 0..200 {
            let len = rng.random_range(0..512);
            let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let wire = frame_of(&payload);

            let mut chunks = Vec::new();
            let mut left = wire.len();
            while left > 0 {
                let chunk = rng.random_range(1..=left);
                chunks.push(chunk);
                left -= chunk;
            }

            let mut reader = FrameReader::new(pool.rent(0), 1024);
            assert_eq!(deliver(&mut reader, &wire, &chunks), payload);
        }
    }

    #[test]
    fn empty_payload_dispatches_after_header() {
        let pool = pool();
        let mut reader = FrameReader::new(pool.rent(0), 1024);
        reader.unfilled().copy_from_slice(&[0, 0, 0, 0]);
        let state = reader.advance(HEADER_LEN).unwrap();
        assert!(matches!(state, ReadState::Dispatch(_)));
        assert_eq!(reader.frame().unwrap().1, b"");
    }

    #[test]
    fn rearm_reads_the_next_frame_into_the_same_buffer() {
        let pool = pool();
        let mut reader = FrameReader::new(pool.rent(0), 1024);

        let first = frame_of(b"first");
        let second = frame_of(b"second frame");
        assert_eq!(deliver(&mut reader, &first, &[first.len()]), b"first");
        reader.rearm().unwrap();
        assert_eq!(deliver(&mut reader, &second, &[3, 9, 4]), b"second frame");

        drop(reader);
        let stats = pool.stats();
        assert_eq!(stats.rented(), 1);
        assert_eq!(stats.returned, 1);
    }

    #[test]
    fn zero_byte_transfer_closes() {
        let pool = pool();
        let mut reader = FrameReader::new(pool.rent(0), 1024);
        reader.unfilled()[..2].copy_from_slice(&[0, 0]);
        reader.advance(2).unwrap();

        let err = reader.advance(0).unwrap_err();
        assert!(matches!(err, EngineError::ConnectionClosed));
        assert_eq!(reader.state(), &ReadState::Closed);
        assert!(!reader.wants_bytes());
        assert!(reader.unfilled().is_empty());
    }

    #[test]
    fn oversized_length_is_rejected_before_allocating() {
        let pool = pool();
        let mut reader = FrameReader::new(pool.rent(0), 16);
        reader.unfilled().copy_from_slice(&1000u32.to_be_bytes());

        let err = reader.advance(HEADER_LEN).unwrap_err();
        assert!(matches!(err, EngineError::FrameTooLarge { len: 1000, max: 16 }));
        assert_eq!(reader.state(), &ReadState::Closed);
    }

    #[test]
    fn large_declared_length_grows_with_the_data() {
        let pool = pool();
        let max = 16 << 20;
        let mut reader = FrameReader::new(pool.rent(0), max);
        reader.unfilled().copy_from_slice(&(max as u32).to_be_bytes());
        reader.advance(HEADER_LEN).unwrap();

        assert!(matches!(reader.state(), ReadState::AwaitingData { .. }));
        assert_eq!(reader.buffered(), HEADER_LEN);
        assert_eq!(reader.buffer_len(), reader.buffered());

        let window = reader.unfilled().len();
        assert!(window > 0);
        assert!(window <= 64 * 1024, "window of {window} bytes");

        reader.unfilled()[..10].fill(7);
        reader.advance(10).unwrap();
        assert_eq!(reader.buffered(), HEADER_LEN + 10);
        assert_eq!(reader.buffer_len(), reader.buffered());
    }

    #[test]
    fn window_never_runs_past_the_frame() {
        let pool = pool();
        let payload = vec![3u8; 5000];
        let wire = frame_of(&payload);
        let mut reader = FrameReader::new(pool.rent(0), 1 << 20);

        let mut offset = 0;
        while reader.wants_bytes() {
            let slot = reader.unfilled();
            assert!(offset + slot.len() <= wire.len());
            let take = slot.len();
            slot.copy_from_slice(&wire[offset..offset + take]);
            offset += take;
            reader.advance(take).unwrap();
        }

        assert_eq!(offset, wire.len());
        assert_eq!(reader.buffer_len(), wire.len());
        assert_eq!(reader.frame().unwrap().1, &payload[..]);
    }

    #[test]
    fn advancing_a_dispatched_frame_is_a_protocol_violation() {
        let pool = pool();
        let mut reader = FrameReader::new(pool.rent(0), 1024);
        let wire = frame_of(b"x");
        deliver(&mut reader, &wire, &[wire.len()]);

        assert!(reader.advance(1).unwrap_err().is_fatal());
        assert!(reader.rearm().is_ok());
        assert!(reader.rearm().unwrap_err().is_fatal());
    }

    #[test]
    fn into_frame_hands_over_the_buffer() {
        let pool = pool();
        let mut reader = FrameReader::new(pool.rent(0), 1024);
        let wire = frame_of(b"owned");
        deliver(&mut reader, &wire, &[wire.len()]);

        let (header, lease) = reader.into_frame().unwrap();
        assert_eq!(header.payload_len(), 5);
        assert_eq!(&lease[HEADER_LEN..], b"owned");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
