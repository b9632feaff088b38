//! The length-prefixed framing used on the wire in both directions.
//!
//! Every message is `[4-byte big-endian length][length bytes of payload]`.
//! [`FrameReader`] reassembles one message at a time from arbitrarily
//! fragmented socket reads; [`encode_frame`] produces the matching bytes on
//! the sending side.

/// number of bytes in the length prefix of every frame
const LENGTH_PREFIX_SIZE: usize = 4;

/// Incrementally reassembles one length-prefixed message from a stream of
/// raw byte chunks.
///
/// Each accepted connection owns exactly one `FrameReader`. The caller feeds
/// it successive `(buffer, valid_count)` pairs as they come off the socket;
/// the reader answers `None` until the message completes, then hands back the
/// payload and resets itself for the next message. It is strictly
/// single-message-in-flight: a call completes at most one message and stops
/// consuming there, so pipelined frames sharing a chunk are preserved — the
/// caller re-feeds the unconsumed remainder.
///
/// No limit is placed on the decoded length, so a hostile peer can force a
/// large allocation. This is a known, accepted limitation of the protocol.
#[derive(Debug, Default)]
pub struct FrameReader {
    // accumulates the 4 length-prefix bytes
    length_buf: [u8; LENGTH_PREFIX_SIZE],
    length_filled: usize,
    // payload accumulator, allocated once the length prefix is complete
    body: Option<Vec<u8>>,
    // decoded payload length, valid while `body` is Some
    expected: usize,
}

impl FrameReader {
    /// creates a reader waiting on the first byte of a length prefix
    pub fn new() -> Self {
        FrameReader::default()
    }

    /// Feeds the first `valid` bytes of `chunk` into the reader. Bytes beyond
    /// `valid` are stale buffer contents and are never touched.
    ///
    /// Returns the number of bytes consumed and, once the message's final
    /// byte arrives, the completed payload. Consumption stops at a message
    /// boundary: when fewer bytes were consumed than fed, the caller must
    /// feed the remainder again to start the next message.
    pub fn push(&mut self, chunk: &[u8], valid: usize) -> (usize, Option<Vec<u8>>) {
        let chunk = &chunk[..valid.min(chunk.len())];
        let mut pos = 0;

        if self.body.is_none() {
            while pos < chunk.len() && self.length_filled < LENGTH_PREFIX_SIZE {
                self.length_buf[self.length_filled] = chunk[pos];
                self.length_filled += 1;
                pos += 1;
            }
            if self.length_filled < LENGTH_PREFIX_SIZE {
                return (pos, None);
            }
            // length prefix just completed: allocate the payload accumulator
            // and fall through so leftover bytes of this chunk go into it
            self.expected = u32::from_be_bytes(self.length_buf) as usize;
            self.body = Some(Vec::with_capacity(self.expected));
        }

        let mut complete = false;
        if let Some(body) = self.body.as_mut() {
            let missing = self.expected - body.len();
            let take = missing.min(chunk.len() - pos);
            body.extend_from_slice(&chunk[pos..pos + take]);
            pos += take;
            complete = body.len() == self.expected;
        }

        if complete {
            let payload = self.body.take();
            self.length_filled = 0;
            self.expected = 0;
            return (pos, payload);
        }
        (pos, None)
    }
}

/// Prepends the 4-byte big-endian length prefix to `payload`, producing one
/// complete frame ready to be written to a socket.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_frame_in_one_chunk() {
        let frame = encode_frame(b"hello");
        let mut reader = FrameReader::new();
        assert_eq!(
            reader.push(&frame, frame.len()),
            (frame.len(), Some(b"hello".to_vec()))
        );
    }

    #[test]
    fn one_byte_at_a_time() {
        let frame = encode_frame(b"fragmented");
        let mut reader = FrameReader::new();
        for (i, byte) in frame.iter().enumerate() {
            let result = reader.push(&[*byte], 1);
            if i == frame.len() - 1 {
                assert_eq!(result, (1, Some(b"fragmented".to_vec())));
            } else {
                assert_eq!(result, (1, None), "spurious completion at byte {}", i);
            }
        }
    }

    #[test]
    fn every_split_point_yields_the_payload_exactly_once() {
        let frame = encode_frame(b"robin");
        for split in 1..frame.len() {
            let mut reader = FrameReader::new();
            let mut completions = Vec::new();
            if let (_, Some(p)) = reader.push(&frame[..split], split) {
                completions.push(p);
            }
            if let (_, Some(p)) = reader.push(&frame[split..], frame.len() - split) {
                completions.push(p);
            }
            assert_eq!(completions, vec![b"robin".to_vec()], "split at {}", split);
        }
    }

    #[test]
    fn chunk_ending_exactly_on_the_length_prefix_is_not_a_completion() {
        let frame = encode_frame(b"xy");
        let mut reader = FrameReader::new();
        assert_eq!(reader.push(&frame[..4], 4), (4, None));
        assert_eq!(reader.push(&frame[4..], 2), (2, Some(b"xy".to_vec())));
    }

    #[test]
    fn zero_length_payload_completes_immediately() {
        let frame = encode_frame(b"");
        assert_eq!(frame.len(), 4);
        let mut reader = FrameReader::new();
        assert_eq!(reader.push(&frame, 4), (4, Some(Vec::new())));
    }

    #[test]
    fn stale_bytes_beyond_valid_count_are_ignored() {
        let frame = encode_frame(b"ok");
        let mut buf = [0xee_u8; 16];
        buf[..frame.len()].copy_from_slice(&frame);
        let mut reader = FrameReader::new();
        // only the first `frame.len()` bytes are valid; the 0xee filler must not leak in
        assert_eq!(
            reader.push(&buf, frame.len()),
            (frame.len(), Some(b"ok".to_vec()))
        );
    }

    #[test]
    fn reader_resets_for_the_next_message() {
        let first = encode_frame(b"first");
        let second = encode_frame(b"second");
        let mut reader = FrameReader::new();
        assert_eq!(
            reader.push(&first, first.len()),
            (first.len(), Some(b"first".to_vec()))
        );
        assert_eq!(reader.push(&second[..3], 3), (3, None));
        assert_eq!(
            reader.push(&second[3..], second.len() - 3),
            (second.len() - 3, Some(b"second".to_vec()))
        );
    }

    #[test]
    fn consumption_stops_at_the_message_boundary() {
        let mut chunk = encode_frame(b"first");
        chunk.extend_from_slice(&encode_frame(b"second"));
        let mut reader = FrameReader::new();
        let (consumed, payload) = reader.push(&chunk, chunk.len());
        assert_eq!(consumed, encode_frame(b"first").len());
        assert_eq!(payload, Some(b"first".to_vec()));
    }

    #[test]
    fn pipelined_frames_in_one_chunk_are_both_recovered() {
        let mut chunk = encode_frame(b"first");
        chunk.extend_from_slice(&encode_frame(b"second"));
        let mut reader = FrameReader::new();
        let mut payloads = Vec::new();
        let mut offset = 0;
        while offset < chunk.len() {
            let (consumed, payload) = reader.push(&chunk[offset..], chunk.len() - offset);
            offset += consumed;
            if let Some(p) = payload {
                payloads.push(p);
            }
        }
        assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);
    }
}
