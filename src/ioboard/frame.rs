//! Byte framing of the IO board protocol.
//!
//! `START code payload checksum END`, where the checksum is the low byte of the sum
//! of code and payload. Any of code, payload or checksum that equals a marker byte is
//! prefixed with `ESCAPE`.

use crate::{Error, Result};

pub const START: u8 = 0xFF;
pub const ESCAPE: u8 = 0x33;
pub const END: u8 = 0xCC;

/// Smallest well-formed frame: start, code, checksum, end.
pub const MIN_FRAME_LEN: usize = 4;

pub fn is_reserved(byte: u8) -> bool {
    matches!(byte, START | ESCAPE | END)
}

pub fn checksum(code: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(code, |acc, byte| acc.wrapping_add(*byte))
}

pub fn encode(code: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() * 2 + 6);
    out.push(START);
    push_escaped(&mut out, code);
    for byte in payload {
        push_escaped(&mut out, *byte);
    }
    push_escaped(&mut out, checksum(code, payload));
    out.push(END);
    out
}

fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    if is_reserved(byte) {
        out.push(ESCAPE);
    }
    out.push(byte);
}

/// A frame with its checksum verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub code: u8,
    pub payload: Vec<u8>,
}

/// Incremental decoder fed with bytes as they arrive.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte. Returns a result once a complete frame has been seen.
    pub fn push(&mut self, byte: u8) -> Option<Result<RawFrame>> {
        if self.buf.is_empty() && byte != START {
            return None;
        }
        self.buf.push(byte);
        if byte != END || self.buf.len() < MIN_FRAME_LEN {
            return None;
        }
        // An END preceded by an odd run of escapes is data.
        let escapes = self.buf[..self.buf.len() - 1]
            .iter()
            .rev()
            .take_while(|b| **b == ESCAPE)
            .count();
        if escapes % 2 == 1 {
            return None;
        }
        let frame = std::mem::take(&mut self.buf);
        Some(decode_frame(&frame))
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Decodes one complete frame, start and end markers included.
pub fn decode_frame(frame: &[u8]) -> Result<RawFrame> {
    if frame.len() < MIN_FRAME_LEN || frame[0] != START || frame[frame.len() - 1] != END {
        return Err(Error::Framing(format!("malformed frame {frame:02X?}")));
    }
    let mut body = Vec::with_capacity(frame.len());
    let mut iter = frame[1..frame.len() - 1].iter();
    while let Some(byte) = iter.next() {
        if *byte == ESCAPE {
            match iter.next() {
                Some(escaped) => body.push(*escaped),
                None => return Err(Error::Framing("dangling escape".into())),
            }
        } else {
            body.push(*byte);
        }
    }
    let Some(received) = body.pop() else {
        return Err(Error::Framing("empty frame".into()));
    };
    let Some((&code, payload)) = body.split_first() else {
        return Err(Error::Framing("frame without code".into()));
    };
    if checksum(code, payload) != received {
        return Err(Error::ChecksumMismatch);
    }
    Ok(RawFrame {
        code,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Result<RawFrame>> {
        let mut decoder = FrameDecoder::new();
        bytes.iter().filter_map(|b| decoder.push(*b)).collect()
    }

    #[test]
    fn gpio_write_frame_layout() {
        assert_eq!(encode(5, &[50, 1]), vec![START, 5, 50, 1, 56, END]);
    }

    #[test]
    fn reserved_bytes_are_escaped() {
        let encoded = encode(5, &[0xFF, 0x33, 0xCC]);
        assert_eq!(
            encoded,
            vec![START, 5, ESCAPE, 0xFF, ESCAPE, 0x33, ESCAPE, 0xCC, 0x03, END]
        );
        let frames = decode_all(&encoded);
        assert_eq!(frames.len(), 1);
        let frame = frames.into_iter().next().unwrap().unwrap();
        assert_eq!(frame.code, 5);
        assert_eq!(frame.payload, vec![0xFF, 0x33, 0xCC]);
    }

    #[test]
    fn checksum_that_needs_escaping() {
        // 0x00 + 0xCC sums to the end marker.
        let encoded = encode(0, &[0xCC]);
        assert_eq!(encoded, vec![START, 0, ESCAPE, 0xCC, ESCAPE, 0xCC, END]);
        let frame = decode_all(&encoded).remove(0).unwrap();
        assert_eq!(frame.payload, vec![0xCC]);
    }

    #[test]
    fn leading_noise_is_skipped() {
        let mut bytes = vec![0x01, 0x02, END];
        bytes.extend(encode(0, &[0xFF]));
        let frame = decode_all(&bytes).remove(0).unwrap();
        assert_eq!(frame, RawFrame { code: 0, payload: vec![0xFF] });
    }

    #[test]
    fn single_byte_corruption_is_detected() {
        let encoded = encode(5, &[12, 0x33, 200, 7]);
        let mut escaped_next = false;
        for index in 1..encoded.len() - 1 {
            if escaped_next {
                escaped_next = false;
            } else if encoded[index] == ESCAPE {
                escaped_next = true;
                continue;
            }
            let mut corrupted = encoded.clone();
            let replacement = [0x01u8, 0x02, 0x04]
                .iter()
                .map(|mask| encoded[index] ^ mask)
                .find(|candidate| !is_reserved(*candidate))
                .unwrap();
            corrupted[index] = replacement;
            let decoded = decode_all(&corrupted);
            assert_eq!(decoded.len(), 1, "index {index}");
            assert!(
                matches!(decoded[0], Err(Error::ChecksumMismatch)),
                "index {index}"
            );
        }
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(matches!(decode_frame(&[START, END]), Err(Error::Framing(_))));
        assert!(matches!(
            decode_frame(&[START, 5, ESCAPE]),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let mut bytes = encode(0, &[0xFF]);
        bytes.extend(encode(5, &[1]));
        let frames: Vec<RawFrame> = decode_all(&bytes).into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].code, 5);
    }
}
