//! Frame decoding for the streaming response body.
//!
//! The backend's stream is SSE-shaped but not SSE-compliant: every unit is a
//! single `data: <json>` line terminated by a blank line, with no `event:`,
//! `id:`, or `retry:` fields. The decoder therefore splits the decoded text
//! on the `\n\n` delimiter and treats anything not starting with `data: ` as
//! a keep-alive to be dropped.

use tracing::debug;

/// Literal prefix a frame must carry to be delivered to the parser.
pub const DATA_PREFIX: &str = "data: ";

/// Delimiter between frames in the byte stream.
pub const FRAME_DELIMITER: &str = "\n\n";

/// Incremental UTF-8 decoder.
///
/// A multi-byte scalar may be split across chunk boundaries; the trailing
/// incomplete sequence is held back and prepended to the next chunk. Invalid
/// sequences decode to U+FFFD and decoding continues.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, carrying any incomplete trailing sequence over to the
    /// next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid_len) => {
                            out.push('\u{FFFD}');
                            rest = &tail[invalid_len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk.
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        out
    }

    /// Flush at end of stream. An incomplete trailing sequence decodes to
    /// U+FFFD, matching a streaming text decoder's final flush.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }
}

/// Stateful decoder turning byte chunks into complete `data: ` frames.
///
/// Complete frames are everything up to the last delimiter seen so far; the
/// final, possibly-partial fragment stays buffered until more bytes arrive.
/// On stream end the remaining buffer is discarded: a missing trailing
/// delimiter is expected, not an error.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    utf8: Utf8Decoder,
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes, returning every complete data frame it
    /// finishes. Non-data frames are dropped here and never reach the parser.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(chunk);
        self.buffer.push_str(&text);
        self.drain_complete_frames()
    }

    /// Signal end of stream, discarding any residual partial frame.
    pub fn finish(&mut self) {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        if !self.buffer.is_empty() {
            debug!(
                residual_len = self.buffer.len(),
                "discarding incomplete trailing frame at end of stream"
            );
            self.buffer.clear();
        }
    }

    fn drain_complete_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find(FRAME_DELIMITER) {
            let frame: String = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + FRAME_DELIMITER.len());
            if frame.starts_with(DATA_PREFIX) {
                frames.push(frame);
            } else if !frame.is_empty() {
                debug!(frame = %frame, "dropping non-data frame");
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"type\":\"text\",\"content\":\"hi\"}\n\n");
        assert_eq!(frames, vec!["data: {\"type\":\"text\",\"content\":\"hi\"}"]);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":").is_empty());
        assert!(decoder.push(b"\"text\",\"content\":\"hi\"}").is_empty());
        let frames = decoder.push(b"\n\n");
        assert_eq!(frames, vec!["data: {\"type\":\"text\",\"content\":\"hi\"}"]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(frames, vec!["data: {\"a\":1}", "data: {\"b\":2}"]);
    }

    #[test]
    fn test_partial_tail_is_retained() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\"");
        assert_eq!(frames, vec!["data: {\"a\":1}"]);
        let frames = decoder.push(b":2}\n\n");
        assert_eq!(frames, vec!["data: {\"b\":2}"]);
    }

    #[test]
    fn test_non_data_frame_is_dropped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b": keep-alive\n\ndata: {\"a\":1}\n\n");
        assert_eq!(frames, vec!["data: {\"a\":1}"]);
    }

    #[test]
    fn test_empty_frames_are_dropped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"\n\n\n\ndata: {\"a\":1}\n\n");
        assert_eq!(frames, vec!["data: {\"a\":1}"]);
    }

    #[test]
    fn test_residual_discarded_on_finish() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"never\":\"terminated\"}").is_empty());
        decoder.finish();
        // Buffer must be gone; pushing a fresh frame afterwards still works.
        let frames = decoder.push(b"data: {\"a\":1}\n\n");
        assert_eq!(frames, vec!["data: {\"a\":1}"]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        // "é" is 0xC3 0xA9; split it between two chunks.
        let full = "data: {\"type\":\"text\",\"content\":\"caf\u{e9}\"}\n\n".as_bytes();
        let split_at = full
            .iter()
            .position(|&b| b == 0xC3)
            .expect("multibyte lead byte present")
            + 1;
        let mut frames = decoder.push(&full[..split_at]);
        frames.extend(decoder.push(&full[split_at..]));
        assert_eq!(
            frames,
            vec!["data: {\"type\":\"text\",\"content\":\"caf\u{e9}\"}"]
        );
    }

    #[test]
    fn test_chunking_invariance() {
        // Decoding in one pass or byte-by-byte yields the same frames.
        let stream = "data: {\"type\":\"text\",\"content\":\"H\u{e9}llo\"}\n\n: ping\n\ndata: {\"type\":\"end\"}\n\n"
            .as_bytes();

        let mut one_pass = FrameDecoder::new();
        let all_at_once = one_pass.push(stream);

        let mut byte_wise = FrameDecoder::new();
        let mut fragmented = Vec::new();
        for byte in stream {
            fragmented.extend(byte_wise.push(std::slice::from_ref(byte)));
        }

        assert_eq!(all_at_once, fragmented);
        assert_eq!(all_at_once.len(), 2);
    }

    #[test]
    fn test_utf8_decoder_invalid_byte_becomes_replacement() {
        let mut decoder = Utf8Decoder::new();
        let out = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_decoder_holds_incomplete_sequence() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xE2, 0x82]), "");
        assert_eq!(decoder.decode(&[0xAC]), "\u{20ac}");
    }

    #[test]
    fn test_utf8_decoder_finish_flushes_incomplete_tail() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xE2]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }
}
