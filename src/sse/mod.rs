//! Stream protocol layer: frame decoding and event parsing.
//!
//! The backend streams an SSE-shaped body over HTTP POST where every unit is
//! `data: <json>\n\n`. This module owns the two protocol stages:
//! - `decoder` - raw byte chunks into complete data frames
//! - `event` - one frame into one typed [`StreamEvent`]

mod decoder;
mod event;

pub use decoder::{FrameDecoder, Utf8Decoder, DATA_PREFIX, FRAME_DELIMITER};
pub use event::{parse_data_frame, SourceDocument, SourceDocumentMeta, StreamEvent};
