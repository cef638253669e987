//! IEX DEEP/TOPS capture decoder.
//!
//! This crate turns IEX-TP capture files into typed market data messages:
//!
//! - `segment`: IEX-TP segment header and message framing
//! - `message`: per-kind message decoding for DEEP 1.0 and TOPS 1.5/1.6
//! - `codes`, `convert`: coded fields, flag sets and wire primitives
//! - `pcap`, `packet`, `source`: capture reading down to UDP payloads
//! - `stream`: producer thread, bounded queue and cancellable consumer
//!   iterator
//!
//! The `iex_to_json` binary (`src/main.rs`) uses these modules to export a
//! capture as JSON lines.
pub mod codes;
pub mod convert;
pub mod error;
pub mod message;
pub mod packet;
pub mod pcap;
pub mod segment;
pub mod source;
pub mod stream;

pub use error::{CaptureError, FramingError, ParseError};
pub use message::{decode_message, Message, Protocol};
pub use pcap::PcapReader;
pub use segment::{decode_segment, Frame, SegmentHeader};
pub use source::{MemorySource, PayloadSource};
pub use stream::{CancellationToken, MessageStream, Parser, StreamConfig, StreamEnd};
