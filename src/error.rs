//! Error types for segment framing, message decoding and capture reading.
//!
//! Every variant here is fatal to a [`MessageStream`](crate::stream::MessageStream):
//! the data is static capture content, so nothing is retried.
use thiserror::Error;

/// Structural errors in the IEX-TP segment layer.
///
/// Once a segment is mis-framed no later byte offset in it can be trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("segment too short for header: need {need} bytes, got {got}")]
    HeaderTooShort { need: usize, got: usize },

    #[error("segment length mismatch: header declares {declared} payload bytes, datagram carries {actual}")]
    LengthMismatch { declared: u16, actual: usize },

    #[error("message {index} at offset {offset} overruns the payload boundary at {limit}")]
    FrameOverrun { index: u16, offset: usize, limit: usize },

    #[error("message {index} at offset {offset} has zero length")]
    EmptyFrame { index: u16, offset: usize },

    #[error("{remaining} trailing payload bytes after {count} messages (offset {offset})")]
    TrailingBytes { count: u16, offset: usize, remaining: usize },

    #[error("truncated read at offset {offset}: need {need} bytes, {available} available")]
    Truncated { offset: usize, need: usize, available: usize },
}

/// Errors raised while reading the capture file and unwrapping datagrams.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unrecognized capture file magic {0:#010x}")]
    UnknownFormat(u32),

    #[error("capture truncated while reading {context}")]
    Truncated { context: &'static str },

    #[error("unsupported link type {0}")]
    UnsupportedLinkType(u32),

    #[error("packet {packet} references unknown interface {interface}")]
    UnknownInterface { packet: u64, interface: u32 },

    #[error("packet {packet} is not IP (ethertype {ethertype:#06x})")]
    NotIp { packet: u64, ethertype: u16 },

    #[error("packet {packet} is not UDP (ip protocol {protocol})")]
    NotUdp { packet: u64, protocol: u8 },

    #[error("packet {packet} is an IPv4 fragment")]
    Fragmented { packet: u64 },

    #[error("packet {packet} is malformed: {source}")]
    Malformed {
        packet: u64,
        #[source]
        source: etherparse::err::packet::SliceError,
    },

    #[error("capture container is malformed after packet {packet}: {detail}")]
    Container { packet: u64, detail: String },

    #[error("capture record exceeds the {max} byte read buffer")]
    Oversized { max: usize },
}

/// Any error surfaced by the decoder or the streaming pipeline.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("unknown message type {tag:#04x}")]
    UnknownMessageType { tag: u8 },

    #[error("unrecognized {field} code {code:#04x}")]
    UnrecognizedCode { field: &'static str, code: u8 },

    #[error("{kind} message body must be {expected} bytes, got {actual}")]
    MessageLength { kind: &'static str, expected: usize, actual: usize },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("producer thread panicked")]
    ProducerPanicked,
}

impl ParseError {
    /// Short stable name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::Framing(_) => "framing",
            ParseError::UnknownMessageType { .. } => "unknown_message_type",
            ParseError::UnrecognizedCode { .. } => "unrecognized_code",
            ParseError::MessageLength { .. } => "message_length",
            ParseError::Capture(_) => "capture",
            ParseError::ProducerPanicked => "producer_panicked",
        }
    }
}
