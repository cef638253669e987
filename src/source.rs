//! The capture-source contract consumed by the streaming pipeline.
use std::collections::VecDeque;

use crate::error::CaptureError;

/// Yields one transport segment (a UDP payload) at a time.
///
/// The pipeline moves the source onto its producer thread and drops it when
/// the stream ends, whatever the reason, so `Drop` is the release hook.
pub trait PayloadSource: Send {
    /// Next datagram payload, or `None` once the capture is exhausted.
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;
}

impl<S: PayloadSource + ?Sized> PayloadSource for Box<S> {
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        (**self).next_payload()
    }
}

/// Datagram payloads held in memory, mostly useful for tests and replays of
/// already-extracted segments.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    payloads: VecDeque<Vec<u8>>,
}

impl MemorySource {
    pub fn new<I>(payloads: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self { payloads: payloads.into_iter().collect() }
    }

    pub fn push(&mut self, payload: Vec<u8>) {
        self.payloads.push_back(payload);
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl PayloadSource for MemorySource {
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        Ok(self.payloads.pop_front())
    }
}
