//! Producer/consumer pipeline from a capture source to decoded messages.
//!
//! A [`Parser`] owns a capture source and a configuration. Starting it spawns
//! one producer thread that reads datagrams, decodes segments and messages in
//! capture order, and publishes each result into a bounded channel. The
//! returned [`MessageStream`] is an iterator draining that channel.
//!
//! - End of stream is the channel disconnecting when the producer drops its
//!   sender; no in-band sentinel is ever sent.
//! - A full channel blocks the producer, bounding memory to roughly
//!   `queue_capacity` records.
//! - Cancellation is cooperative: the token is checked before every segment
//!   read, after every published record, and while a publish waits on a full
//!   channel. Records already queued stay drainable; the remainder of an
//!   in-flight segment is discarded.
//! - On a fatal error the capture source is dropped first, then the error is
//!   published as the final item and the producer exits. If cancellation wins
//!   the race for a full channel, the error is dropped with the rest of the
//!   stream and the end reason is `Cancelled`.
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvError, SendTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::error::ParseError;
use crate::message::{Message, Protocol};
use crate::segment::decode_segment;
use crate::source::PayloadSource;

/// Default channel capacity between producer and consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 25_000;

/// Default interval at which a blocked publish re-checks cancellation.
pub const DEFAULT_CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Selects the message dispatch table.
    pub protocol: Protocol,
    pub queue_capacity: NonZeroUsize,
    pub cancel_poll_interval: Duration,
}

impl StreamConfig {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            queue_capacity: NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.cancel_poll_interval = interval;
        self
    }
}

/// Cloneable stop signal shared between the owner and the producer.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a stream terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The capture source ran out of datagrams.
    Exhausted,
    /// The cancellation token was set, or the consumer went away. A fatal
    /// error that could not be queued before cancellation also ends here.
    Cancelled,
    /// A fatal error was delivered to the consumer.
    Failed,
}

/// A capture source paired with its configuration, not yet running.
pub struct Parser<S> {
    source: S,
    config: StreamConfig,
    cancel: CancellationToken,
}

impl<S: PayloadSource + 'static> Parser<S> {
    pub fn new(source: S, config: StreamConfig) -> Self {
        Self { source, config, cancel: CancellationToken::new() }
    }

    /// Use an externally owned stop signal instead of a fresh one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Spawn the producer thread and return the consumer side.
    pub fn start(self) -> std::io::Result<MessageStream> {
        let (tx, rx) = bounded(self.config.queue_capacity.get());
        let producer = Producer {
            source: Some(self.source),
            protocol: self.config.protocol,
            tx,
            cancel: self.cancel.clone(),
            poll: self.config.cancel_poll_interval,
            segments: 0,
            records: 0,
        };
        let handle = thread::Builder::new()
            .name("iex-producer".into())
            .spawn(move || producer.run())?;
        debug!(protocol = %self.config.protocol, capacity = self.config.queue_capacity.get(), "producer started");
        Ok(MessageStream { rx, cancel: self.cancel, producer: Some(handle), end: None })
    }
}

enum Publish {
    Sent,
    Cancelled,
    Disconnected,
}

struct Producer<S> {
    /// Taken and dropped before a fatal error is published.
    source: Option<S>,
    protocol: Protocol,
    tx: Sender<Result<Message, ParseError>>,
    cancel: CancellationToken,
    poll: Duration,
    segments: u64,
    records: u64,
}

impl<S: PayloadSource> Producer<S> {
    /// Runs until the source is exhausted, cancellation, the consumer
    /// disconnecting, or the first fatal error. Consumes `self`, so the
    /// source and the sender are dropped on every return path.
    fn run(mut self) -> StreamEnd {
        let end = self.pump();
        debug!(segments = self.segments, records = self.records, end = ?end, "producer finished");
        end
    }

    fn pump(&mut self) -> StreamEnd {
        loop {
            if self.cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }
            let Some(source) = self.source.as_mut() else {
                return StreamEnd::Exhausted;
            };
            let payload = match source.next_payload() {
                Ok(Some(payload)) => payload,
                Ok(None) => return StreamEnd::Exhausted,
                Err(e) => return self.fail(e.into()),
            };
            self.segments += 1;
            if let Some(end) = self.decode_and_publish(&payload) {
                return end;
            }
        }
    }

    /// Returns `Some` when the stream must stop.
    fn decode_and_publish(&mut self, payload: &[u8]) -> Option<StreamEnd> {
        let (header, frames) = match decode_segment(payload) {
            Ok(decoded) => decoded,
            Err(e) => return Some(self.fail(e.into())),
        };
        for frame in &frames {
            let msg = match Message::decode_frame(self.protocol, frame) {
                Ok(msg) => msg,
                Err(e) => {
                    error!(
                        segment = self.segments,
                        sequence = header.first_message_sequence_number,
                        offset = frame.offset(),
                        tag = frame.tag(),
                        "message decode failed"
                    );
                    return Some(self.fail(e));
                }
            };
            match self.publish(Ok(msg)) {
                Publish::Sent => self.records += 1,
                Publish::Cancelled | Publish::Disconnected => return Some(StreamEnd::Cancelled),
            }
            if self.cancel.is_cancelled() {
                return Some(StreamEnd::Cancelled);
            }
        }
        None
    }

    fn fail(&mut self, e: ParseError) -> StreamEnd {
        warn!(segment = self.segments, kind = e.kind(), error = %e, "stream failed");
        drop(self.source.take());
        match self.publish(Err(e)) {
            Publish::Sent => StreamEnd::Failed,
            Publish::Cancelled | Publish::Disconnected => StreamEnd::Cancelled,
        }
    }

    fn publish(&self, item: Result<Message, ParseError>) -> Publish {
        let mut item = item;
        loop {
            match self.tx.send_timeout(item, self.poll) {
                Ok(()) => return Publish::Sent,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.cancel.is_cancelled() {
                        return Publish::Cancelled;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Publish::Disconnected,
            }
        }
    }
}

/// Consumer side of a running pipeline.
///
/// Yields `Ok(message)` in capture order, at most one `Err` (after which the
/// stream ends), then `None`. Dropping the stream cancels and joins the
/// producer.
pub struct MessageStream {
    rx: Receiver<Result<Message, ParseError>>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<StreamEnd>>,
    end: Option<StreamEnd>,
}

impl MessageStream {
    /// Ask the producer to stop. Already queued records can still be pulled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Records currently buffered in the channel.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// `None` while the stream is still running.
    pub fn end_reason(&self) -> Option<StreamEnd> {
        self.end
    }

    /// Join the producer once the channel is closed.
    fn finish(&mut self) -> Option<ParseError> {
        let handle = self.producer.take()?;
        match handle.join() {
            Ok(end) => {
                self.end = Some(end);
                None
            }
            Err(_) => {
                self.end = Some(StreamEnd::Failed);
                Some(ParseError::ProducerPanicked)
            }
        }
    }
}

impl Iterator for MessageStream {
    type Item = Result<Message, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        match self.rx.recv() {
            Ok(item) => Some(item),
            Err(RecvError) => self.finish().map(Err),
        }
    }
}

impl std::iter::FusedIterator for MessageStream {}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if self.producer.is_some() {
            self.cancel.cancel();
            // The producer notices within one poll interval or one segment.
            let _ = self.finish();
        }
    }
}
