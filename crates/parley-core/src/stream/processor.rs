//! Stream processor
//!
//! Consumes an upstream item stream for one message, keeps the message sink
//! current while tokens arrive, and publishes lifecycle events. Exactly one
//! consumer may be attached to a message id at a time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{ChatMessage, MessageId, MessageSink, StreamCancellation, StreamItem, StreamSession};
use crate::bus::{EventBus, EventPayload};
use crate::config::ConfigHandle;
use crate::error::ProviderError;
use crate::parser::{ParsedSections, ResponseParser};

const SOURCE: &str = "stream_processor";

/// How a call to [`StreamProcessor::process_stream`] ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed {
        content: String,
        chunk_count: usize,
        /// Present when section parsing is enabled
        sections: Option<ParsedSections>,
    },
    Failed {
        /// Partial content followed by the error text
        content: String,
        error: ProviderError,
    },
    /// Another stream is already attached to this message id; nothing was done
    AlreadyInFlight,
}

impl StreamOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }
}

type InFlight = Arc<Mutex<HashSet<MessageId>>>;

/// A session holding its message id in the in-flight set
///
/// Finalization runs once: either explicitly through [`ActiveStream::finalize`]
/// or, when the processing future is dropped mid-stream, on drop with the
/// content received so far and `success = false`.
struct ActiveStream {
    session: StreamSession,
    in_flight: InFlight,
    sink: Arc<dyn MessageSink>,
    bus: EventBus,
    finalized: bool,
}

impl ActiveStream {
    fn acquire(processor: &StreamProcessor, message_id: MessageId, tag: &str) -> Option<Self> {
        if !processor.in_flight.lock().insert(message_id) {
            return None;
        }
        Some(Self {
            session: StreamSession::new(message_id, tag),
            in_flight: Arc::clone(&processor.in_flight),
            sink: Arc::clone(&processor.sink),
            bus: processor.bus.clone(),
            finalized: false,
        })
    }

    /// Final sink write, in-flight release and completion event, in that order
    fn finalize(&mut self, content: &str, success: bool) {
        self.finalized = true;
        publish_final(
            &self.session,
            &self.in_flight,
            self.sink.as_ref(),
            &self.bus,
            content,
            success,
        );
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        warn!(
            "Stream for message {} abandoned after {} chunks",
            self.session.message_id, self.session.chunk_count
        );
        publish_final(
            &self.session,
            &self.in_flight,
            self.sink.as_ref(),
            &self.bus,
            &self.session.content,
            false,
        );
    }
}

fn publish_final(
    session: &StreamSession,
    in_flight: &InFlight,
    sink: &dyn MessageSink,
    bus: &EventBus,
    content: &str,
    success: bool,
) {
    let message_id = session.message_id;
    if !sink.update(message_id, content, false) {
        warn!("Message {} no longer in sink, final content dropped", message_id);
    }
    in_flight.lock().remove(&message_id);

    bus.emit(
        SOURCE,
        EventPayload::StreamCompleted {
            message_id,
            tag: session.tag.clone(),
            success,
            content_length: content.len(),
        },
    );
    info!(
        "Stream for message {} finished: success={}, {} chunks, {} bytes in {:?}",
        message_id,
        success,
        session.chunk_count,
        content.len(),
        session.elapsed()
    );
}

#[derive(Clone)]
pub struct StreamProcessor {
    bus: EventBus,
    config: ConfigHandle,
    sink: Arc<dyn MessageSink>,
    in_flight: InFlight,
}

impl StreamProcessor {
    pub fn new(bus: EventBus, sink: Arc<dyn MessageSink>) -> Self {
        let config = bus.config().clone();
        Self {
            bus,
            config,
            sink,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_in_flight(&self, id: MessageId) -> bool {
        self.in_flight.lock().contains(&id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Consume `stream` into the message `message_id`
    pub async fn process_stream<S>(
        &self,
        stream: S,
        message_id: MessageId,
        tag: &str,
    ) -> StreamOutcome
    where
        S: Stream<Item = StreamItem>,
    {
        self.run(stream, message_id, tag, None).await
    }

    /// Like [`process_stream`](Self::process_stream), but watches a child of
    /// `cancellation` and stops with a `Streaming("cancelled")` failure once
    /// it fires
    pub async fn process_stream_with_cancel<S>(
        &self,
        stream: S,
        message_id: MessageId,
        tag: &str,
        cancellation: &StreamCancellation,
    ) -> StreamOutcome
    where
        S: Stream<Item = StreamItem>,
    {
        self.run(stream, message_id, tag, Some(cancellation.child_token()))
            .await
    }

    async fn run<S>(
        &self,
        stream: S,
        message_id: MessageId,
        tag: &str,
        cancel: Option<CancellationToken>,
    ) -> StreamOutcome
    where
        S: Stream<Item = StreamItem>,
    {
        let Some(mut active) = ActiveStream::acquire(self, message_id, tag) else {
            debug!("Stream for message {} already in flight, ignoring", message_id);
            return StreamOutcome::AlreadyInFlight;
        };

        if self.sink.get(message_id).is_none() {
            self.sink.append(ChatMessage::streaming(message_id));
        }

        self.bus.emit(
            SOURCE,
            EventPayload::StreamStarted {
                message_id,
                tag: tag.to_string(),
            },
        );
        info!("Stream started for message {} ({})", message_id, tag);

        let mut parser = self.config.read(|c| c.stream.parse_sections).then(|| {
            ResponseParser::new(self.bus.clone())
                .with_source(format!("response_parser:{}", message_id))
        });

        futures::pin_mut!(stream);

        let result = loop {
            let idle_timeout = self.config.read(|c| c.stream.idle_timeout_ms);
            let item = match next_item(&mut stream, idle_timeout, cancel.as_ref()).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    warn!(
                        "Stream for message {} ended without a done marker after {} chunks",
                        message_id, active.session.chunk_count
                    );
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            match item {
                StreamItem::Content { text } => {
                    let session = &mut active.session;
                    session.push(&text);
                    self.sink.update(message_id, &session.content, true);
                    if let Some(parser) = parser.as_mut() {
                        parser.feed(&text);
                    }

                    let batch = self.config.read(|c| c.stream.progress_batch);
                    if session.at_progress_boundary(batch) {
                        self.bus.emit(
                            SOURCE,
                            EventPayload::StreamProgress {
                                message_id,
                                chunk_count: session.chunk_count,
                                content_length: session.content.len(),
                            },
                        );
                    }
                }
                StreamItem::Done => break Ok(()),
                StreamItem::Error { error } => break Err(error),
                StreamItem::Metadata { data } => {
                    trace!("Metadata for message {}: {}", message_id, data);
                }
            }
        };

        finish(active, parser, result)
    }
}

/// Build the outcome and finalize the session with it
fn finish(
    mut active: ActiveStream,
    parser: Option<ResponseParser>,
    result: Result<(), ProviderError>,
) -> StreamOutcome {
    let chunk_count = active.session.chunk_count;
    let received = std::mem::take(&mut active.session.content);

    match result {
        Ok(()) => {
            let sections = parser.and_then(|mut p| p.complete());
            active.finalize(&received, true);
            StreamOutcome::Completed {
                content: received,
                chunk_count,
                sections,
            }
        }
        Err(error) => {
            let text = error.user_message();
            let content = if received.is_empty() {
                text
            } else {
                format!("{}\n\n{}", received, text)
            };
            warn!(
                "Stream for message {} failed: {}",
                active.session.message_id, error
            );
            active.finalize(&content, false);
            StreamOutcome::Failed { content, error }
        }
    }
}

/// Next item, bounded by the idle timeout and the cancellation token
async fn next_item<S>(
    stream: &mut S,
    idle_timeout_ms: Option<u64>,
    cancel: Option<&CancellationToken>,
) -> Result<Option<StreamItem>, ProviderError>
where
    S: Stream<Item = StreamItem> + Unpin,
{
    let next = async {
        match idle_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), stream.next())
                .await
                .map_err(|_| ProviderError::Timeout),
            None => Ok(stream.next().await),
        }
    };

    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(ProviderError::Streaming("cancelled".to_string())),
            item = next => item,
        },
        None => next.await,
    }
}
