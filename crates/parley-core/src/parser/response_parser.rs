//! Streaming section scanner
//!
//! Splits an incrementally delivered response into the user-facing section
//! and the machine trim section. Markers may arrive split across chunks, so
//! detection always runs over the accumulated buffer, and the buffer is only
//! cut once a marker match has consumed everything up to its end.

use tracing::{debug, info, warn};

use super::scan::{ceil_boundary, find_from, partial_marker_suffix, resume_from};
use crate::bus::{EventBus, EventPayload};
use crate::config::{ConfigHandle, ParserConfig};

const DEFAULT_SOURCE: &str = "response_parser";

/// Scanner position in the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    WaitingForMarker,
    ParsingNormal,
    ParsingMachineTrim,
}

/// Outcome of the machine trim section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimSection {
    /// No trim marker was seen
    Absent,
    /// Trim content carrying new information
    Content(String),
    /// Trim content was empty once inferable markers were stripped
    FullyInferable,
}

/// Both sections of a completed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSections {
    pub normal: String,
    pub trim: TrimSection,
}

/// Stateful scanner fed one chunk at a time
///
/// Only marker detection or [`ResponseParser::complete`] changes state;
/// [`ResponseParser::reset`] is required before reuse.
pub struct ResponseParser {
    bus: EventBus,
    config: ConfigHandle,
    source: String,
    state: ParserState,
    buffer: String,
    /// Bytes of `buffer` already searched for markers
    scanned: usize,
    /// Bytes of `buffer` already published as live tokens
    live_emitted: usize,
    normal: Option<String>,
    completed: bool,
}

impl ResponseParser {
    pub fn new(bus: EventBus) -> Self {
        let config = bus.config().clone();
        Self {
            bus,
            config,
            source: DEFAULT_SOURCE.to_string(),
            state: ParserState::WaitingForMarker,
            buffer: String::new(),
            scanned: 0,
            live_emitted: 0,
            normal: None,
            completed: false,
        }
    }

    /// Label published as the source of every event
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Bytes currently held back in the scan buffer
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed the next chunk of the response
    pub fn feed(&mut self, chunk: &str) {
        if self.completed {
            self.report_error("chunk fed after complete(); call reset() before reuse");
            return;
        }
        if chunk.is_empty() {
            return;
        }

        let markers = self.config.read(|c| c.parser.clone());
        self.buffer.push_str(chunk);
        self.advance(&markers);
    }

    /// Flush whatever is buffered and publish the closing event for the current section
    ///
    /// Returns `None` (and publishes a parsing error) if already completed.
    pub fn complete(&mut self) -> Option<ParsedSections> {
        if self.completed {
            self.report_error("complete() called twice; call reset() before reuse");
            return None;
        }
        self.completed = true;

        let markers = self.config.read(|c| c.parser.clone());
        let buffer = std::mem::take(&mut self.buffer);

        let sections = match self.state {
            ParserState::WaitingForMarker => {
                debug!("No markers seen, treating whole response as normal");
                let normal = buffer.trim().to_string();
                self.finish_normal(normal.clone());
                ParsedSections {
                    normal,
                    trim: TrimSection::Absent,
                }
            }
            ParserState::ParsingNormal => {
                if buffer.len() > self.live_emitted {
                    self.emit(EventPayload::NormalToken {
                        token: buffer[self.live_emitted..].to_string(),
                    });
                }
                let normal = buffer.trim().to_string();
                self.finish_normal(normal.clone());
                ParsedSections {
                    normal,
                    trim: TrimSection::Absent,
                }
            }
            ParserState::ParsingMachineTrim => {
                let stripped = buffer.replace(markers.inferable_marker.as_str(), "");
                let content = stripped.trim();
                let trim = if content.is_empty() {
                    info!("Machine trim is fully inferable");
                    self.emit(EventPayload::FullyInferableResponse);
                    TrimSection::FullyInferable
                } else {
                    info!("Machine trim complete ({} bytes)", content.len());
                    self.emit(EventPayload::MachineTrimComplete {
                        content: content.to_string(),
                    });
                    TrimSection::Content(content.to_string())
                };
                ParsedSections {
                    normal: self.normal.clone().unwrap_or_default(),
                    trim,
                }
            }
        };

        self.scanned = 0;
        self.live_emitted = 0;
        Some(sections)
    }

    /// Back to `WaitingForMarker` with empty buffers
    pub fn reset(&mut self) {
        self.state = ParserState::WaitingForMarker;
        self.buffer.clear();
        self.scanned = 0;
        self.live_emitted = 0;
        self.normal = None;
        self.completed = false;
    }

    fn advance(&mut self, markers: &ParserConfig) {
        loop {
            match self.state {
                ParserState::WaitingForMarker => {
                    if !self.scan_for_opening_marker(markers) {
                        self.scanned = self.buffer.len();
                        self.enforce_cap(markers);
                        return;
                    }
                }
                ParserState::ParsingNormal => {
                    if !self.scan_for_trim_marker(markers) {
                        self.scanned = self.buffer.len();
                        self.emit_live(&markers.machine_trim_marker);
                        return;
                    }
                }
                ParserState::ParsingMachineTrim => {
                    self.scanned = self.buffer.len();
                    return;
                }
            }
        }
    }

    /// Look for the normal marker, or a trim marker that skips the normal one.
    /// Returns true if a transition happened.
    fn scan_for_opening_marker(&mut self, markers: &ParserConfig) -> bool {
        let normal_marker = markers.normal_marker.as_str();
        let trim_marker = markers.machine_trim_marker.as_str();

        let normal_at = find_from(
            &self.buffer,
            normal_marker,
            resume_from(&self.buffer, self.scanned, normal_marker.len()),
        );
        let trim_at = find_from(
            &self.buffer,
            trim_marker,
            resume_from(&self.buffer, self.scanned, trim_marker.len()),
        );

        match (normal_at, trim_at) {
            (Some(at), Some(trim_at)) if trim_at < at => {
                self.skip_to_trim(trim_at, trim_marker.len());
                true
            }
            (Some(at), _) => {
                if at > 0 {
                    debug!("Discarding {} bytes before normal marker", at);
                }
                self.buffer.drain(..at + normal_marker.len());
                self.enter(ParserState::ParsingNormal);
                info!("Normal response marker detected");
                true
            }
            (None, Some(at)) => {
                self.skip_to_trim(at, trim_marker.len());
                true
            }
            (None, None) => false,
        }
    }

    /// Trim marker seen while still waiting: the text before it becomes the normal section
    fn skip_to_trim(&mut self, at: usize, marker_len: usize) {
        warn!("Machine trim marker arrived before normal marker");
        let normal = self.buffer[..at].trim().to_string();
        self.buffer.drain(..at + marker_len);
        self.finish_normal(normal);
        self.enter(ParserState::ParsingMachineTrim);
    }

    fn scan_for_trim_marker(&mut self, markers: &ParserConfig) -> bool {
        let trim_marker = markers.machine_trim_marker.as_str();
        let from = resume_from(&self.buffer, self.scanned, trim_marker.len());
        let Some(at) = find_from(&self.buffer, trim_marker, from) else {
            return false;
        };

        if at > self.live_emitted {
            self.emit(EventPayload::NormalToken {
                token: self.buffer[self.live_emitted..at].to_string(),
            });
        }
        let normal = self.buffer[..at].trim().to_string();
        self.buffer.drain(..at + trim_marker.len());
        self.finish_normal(normal);
        self.enter(ParserState::ParsingMachineTrim);
        info!("Machine trim marker detected");
        true
    }

    /// Publish new normal text, holding back a tail that could be the start of the trim marker
    fn emit_live(&mut self, trim_marker: &str) {
        let safe_end = self.buffer.len() - partial_marker_suffix(&self.buffer, trim_marker);
        if safe_end > self.live_emitted {
            let token = self.buffer[self.live_emitted..safe_end].to_string();
            self.live_emitted = safe_end;
            self.emit(EventPayload::NormalToken { token });
        }
    }

    /// Bound the buffer while no marker has been seen. Keeps the trailing half;
    /// the cap is at least twice the longest marker, so a partial marker at the
    /// end always survives the cut.
    fn enforce_cap(&mut self, markers: &ParserConfig) {
        let cap = markers.effective_buffer_cap();
        if self.buffer.len() <= cap {
            return;
        }

        let cut = ceil_boundary(&self.buffer, self.buffer.len() - cap / 2);
        warn!(
            "No marker within {} bytes, dropping {} leading bytes",
            cap, cut
        );
        self.buffer.drain(..cut);
        self.scanned = self.buffer.len();
    }

    fn enter(&mut self, state: ParserState) {
        self.state = state;
        self.scanned = 0;
        self.live_emitted = 0;
    }

    fn finish_normal(&mut self, content: String) {
        self.normal = Some(content.clone());
        self.emit(EventPayload::NormalResponseComplete { content });
    }

    fn report_error(&self, message: &str) {
        warn!("Response parser: {}", message);
        self.emit(EventPayload::ParsingError {
            message: message.to_string(),
        });
    }

    fn emit(&self, payload: EventPayload) {
        self.bus.emit(&self.source, payload);
    }
}

impl std::fmt::Debug for ResponseParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseParser")
            .field("source", &self.source)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("completed", &self.completed)
            .finish()
    }
}
