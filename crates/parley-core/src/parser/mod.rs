//! Streaming response parsing
//!
//! A model response is expected to carry two sections, each opened by a
//! literal marker: the conversational answer shown to the user, then a compact
//! "machine trim" summary kept for context. Trim content flagged with the
//! inferable marker adds nothing new and need not be persisted.

mod response_parser;
mod scan;

pub use response_parser::{ParsedSections, ParserState, ResponseParser, TrimSection};
