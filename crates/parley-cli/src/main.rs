//! Parley CLI
//!
//! Replays a model response through the coordination core: the response is
//! cut into chunks, streamed into a message, and the normal section is
//! printed live while the machine trim section is reported at the end.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::bus::{EventBus, EventKind, EventPayload};
use parley_core::config::{ConfigHandle, CoreConfig};
use parley_core::parser::ParsedSections;
use parley_core::state::{StateBus, StateKey};
use parley_core::stream::{
    MessageId, MessageStore, StreamCancellation, StreamItem, StreamOutcome, StreamProcessor,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_RESPONSE: &str = "---NORMAL_RESPONSE---Sure. The build failed because the \
lockfile pins an older toolchain; bump it and rerun.---MACHINE_TRIM---Boss: build fail, \
lockfile old toolchain. Fix: bump + rerun.";

const LAST_TRIM: StateKey<String> = StateKey::new("conversation.last_trim");
const TURNS: StateKey<i64> = StateKey::new("conversation.turns");

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Stream a model response through the Parley core and show both sections")]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw response text to replay instead of the built-in sample
    #[arg(short, long, conflicts_with = "items")]
    input: Option<PathBuf>,

    /// JSON lines of stream items (`{"type":"content","text":"..."}`)
    #[arg(long)]
    items: Option<PathBuf>,

    /// Characters per content chunk when replaying raw text
    #[arg(long, default_value = "7")]
    chunk_size: usize,

    /// Idle timeout per item in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable debug logging and bus history
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "parley={default_level},parley_core={default_level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn load_config(args: &Args) -> Result<CoreConfig> {
    let mut config = match args.config.clone().or_else(CoreConfig::default_path) {
        Some(path) => CoreConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CoreConfig::default(),
    };

    if args.debug {
        config.bus.debug = true;
        config.bus.log_events = true;
    }
    if args.timeout_ms.is_some() {
        config.stream.idle_timeout_ms = args.timeout_ms;
    }
    config.validate()?;
    Ok(config)
}

/// Chunks of at most `size` characters, never splitting a character
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

fn read_items(path: &Path) -> Result<Vec<StreamItem>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: bad stream item", path.display(), n + 1))
        })
        .collect()
}

fn build_items(args: &Args) -> Result<Vec<StreamItem>> {
    if let Some(path) = &args.items {
        return read_items(path);
    }

    let text = match &args.input {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => DEMO_RESPONSE.to_string(),
    };
    let mut items: Vec<StreamItem> = chunk_text(&text, args.chunk_size)
        .into_iter()
        .map(StreamItem::content)
        .collect();
    items.push(StreamItem::Done);
    Ok(items)
}

/// Write a live token and flush so it shows up immediately
fn write_live<W: Write>(out: &mut W, token: &str) -> std::io::Result<()> {
    out.write_all(token.as_bytes())?;
    out.flush()
}

/// Lines printed once a stream has completed
///
/// The normal section is repeated only when none of it was printed live,
/// which happens for marker-less responses and a trim marker arriving first.
fn summary_lines(
    content: &str,
    sections: Option<&ParsedSections>,
    printed_live: bool,
    last_trim: Option<String>,
) -> Vec<String> {
    let Some(sections) = sections else {
        // Section parsing off: nothing was printed live
        return vec![content.to_string()];
    };

    let mut lines = Vec::new();
    if !printed_live && !sections.normal.is_empty() {
        lines.push(sections.normal.clone());
    }
    lines.push(match last_trim {
        Some(trim) if trim.is_empty() => "[trim] fully inferable".to_string(),
        Some(trim) => format!("[trim] {}", trim),
        None => "[trim] none".to_string(),
    });
    lines
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let items = build_items(&args)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(config, items))
}

async fn run(config: CoreConfig, items: Vec<StreamItem>) -> Result<()> {
    let bus = EventBus::new(ConfigHandle::new(config));
    let state = Arc::new(StateBus::new(bus.clone()));
    let store = Arc::new(MessageStore::new(100));
    let processor = StreamProcessor::new(bus.clone(), store.clone());

    let printed_live = Arc::new(AtomicBool::new(false));
    let printed = Arc::clone(&printed_live);
    let _tokens = bus.subscribe(EventKind::NormalToken, move |event| {
        if let EventPayload::NormalToken { token } = &event.payload {
            match write_live(&mut std::io::stdout().lock(), token) {
                Ok(()) => printed.store(true, Ordering::Relaxed),
                Err(e) => debug!("Failed to write live token: {}", e),
            }
        }
    });

    let trim_state = Arc::clone(&state);
    let _trims = bus.subscribe_many(
        &[EventKind::MachineTrimComplete, EventKind::FullyInferableResponse],
        move |event| match &event.payload {
            EventPayload::MachineTrimComplete { content } => {
                trim_state.set_typed(&LAST_TRIM, content.clone());
            }
            EventPayload::FullyInferableResponse => {
                trim_state.set_typed(&LAST_TRIM, String::new());
            }
            _ => {}
        },
    );

    let _errors = bus.subscribe(EventKind::ParsingError, |event| {
        if let EventPayload::ParsingError { message } = &event.payload {
            warn!(source = %event.source, "Parsing error: {}", message);
        }
    });

    let cancellation = StreamCancellation::new();
    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling stream");
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let producer = async move {
        for item in items {
            if tx.send(item).is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
    };

    let message_id = MessageId::new();
    info!(message_id = %message_id, "Streaming response");
    let consumer = processor.process_stream_with_cancel(
        UnboundedReceiverStream::new(rx),
        message_id,
        "assistant",
        &cancellation,
    );
    let ((), outcome) = tokio::join!(producer, consumer);

    let turns = state.get_typed(&TURNS).unwrap_or(0) + 1;
    state.set_typed(&TURNS, turns);
    let printed_live = printed_live.load(Ordering::Relaxed);
    if printed_live {
        println!();
    }

    match outcome {
        StreamOutcome::Completed {
            content,
            chunk_count,
            sections,
        } => {
            debug!("Completed after {} chunks", chunk_count);
            let last_trim = state.get_typed(&LAST_TRIM);
            for line in summary_lines(&content, sections.as_ref(), printed_live, last_trim) {
                println!("{}", line);
            }
        }
        StreamOutcome::Failed { content, error } => {
            println!("{}", content);
            anyhow::bail!("stream failed: {}", error);
        }
        StreamOutcome::AlreadyInFlight => {
            anyhow::bail!("message {} already streaming", message_id)
        }
    }

    if bus.config().read(|c| c.bus.debug) {
        for event in bus.history() {
            debug!(kind = ?event.kind(), source = %event.source, "history");
        }
    }
    Ok(())
}
