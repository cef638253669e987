use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use flate2::write::GzEncoder;
use flate2::Compression;
use iex_parser::stream::{self, StreamConfig, StreamEnd};
use iex_parser::{Message, PcapReader, Protocol};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Convert an IEX DEEP or TOPS capture to JSON lines")]
struct Args {
    /// Capture file (.pcap or .pcapng, optionally gzip-compressed)
    #[arg(long, short = 'i', env = "IEX_INPUT")]
    input: PathBuf,

    /// Output file; `-` writes to stdout, a `.gz` suffix compresses
    #[arg(long, short = 'o', env = "IEX_OUTPUT", default_value = "-")]
    output: PathBuf,

    /// Feed protocol: DEEPv1.0, TOPSv1.5 or TOPSv1.6
    #[arg(long, short = 'p', env = "IEX_PROTOCOL", default_value = "DEEPv1.0")]
    protocol: Protocol,

    /// Keep only messages for this symbol (repeatable)
    #[arg(long = "ticker", short = 't')]
    tickers: Vec<String>,

    /// Decoded messages buffered between reader and writer
    #[arg(long, env = "IEX_QUEUE_CAPACITY", default_value = "25000")]
    queue_capacity: NonZeroUsize,

    /// Suppress progress reports
    #[arg(long, short = 's', default_value_t = false)]
    silent: bool,

    /// Debug logging
    #[arg(long, short = 'v', default_value_t = false)]
    verbose: bool,
}

enum Output {
    Plain(Box<dyn Write>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Output {
    fn create(path: &Path) -> Result<Self> {
        if path.as_os_str() == "-" {
            return Ok(Output::Plain(Box::new(BufWriter::new(io::stdout().lock()))));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
            }
        }
        let file = File::create(path).with_context(|| format!("create {:?}", path))?;
        let w = BufWriter::with_capacity(1 << 20, file); // 1 MiB buffer
        if path.extension().is_some_and(|ext| ext == "gz") {
            Ok(Output::Gzip(GzEncoder::new(w, Compression::default())))
        } else {
            Ok(Output::Plain(Box::new(w)))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Output::Plain(w) => w.as_mut(),
            Output::Gzip(w) => w,
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Output::Plain(mut w) => w.flush(),
            Output::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Messages without a symbol (system events) always pass.
fn keep(tickers: &HashSet<String>, msg: &Message) -> bool {
    match msg.symbol() {
        Some(symbol) => tickers.is_empty() || tickers.contains(symbol),
        None => true,
    }
}

fn init_logging(args: &Args) {
    let default = if args.verbose {
        "debug"
    } else if args.silent {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    let args = Args::parse();
    init_logging(&args);

    let reader = PcapReader::open(&args.input).with_context(|| format!("open {:?}", args.input))?;
    info!(input = %args.input.display(), format = ?reader.format(), protocol = %args.protocol, "decoding capture");

    let config = StreamConfig::new(args.protocol).with_queue_capacity(args.queue_capacity);
    let parser = stream::Parser::new(reader, config);
    let token = parser.cancellation_token();
    ctrlc::set_handler(move || token.cancel()).context("install Ctrl-C handler")?;

    let mut out = Output::create(&args.output)?;
    let tickers: HashSet<String> = args.tickers.iter().cloned().collect();
    let mut stream = parser.start().context("start decoder thread")?;

    let (mut decoded, mut written) = (0u64, 0u64);
    for item in stream.by_ref() {
        let msg = item.with_context(|| format!("decode {:?} after {} messages", args.input, decoded))?;
        decoded += 1;
        if !args.silent && decoded % 1000 == 0 {
            info!(timestamp = %msg.timestamp(), messages = decoded, "progress");
        }
        if !keep(&tickers, &msg) {
            debug!(symbol = msg.symbol().unwrap_or_default(), "skipping");
            continue;
        }
        let w = out.writer();
        serde_json::to_writer(&mut *w, &msg).context("serialize message")?;
        w.write_all(b"\n")?;
        written += 1;
    }
    out.finish().context("flush output")?;

    match stream.end_reason() {
        Some(StreamEnd::Cancelled) => warn!(decoded, written, "interrupted"),
        _ => info!(decoded, written, "done"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iex_parser::codes::{SecurityEventKind, SystemEventKind};
    use iex_parser::message::{SecurityEvent, SystemEvent};
    use time::macros::datetime;

    #[test]
    fn ticker_filter_passes_symbolless_messages() {
        let tickers: HashSet<String> = ["AAPL".to_string()].into_iter().collect();
        let sys = Message::SystemEvent(SystemEvent {
            event: SystemEventKind::StartOfMessages,
            timestamp: datetime!(2024-01-02 09:30 UTC),
        });
        let ev = |symbol: &str| {
            Message::SecurityEvent(SecurityEvent {
                event: SecurityEventKind::Opening,
                timestamp: datetime!(2024-01-02 09:30 UTC),
                symbol: symbol.to_string(),
            })
        };
        assert!(keep(&tickers, &sys));
        assert!(keep(&tickers, &ev("AAPL")));
        assert!(!keep(&tickers, &ev("MSFT")));
        assert!(keep(&HashSet::new(), &ev("MSFT")));
    }

    #[test]
    fn args_parse_protocol_and_tickers() {
        let args = Args::try_parse_from(["iex_to_json", "-i", "in.pcap.gz", "-p", "TOPSv1.6", "-t", "SPY", "-t", "QQQ"])
            .unwrap();
        assert_eq!(args.protocol, Protocol::Tops1_6);
        assert_eq!(args.tickers, vec!["SPY", "QQQ"]);
        assert_eq!(args.output, PathBuf::from("-"));
        assert!(Args::try_parse_from(["iex_to_json", "-i", "x", "-p", "ITCH"]).is_err());
    }
}
