//! Logging bootstrap for poolwarden binaries. Library code only talks to the
//! `log` facade; this wires it to `env_logger` on stderr so JSON envelopes on
//! stdout stay parseable.

use env_logger::fmt::Formatter;
use env_logger::{Env, Target};
use log::{LevelFilter, Record};
use serde_json::json;
use std::env;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::OnceLock;
use std::thread;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "POOLWARDEN_LOG_FORMAT";
const LEVEL_ENV: &str = "POOLWARDEN_LOG_LEVEL";

/// Line layout selected through `POOLWARDEN_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Initialize the global logger.
///
/// The first caller wins; subsequent calls are no-ops. `RUST_LOG` takes
/// precedence, then `POOLWARDEN_LOG_LEVEL`, then `default_level`.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let fallback = level_filter(&level).to_string();

    let format = env::var(FORMAT_ENV)
        .ok()
        .map(|raw| {
            raw.parse().unwrap_or_else(|err| {
                eprintln!("{err}; using json");
                LogFormat::Json
            })
        })
        .unwrap_or(LogFormat::Json);

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(fallback));
    builder.target(Target::Stderr);
    match format {
        LogFormat::Json => builder.format(write_json),
        LogFormat::Plain => builder.format(write_plain),
    };

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {err}");
    }
}

/// Unknown level names fall back to `info` rather than silencing everything.
fn level_filter(raw: &str) -> LevelFilter {
    LevelFilter::from_str(raw.trim()).unwrap_or(LevelFilter::Info)
}

/// Worker threads in the inventory walk are unnamed; fall back to the id.
fn thread_label() -> String {
    let current = thread::current();
    current
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", current.id()))
}

fn write_json(buf: &mut Formatter, record: &Record<'_>) -> io::Result<()> {
    let payload = json!({
        "ts": buf.timestamp_millis().to_string(),
        "level": record.level().as_str().to_ascii_lowercase(),
        "module": record.module_path().unwrap_or_else(|| record.target()),
        "thread": thread_label(),
        "msg": record.args().to_string(),
    });
    writeln!(buf, "{payload}")
}

fn write_plain(buf: &mut Formatter, record: &Record<'_>) -> io::Result<()> {
    writeln!(
        buf,
        "{} {:<5} [{}] {}: {}",
        buf.timestamp_millis(),
        record.level(),
        thread_label(),
        record.module_path().unwrap_or_else(|| record.target()),
        record.args()
    )
}
