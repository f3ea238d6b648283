//! Tracing subscriber setup: console for humans, rotated JSON files for tools

use crate::config::{LoggingConfig, Section};
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use parking_lot::Mutex;
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;

// Dropping the guard stops the non-blocking console worker.
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn parse_level(s: &str) -> LevelFilter {
    match s.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" | "" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" | "none" => LevelFilter::OFF,
        other => {
            eprintln!("unknown log level '{other}', using info");
            LevelFilter::INFO
        }
    }
}

/// True if `target` is `prefix` itself or one of its submodules.
fn target_matches(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

type SharedRotate = Arc<Mutex<FileRotate<AppendTimestamp>>>;

/// Writer that routes each record to the file of its most specific section.
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<SharedRotate>,
    // Longest prefix first.
    by_prefix: Vec<(String, SharedRotate)>,
}

impl FileRouter {
    fn route(&self, target: &str) -> Option<SharedRotate> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| target_matches(target, prefix))
            .map(|(_, file)| file.clone())
            .or_else(|| self.default.clone())
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

/// Writes into a rotated file, or discards when the target has no file.
struct RoutedWriter(Option<SharedRotate>);

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.0 {
            Some(file) => file.lock().write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.0 {
            Some(file) => file.lock().flush(),
            None => Ok(()),
        }
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedWriter(self.route(meta.target()))
    }
}

fn open_rotating(section: &Section, base_dir: &Path) -> std::io::Result<Option<SharedRotate>> {
    if section.file.trim().is_empty() {
        return Ok(None);
    }
    let path = base_dir.join(&section.file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            i64::from(section.max_age_days.unwrap_or(1)),
        )),
    };
    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;

    let rotate = FileRotate::new(
        &path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Ok(Some(Arc::new(Mutex::new(rotate))))
}

/// Per-sink target filters and the file router derived from a logging config.
struct Sinks {
    console: Targets,
    file: Targets,
    router: FileRouter,
}

fn build_sinks(cfg: &LoggingConfig, base_dir: &Path) -> Sinks {
    let default = cfg.get(DEFAULT_SECTION);
    let mut router = FileRouter::default();

    if let Some(section) = default {
        router.default = open_or_report(DEFAULT_SECTION, section, base_dir);
    }

    let console_default = default.map_or(LevelFilter::INFO, |s| parse_level(&s.console_level));
    let file_default = match (default, router.default.is_some()) {
        (Some(s), true) => parse_level(&s.file_level),
        _ => LevelFilter::OFF,
    };

    let mut console = Targets::new().with_default(console_default);
    let mut file = Targets::new().with_default(file_default);

    let mut prefixes: Vec<(&String, &Section)> = cfg
        .iter()
        .filter(|(name, _)| name.as_str() != DEFAULT_SECTION)
        .collect();
    prefixes.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));

    for (prefix, section) in prefixes {
        console = console.with_target(prefix.clone(), parse_level(&section.console_level));
        if let Some(writer) = open_or_report(prefix, section, base_dir) {
            file = file.with_target(prefix.clone(), parse_level(&section.file_level));
            router.by_prefix.push((prefix.clone(), writer));
        }
    }

    Sinks {
        console,
        file,
        router,
    }
}

fn open_or_report(name: &str, section: &Section, base_dir: &Path) -> Option<SharedRotate> {
    match open_rotating(section, base_dir) {
        Ok(writer) => writer,
        Err(e) => {
            // The subscriber is not installed yet, so this goes to stderr.
            eprintln!(
                "failed to open log file '{}' for section '{name}': {e}",
                section.file
            );
            None
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, caps every sink. Relative log file paths are
/// resolved against `base_dir`. Without a config only a console layer is
/// installed. Calling this twice keeps the first subscriber.
pub fn init_logging(cfg: Option<&LoggingConfig>, base_dir: &Path) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    let env = EnvFilter::try_from_default_env().ok();

    let Some(cfg) = cfg.filter(|c| !c.is_empty()) else {
        let console = fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        let _ = tracing_subscriber::registry()
            .with(env)
            .with(console)
            .try_init();
        return;
    };

    let sinks = build_sinks(cfg, base_dir);

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console = fmt::layer()
        .with_writer(stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(sinks.console);

    let file = (!sinks.router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(sinks.router)
            .with_filter(sinks.file)
    });

    let _ = tracing_subscriber::registry()
        .with(env)
        .with(console)
        .with(file)
        .try_init();
}
