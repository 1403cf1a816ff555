//! Subscriber setup for binaries and test harnesses embedding the detector.

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "hoverprobe=info";

/// Install a stderr fmt subscriber
///
/// `RUST_LOG` wins over `filter`. Returns `false` if a global subscriber was
/// already installed, which is harmless.
pub fn init_logging(filter: Option<&str>, json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_FILTER)));
    let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);
    install(env_filter, json, true, stderr)
}

fn install<W>(env_filter: EnvFilter, json: bool, ansi: bool, writer: W) -> bool
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.is_ok()
}
