use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Traffic towards a downstream transport (SMTP relay, SMS gateway)
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::outgoing!(level = TRACE, $($msg)*)
    };
}

/// Lifecycle and bookkeeping messages of the pipeline itself
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// Output format of the installed subscriber, selected with `LOG_FORMAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Compact,
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other}")),
        }
    }
}

fn level_from_env() -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn format_from_env() -> Format {
    std::env::var("LOG_FORMAT").map_or_else(
        |_| Format::default(),
        |format| {
            format.parse().unwrap_or_else(|err| {
                eprintln!("{err}, defaulting to compact output");
                Format::default()
            })
        },
    )
}

/// Only events emitted by the herald crates reach the output
fn is_herald_target(target: &str) -> bool {
    target.starts_with("herald")
}

/// Install the global subscriber.
///
/// The level is read from `LOG_LEVEL` (TRACE in debug builds, INFO otherwise)
/// and the output format from `LOG_FORMAT` (`compact` or `json`).
pub fn init() {
    let level = level_from_env();
    let filter = FilterFn::new(|metadata| is_herald_target(metadata.target()));

    let layer = match format_from_env() {
        Format::Compact => tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_ansi(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(filter)
            .boxed(),
        Format::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_filter(level)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::Registry::default().with(layer).init();
}
