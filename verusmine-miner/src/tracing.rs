//! Provide tracing, tailored to this program.
//!
//! At startup the program should call [`init`] to install a tracing
//! subscriber. The rest of the program can include
//! `use crate::tracing::prelude::*` for convenient access to the
//! `trace!()`, `debug!()`, `info!()`, `warn!()`, and `error!()` macros.

use std::fmt;

use ::tracing::field::{Field, Visit};
use ::tracing::{Event, Level, Subscriber};
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{
        FmtContext, FormatEvent, FormatFields,
        format::{DefaultFields, Writer as FmtWriter},
        time::FormatTime,
    },
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use ::tracing::{debug, error, info, trace, warn};
}

/// Install the stdout subscriber.
///
/// The default level is INFO (WARN in quiet mode); `RUST_LOG` overrides
/// both.
pub fn init(quiet: bool) {
    let default_level = if quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .with_target(true)
                .fmt_fields(DefaultFields::new())
                .event_format(CustomFormatter),
        )
        .init();
}

/// Custom event formatter that strips the crate prefix from targets and
/// displays structured fields on a second line for readability.
struct CustomFormatter;

/// Visitor that collects fields into a string buffer.
struct FieldCollector {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl FieldCollector {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            message: None,
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            let formatted = format!("{value:?}");
            // Clean up Option formatting: Some("foo") -> foo
            let cleaned = if let Some(inner) = formatted.strip_prefix("Some(") {
                inner.strip_suffix(')').unwrap_or(inner).to_string()
            } else {
                formatted
            };
            self.fields.push((field.name().to_string(), cleaned));
        }
    }
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: FmtWriter<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::new();
        event.record(&mut visitor);

        let timestamp = LocalTimer;
        timestamp.format_time(&mut writer)?;
        write!(writer, " ")?;

        let level = *event.metadata().level();
        let (level_color, level_text) = match level {
            Level::ERROR => ("\x1b[31m", "ERROR"), // Red
            Level::WARN => ("\x1b[33m", "WARN "),  // Yellow
            Level::INFO => ("\x1b[32m", "INFO "),  // Green
            Level::DEBUG => ("\x1b[34m", "DEBUG"), // Blue
            Level::TRACE => ("\x1b[35m", "TRACE"), // Magenta
        };
        write!(writer, "{level_color}{level_text}\x1b[0m ")?;

        // Strip "verusmine_miner::" from our own code to reduce noise;
        // keep full paths from dependencies.
        let target = event.metadata().target();
        let short_target = target
            .strip_prefix("verusmine_miner::")
            .unwrap_or(target);
        write!(writer, "{short_target}: ")?;

        if let Some(ref msg) = visitor.message {
            // Strip quotes that Debug formatting adds to strings
            write!(writer, "{}", msg.trim_matches('"'))?;
        }

        // Structured fields on a second line, aligned past the level
        // column.
        if !visitor.fields.is_empty() {
            writeln!(writer)?;
            write!(writer, "\x1b[90m               ")?;
            for (i, (key, value)) in visitor.fields.iter().enumerate() {
                if i > 0 {
                    write!(writer, ", ")?;
                }
                write!(writer, "{}={}", key, value.trim_matches('"'))?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

// Provide our own timer that formats timestamps in local time and to the
// nearest second. The default timer was in UTC and formatted timestamps
// as a long, ugly string.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut FmtWriter<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        write!(
            w,
            "{}",
            now.format(time::macros::format_description!(
                "[hour]:[minute]:[second]"
            ))
            .unwrap(),
        )
    }
}
