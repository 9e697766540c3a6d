//! Tracing subscriber setup for applications embedding the phone
//!
//! The library itself only emits `tracing` events under the `phone_core`
//! target; installing a subscriber is left to the application. The
//! default filter shows phone events at the configured level and
//! everything else at `warn`.

use tracing::Level;
use tracing_subscriber::filter::{Directive, EnvFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;

use crate::error::{PhoneError, PhoneResult};

const TARGET: &str = "phone_core";

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for `phone_core` events
    pub level: Level,
    /// Level for every other target
    pub dependency_level: Level,
    /// Extra directives such as `"my_app::backend=trace"`
    pub directives: Vec<String>,
    /// Read `RUST_LOG` instead of the levels above when it is set
    pub respect_env: bool,
    pub json: bool,
    pub file_info: bool,
    /// Log span enter/exit
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            dependency_level: Level::WARN,
            directives: Vec::new(),
            respect_env: true,
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    pub fn with_dependency_level(mut self, level: Level) -> Self {
        self.dependency_level = level;
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Ignore `RUST_LOG`
    pub fn ignore_env(mut self) -> Self {
        self.respect_env = false;
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Build the filter this configuration installs
    pub fn filter(&self) -> PhoneResult<EnvFilter> {
        if self.respect_env {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }

        let mut filter = EnvFilter::new(level_name(self.dependency_level))
            .add_directive(parse_directive(&format!("{}={}", TARGET, level_name(self.level)))?);
        for directive in &self.directives {
            filter = filter.add_directive(parse_directive(directive)?);
        }
        Ok(filter)
    }
}

fn level_name(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

fn parse_directive(directive: &str) -> PhoneResult<Directive> {
    directive
        .parse()
        .map_err(|e| PhoneError::invalid_configuration("directives", format!("{}: {}", directive, e)))
}

/// Install a global fmt subscriber.
///
/// A second call fails instead of replacing the installed subscriber.
pub fn setup_logging(config: LoggingConfig) -> PhoneResult<()> {
    let filter = config.filter()?;
    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| PhoneError::invalid_configuration("logging", e.to_string()))
}
