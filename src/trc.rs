//! Tracing configuration and initialization.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::term;

/// Environment variable consulted before `RUST_LOG`.
const LOG_ENV: &str = "NULL_FS_LOG";

struct FgConfig {
    no_spin: bool,
}

impl FgConfig {
    fn is_ugly(&self) -> bool {
        self.no_spin
    }

    pub fn pretty() -> Self {
        Self { no_spin: false }
    }

    pub fn ugly() -> Self {
        Self { no_spin: true }
    }
}

enum TrcMode {
    Foreground(FgConfig),
    Daemon,
}

pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
    /// Whether the filter came from the environment. Flags never override it.
    user_filter: bool,
}

impl Default for Trc {
    fn default() -> Self {
        let maybe_env_filter =
            EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            Ok(env_filter) => Self {
                // If the user provided an env_filter, they probably know what they're doing and
                // don't want any fancy formatting or spinners. So we default to the ugly mode.
                mode: TrcMode::Foreground(FgConfig::ugly()),
                env_filter,
                user_filter: true,
            },
            Err(_) => Self {
                // If the user didn't provide an env_filter, we assume they just want a nice
                // out-of-the-box experience, and default to pretty mode with an info level filter.
                mode: TrcMode::Foreground(FgConfig::pretty()),
                env_filter: EnvFilter::new("info"),
                user_filter: false,
            },
        }
    }
}

impl Trc {
    /// Log our own crate at debug level.
    pub fn with_debug(self, enabled: bool) -> Self {
        self.with_directive(enabled, "null_fs=debug")
    }

    /// Log the FUSE session machinery at debug level.
    pub fn with_debug_fuse(self, enabled: bool) -> Self {
        self.with_directive(enabled, "fuser=debug")
    }

    fn with_directive(mut self, enabled: bool, directive: &str) -> Self {
        if enabled
            && !self.user_filter
            && let Ok(directive) = directive.parse()
        {
            self.env_filter = self.env_filter.add_directive(directive);
        }
        self
    }

    /// Log for a detached process: plain lines, no spinners, no colour.
    pub fn daemon(mut self) -> Self {
        self.mode = TrcMode::Daemon;
        self
    }

    pub fn init(self) -> Result<(), TryInitError> {
        match &self.mode {
            TrcMode::Daemon => self.init_ugly_mode(false),
            TrcMode::Foreground(fg_config) => {
                if fg_config.is_ugly() {
                    let ansi = term::should_use_color(&std::io::stderr());
                    self.init_ugly_mode(ansi)
                } else {
                    self.init_pretty_mode()
                }
            }
        }
    }

    fn init_ugly_mode(self, ansi: bool) -> Result<(), TryInitError> {
        // "Ugly mode" is the plain, verbose, rust logging mode.
        tracing_subscriber::fmt()
            .with_env_filter(self.env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(ansi)
            .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
            .finish()
            .try_init()
    }

    fn init_pretty_mode(self) -> Result<(), TryInitError> {
        // "Pretty mode" is the more user-friendly, compact, and colorful mode.
        let indicatif_layer = IndicatifLayer::new();
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(indicatif_layer.get_stderr_writer())
                    .with_ansi(term::should_use_color(&std::io::stderr()))
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .with(indicatif_layer)
            .try_init()
    }
}
