//! Tracing subscriber for the binary.
//!
//! Logs go to `.supercoder/supercoder.log` in the project, never to the
//! terminal, so they cannot interleave with streamed output. The filter
//! comes from `SUPERCODER_LOG` when set and can be switched to debug at
//! runtime through [`Logging::set_debug`].

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

/// Log file, relative to the project root.
pub const LOG_FILE: &str = ".supercoder/supercoder.log";
/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "SUPERCODER_LOG";

const DEFAULT_DIRECTIVE: &str = "info";
const DEBUG_DIRECTIVE: &str = "info,supercoder=debug,supercoder_cli=debug";

/// Handle to the installed subscriber.
pub struct Logging {
    path: PathBuf,
    filter: reload::Handle<EnvFilter, Registry>,
}

/// Directive used when `SUPERCODER_LOG` is unset.
pub fn directive(debug: bool) -> &'static str {
    if debug { DEBUG_DIRECTIVE } else { DEFAULT_DIRECTIVE }
}

/// Install the global subscriber writing to `<project_root>/.supercoder/supercoder.log`.
pub fn init(project_root: &Path, debug: bool) -> io::Result<Logging> {
    let path = project_root.join(LOG_FILE);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(directive(debug)));
    let (filter_layer, filter) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(io::Error::other)?;

    Ok(Logging { path, filter })
}

impl Logging {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Swap the filter between the default and debug directives.
    pub fn set_debug(&self, debug: bool) {
        if let Err(e) = self.filter.reload(EnvFilter::new(directive(debug))) {
            tracing::warn!("Failed to change log level: {e}");
        }
    }
}
