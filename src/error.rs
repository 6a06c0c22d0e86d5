use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error stored on samples and passed across task boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ─── Crate error ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
    // ── Config errors: fatal before any task runs ───────────────
    #[error("unknown {family} type {name:?}")]
    UnknownPlugin { family: &'static str, name: String },

    #[error("invalid {family} config: {source}")]
    ConfigParse {
        family: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),

    // ── Source errors: fatal for the enclosing pool ─────────────
    #[error("cannot open ammo source {path:?}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ammo source read failed: {0}")]
    SourceRead(#[source] io::Error),

    #[error("ammo decode failed at line {line}: {reason} (input: {input:?})")]
    Decode {
        line: u64,
        input: String,
        reason: String,
    },

    #[error("ammo source is empty")]
    EmptySource,

    // ── Runtime errors ──────────────────────────────────────────
    #[error("schedule failed: {0}")]
    Schedule(String),

    #[error("cannot open result destination {path:?}: {source}")]
    Output {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A shared aggregator's failure as seen by every holder but the first,
    /// which gets the original error.
    #[error("shared result aggregator failed: {0}")]
    SharedAggregator(String),

    #[error("{0} was already started")]
    AlreadyRunning(&'static str),

    #[error("gun failed: {0}")]
    Gun(String),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Returned by pools and engines interrupted through their context.
    /// Dropped from error unions.
    #[error("cancelled")]
    Cancelled,

    #[error("{}", Union(.0))]
    Multiple(Vec<Error>),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn decode(line: u64, input: &str, reason: impl Into<String>) -> Self {
        Error::Decode {
            line,
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

struct Union<'a>(&'a [Error]);

impl fmt::Display for Union<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

// ─── Error union ─────────────────────────────────────────────────

/// Collapses the terminal errors of several tasks into one result.
///
/// Nested unions are flattened and cancellations dropped. A supervisor
/// checks its own context to tell a cancelled run from a finished one.
pub fn union(errors: impl IntoIterator<Item = Error>) -> Result<()> {
    let mut flat = Vec::new();
    for err in errors {
        flatten_into(err, &mut flat);
    }
    match flat.len() {
        0 => Ok(()),
        1 => Err(flat.remove(0)),
        _ => Err(Error::Multiple(flat)),
    }
}

fn flatten_into(err: Error, out: &mut Vec<Error>) {
    match err {
        Error::Cancelled => {}
        Error::Multiple(inner) => inner.into_iter().for_each(|e| flatten_into(e, out)),
        other => out.push(other),
    }
}
