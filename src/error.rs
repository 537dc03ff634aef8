use std::io;

use thiserror::Error;

/// Top-level error type surfaced at `main`. Individual subsystems raise the
/// more specific variants below; this enum just aggregates them the way a
/// single binary crate's error type usually does.
#[derive(Debug, Error)]
pub enum TraceCapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option -e <elf path>")]
    MissingElf,

    #[error("sample duration must be greater than zero (-r <ms>)")]
    ZeroDuration,

    #[error("unknown option: {0}")]
    UnknownOption(String),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not connect to trace server {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("could not open trace file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while reading trace source: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("could not open output file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while writing output: {0}")]
    Io(#[from] io::Error),
}
