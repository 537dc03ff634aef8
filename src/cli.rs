//! CLI flags and their conversion into an immutable [`RunConfig`],
//! following the teacher's `samply::cli` pattern of a `clap` derive struct
//! plus a `.recording_props()`-style conversion method.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::error::ConfigError;

/// Default trace-distribution port (the well-known `NWCLIENT_SERVER_PORT`
/// equivalent); the actual connect port is this value plus one, per the
/// `-s` flag's convention.
pub const DEFAULT_TRACE_PORT: u16 = 2332;

pub const DEFAULT_SAMPLE_DURATION_MS: u64 = 1000;

#[derive(Debug, Parser)]
#[command(
    name = "tracecap",
    version,
    about = "Reconstructs a call graph and Callgrind profile from a live ETM instruction trace."
)]
pub struct Opt {
    /// Select alternate ETM address encoding.
    #[arg(short = 'a')]
    pub alt_addr: bool,

    /// Disable C++ name demangling in the symbol resolver.
    #[arg(short = 'D')]
    pub no_demangle: bool,

    /// String stripped from the front of file paths in emitted output.
    #[arg(short = 'd', value_name = "PREFIX")]
    pub delete_prefix: Option<String>,

    /// When reading a file, exit at EOF instead of waiting.
    #[arg(short = 'E')]
    pub file_terminate: bool,

    /// ELF file for symbol resolution.
    #[arg(short = 'e', value_name = "PATH")]
    pub elf_file: Option<PathBuf>,

    /// Read trace from file instead of network.
    #[arg(short = 'f', value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Sampling window duration, in milliseconds.
    #[arg(short = 'r', value_name = "MS", default_value_t = DEFAULT_SAMPLE_DURATION_MS)]
    pub sample_duration_ms: u64,

    /// Trace server, as `host` or `host:port` (actual connect port is `port + 1`).
    #[arg(short = 's', value_name = "HOST[:PORT]", default_value = "localhost")]
    pub server: ServerAddr,

    /// Verbosity: 0=errors, 1=warn, 2=info, 3=debug.
    #[arg(short = 'v', value_name = "0..3", default_value_t = 0)]
    pub verbosity: u8,

    /// Emit Graphviz dot to this path.
    #[arg(short = 'y', value_name = "PATH")]
    pub dot_output: Option<PathBuf>,

    /// Emit Callgrind profile to this path.
    #[arg(short = 'z', value_name = "PATH")]
    pub profile_output: Option<PathBuf>,
}

/// Parsed `-s <host>[:port]`. `port` is `None` when the user didn't specify
/// one, in which case [`DEFAULT_TRACE_PORT`] is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: Option<u16>,
}

impl ServerAddr {
    /// The port to actually connect to: `given port + 1`, the non-TPIU-variant
    /// convention.
    pub fn connect_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_TRACE_PORT) + 1
    }
}

impl FromStr for ServerAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| ConfigError::UnknownOption(format!("-s {s}")))?;
                Ok(ServerAddr {
                    host: host.to_string(),
                    port: Some(port),
                })
            }
            None => Ok(ServerAddr {
                host: s.to_string(),
                port: None,
            }),
        }
    }
}

/// Immutable, validated configuration threaded through the pipeline —
/// the non-global replacement for the original `_options` singleton
/// rather than a global singleton.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub alt_addr: bool,
    pub demangle: bool,
    pub delete_prefix: String,
    pub file_terminate: bool,
    pub elf_file: PathBuf,
    pub file: Option<PathBuf>,
    pub sample_duration_ms: u64,
    pub server: ServerAddr,
    pub verbosity: u8,
    pub dot_output: Option<PathBuf>,
    pub profile_output: Option<PathBuf>,
}

impl Opt {
    /// Validates the parsed flags and converts them into a [`RunConfig`].
    /// Mirrors the teacher's `RecordArgs::recording_props()` conversion.
    pub fn run_config(self) -> Result<RunConfig, ConfigError> {
        let elf_file = self.elf_file.ok_or(ConfigError::MissingElf)?;
        if self.sample_duration_ms == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(RunConfig {
            alt_addr: self.alt_addr,
            demangle: !self.no_demangle,
            delete_prefix: self.delete_prefix.unwrap_or_default(),
            file_terminate: self.file_terminate,
            elf_file,
            file: self.file,
            sample_duration_ms: self.sample_duration_ms,
            server: self.server,
            verbosity: self.verbosity,
            dot_output: self.dot_output,
            profile_output: self.profile_output,
        })
    }
}
