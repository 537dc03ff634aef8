//! Session Driver: the thin, single-threaded, event-driven loop
//! that owns the trace source, pumps bytes into the external ETM decoder,
//! times the sampling window, and hands off to the emitters. Generalizes
//! the teacher's per-process "record, then save" shape (`samply`'s
//! `do_record_action` in `main.rs`) to this crate's socket-or-file source
//! and single-window lifecycle, with the readiness-wait loop enriched from
//! `anp-perf_events`'s `mio`-based fd polling (the teacher has no
//! equivalent single-threaded poll loop; see DESIGN.md).

use std::fs::File;
use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::cli::RunConfig;
use crate::decoder::EtmEventSource;
use crate::emit::{callgrind, graphviz};
use crate::error::{EmitError, SourceError};
use crate::name::SymbolResolver;
use crate::runtime::RunTime;
use crate::tree_walker;

/// Block size used when pumping bytes from the trace source into the
/// decoder, matching the original's `TRANSFER_SIZE` framing constant.
const TRANSFER_SIZE: usize = 4096;

const SOURCE_TOKEN: Token = Token(0);
const BACKOFF: Duration = Duration::from_secs(1);
const POLL_TICK: Duration = Duration::from_millis(1);

enum TraceSource {
    Tcp(MioTcpStream),
    File(File),
}

impl TraceSource {
    fn connect(config: &RunConfig) -> Result<Self, SourceError> {
        if let Some(path) = &config.file {
            let file = File::open(path).map_err(|source| SourceError::OpenFile {
                path: path.display().to_string(),
                source,
            })?;
            return Ok(TraceSource::File(file));
        }

        let host = &config.server.host;
        let port = config.server.connect_port();
        loop {
            match TcpStream::connect((host.as_str(), port)) {
                Ok(stream) => {
                    stream
                        .set_nonblocking(true)
                        .map_err(|source| SourceError::Connect {
                            host: host.clone(),
                            port,
                            source,
                        })?;
                    return Ok(TraceSource::Tcp(MioTcpStream::from_std(stream)));
                }
                Err(source) => {
                    warn!("could not connect to {host}:{port}: {source}, retrying in 1s");
                    std::thread::sleep(BACKOFF);
                }
            }
        }
    }

    fn read_block(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            TraceSource::Tcp(stream) => stream.read(buf),
            TraceSource::File(file) => file.read(buf),
        }
    }
}

/// Runs one sampling window: connects/opens the source, pumps bytes through
/// `decoder` until the window elapses (or the source ends, or `ending`
/// fires), then writes whichever outputs were requested.
pub fn run_session(
    config: &RunConfig,
    decoder: &mut dyn EtmEventSource,
    resolver: &mut dyn SymbolResolver,
    ending: Arc<AtomicBool>,
) -> Result<RunTime, SourceError> {
    let mut runtime = RunTime::new();
    let mut source = TraceSource::connect(config)?;

    let mut poll_and_events = match &mut source {
        TraceSource::Tcp(stream) => {
            let mut poll = Poll::new().map_err(SourceError::Io)?;
            poll.registry()
                .register(stream, SOURCE_TOKEN, Interest::READABLE)
                .map_err(SourceError::Io)?;
            Some((poll, Events::with_capacity(16)))
        }
        TraceSource::File(_) => None,
    };

    let mut buf = vec![0u8; TRANSFER_SIZE];
    let mut start: Option<Instant> = None;

    loop {
        if ending.load(Ordering::Relaxed) {
            info!("cancellation requested, abandoning window without emission");
            return Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "cancelled",
            )));
        }

        if let Some(started_at) = start {
            if started_at.elapsed().as_millis() as u64 >= config.sample_duration_ms {
                break;
            }
        }

        if let Some((poll, events)) = poll_and_events.as_mut() {
            poll.poll(events, Some(POLL_TICK)).map_err(SourceError::Io)?;
        } else {
            std::thread::sleep(POLL_TICK);
        }

        let n = match source.read_block(&mut buf) {
            Ok(0) => {
                if config.file_terminate || matches!(&source, TraceSource::Tcp(_)) {
                    info!("trace source ended, emitting with whatever was captured");
                    break;
                }
                continue;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(SourceError::Io(e)),
        };

        if start.is_none() {
            start = Some(Instant::now());
        }

        let recorder = &mut runtime.recorder;
        let strip_prefix = &config.delete_prefix;
        decoder.pump(&buf[..n], &mut |event| {
            recorder.on_event(event, resolver, strip_prefix);
        });
    }

    Ok(runtime)
}

/// Reconstructs the call tree and writes whichever of `-y`/`-z` were
/// requested. Failures here fail soft: logged, not propagated.
pub fn emit_outputs(
    config: &RunConfig,
    runtime: &mut RunTime,
    resolver: &mut dyn SymbolResolver,
) {
    let subcalls = tree_walker::reconstruct(runtime.recorder.edges());

    if let Some(path) = &config.dot_output {
        if let Err(e) = write_dot(path, runtime.recorder.edges()) {
            error!("could not write dot output to {}: {e}", path.display());
        }
    }

    if let Some(path) = &config.profile_output {
        if let Err(e) = write_profile(
            path,
            runtime.recorder.edges(),
            &subcalls,
            &mut runtime.cache,
            resolver,
            &config.elf_file.display().to_string(),
            &config.delete_prefix,
        ) {
            error!("could not write profile output to {}: {e}", path.display());
        }
    }
}

fn write_dot(path: &Path, edges: &[crate::recorder::Edge]) -> Result<(), EmitError> {
    let mut file = std::fs::File::create(path).map_err(|source| EmitError::OpenFile {
        path: path.display().to_string(),
        source,
    })?;
    graphviz::write_graphviz(&mut file, edges)
}

#[allow(clippy::too_many_arguments)]
fn write_profile(
    path: &Path,
    edges: &[crate::recorder::Edge],
    subcalls: &[tree_walker::SubCall],
    cache: &mut crate::name::NameCache,
    resolver: &mut dyn SymbolResolver,
    elf_path: &str,
    strip_prefix: &str,
) -> Result<(), EmitError> {
    let mut file = std::fs::File::create(path).map_err(|source| EmitError::OpenFile {
        path: path.display().to_string(),
        source,
    })?;
    callgrind::write_callgrind(&mut file, edges, subcalls, cache, resolver, elf_path, strip_prefix)
}
