//! Send and receive of replication streams.
//!
//! Streams go straight between the child and a file when one is given, so
//! large payloads never sit in memory. Both directions run under the
//! replication timeout rather than the per-command one.

use crate::command::{classify_cli_error, Access, Input, Invocation, Sink};
use crate::manager::{respond, ZfsManager};
use crate::validate;
use log::info;
use poolwarden_core::envelope::Envelope;
use poolwarden_core::error::{WardenError, WardenResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Flags for `send`. A resume token overrides everything else.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub incremental_from: Option<String>,
    pub raw: bool,
    pub compressed: bool,
    pub resume_token: Option<String>,
    pub output_file: Option<PathBuf>,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            incremental_from: None,
            raw: false,
            compressed: true,
            resume_token: None,
            output_file: None,
        }
    }
}

/// Flags for `receive`. Exactly one of `input_file` and `stdin_bytes` must be set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveOptions<'a> {
    pub input_file: Option<&'a Path>,
    pub stdin_bytes: Option<&'a [u8]>,
    pub force: bool,
    pub nomount: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_size: Option<usize>,
    pub dry_run: bool,
    pub stdout: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiveReport {
    pub received: bool,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<PathBuf>,
    pub stdin_bytes: bool,
    pub dry_run: bool,
    pub stdout: String,
}

pub struct ReplicationManager<'a> {
    mgr: &'a ZfsManager,
}

impl<'a> ReplicationManager<'a> {
    pub(crate) fn new(mgr: &'a ZfsManager) -> Self {
        Self { mgr }
    }

    /// Build the `zfs send` invocation for `snapshot`.
    pub fn send_invocation(&self, snapshot: &str, options: &SendOptions) -> WardenResult<Invocation> {
        let inv = Invocation::zfs(Access::Mutating, "send");
        if let Some(token) = options.resume_token.as_deref() {
            // The token already encodes the snapshot and stream flags; a named
            // snapshot is still held to pool policy.
            if !snapshot.is_empty() {
                self.mgr.admit("snapshot", snapshot)?;
            }
            validate::name("resume token", token)?;
            return Ok(inv.arg("-t").arg(token));
        }

        self.mgr.admit("snapshot", snapshot)?;
        validate::snapshot_name(snapshot)?;
        let mut inv = inv.flag(options.raw, "--raw").flag(options.compressed, "-c");
        if let Some(base) = options.incremental_from.as_deref() {
            self.mgr.admit("snapshot", base)?;
            inv = inv.arg("-I").arg(base);
        }
        Ok(inv.arg(snapshot))
    }

    /// Produce a stream, written to `output_file` or measured in memory.
    pub fn send(&self, snapshot: &str, options: &SendOptions) -> Envelope {
        respond("send", self.try_send(snapshot, options))
    }

    fn try_send(&self, snapshot: &str, options: &SendOptions) -> WardenResult<SendReport> {
        let inv = self.send_invocation(snapshot, options)?;
        let sink = match options.output_file.as_deref() {
            Some(path) => Sink::File(path),
            None => Sink::Capture,
        };

        info!("sending {}", self.mgr.executor().command_line(&inv));
        let executor = self.mgr.executor();
        let out = executor
            .stream(&inv, Input::None, sink, executor.replication_timeout())
            .map_err(classify_cli_error)?;

        let snapshot = options
            .resume_token
            .is_none()
            .then(|| snapshot.to_string());
        if out.dry_run {
            return Ok(SendReport {
                snapshot,
                output_file: options.output_file.clone(),
                stream_size: None,
                dry_run: true,
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            });
        }
        Ok(match &options.output_file {
            Some(path) => SendReport {
                snapshot,
                output_file: Some(path.clone()),
                stream_size: None,
                dry_run: false,
                stdout: String::new(),
            },
            None => SendReport {
                snapshot,
                output_file: None,
                stream_size: Some(out.stdout.len()),
                dry_run: false,
                stdout: String::new(),
            },
        })
    }

    /// Receive a stream into `target` from a file or in-memory bytes.
    pub fn receive(&self, target: &str, options: &ReceiveOptions<'_>) -> Envelope {
        respond("receive", self.try_receive(target, options))
    }

    fn try_receive(&self, target: &str, options: &ReceiveOptions<'_>) -> WardenResult<ReceiveReport> {
        let input = match (options.input_file, options.stdin_bytes) {
            (Some(_), Some(_)) => {
                return Err(WardenError::InvalidRequest(
                    "provide either input_file or stdin_bytes, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(WardenError::InvalidRequest(
                    "receive needs input_file or stdin_bytes".to_string(),
                ))
            }
            (Some(path), None) => Input::File(path),
            (None, Some(bytes)) => Input::Bytes(bytes),
        };
        self.mgr.admit("dataset", target)?;

        let inv = Invocation::zfs(Access::Mutating, "receive")
            .flag(options.force, "-F")
            .flag(options.nomount, "-u")
            .flag(options.verbose, "-v")
            .arg(target);

        info!("receiving into {target}");
        let executor = self.mgr.executor();
        let out = executor
            .stream(&inv, input, Sink::Capture, executor.replication_timeout())
            .map_err(classify_cli_error)?;

        Ok(ReceiveReport {
            received: !out.dry_run,
            target: target.to_string(),
            from: options.input_file.map(Path::to_path_buf),
            stdin_bytes: options.stdin_bytes.is_some(),
            dry_run: out.dry_run,
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        })
    }
}
