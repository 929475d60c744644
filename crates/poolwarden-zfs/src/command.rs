//! Spawns the real `zfs` and `zpool` binaries. Arguments always travel as a
//! vector straight to `execve`; nothing here ever goes through a shell.
//! Every launch is bounded by a timeout, and both output pipes are drained
//! on helper threads while the child runs.

use log::{debug, warn};
use poolwarden_core::config::WardenConfig;
use poolwarden_core::error::{WardenError, WardenResult};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Prefix of the synthetic stdout produced in dry-run mode.
pub const DRY_RUN_MARKER: &str = "[DRY-RUN]";

/// Default locations we probe when looking for a `zfs` binary on the host.
pub const DEFAULT_ZFS_PATHS: &[&str] = &[
    "/sbin/zfs",
    "/usr/sbin/zfs",
    "/usr/local/sbin/zfs",
    "/bin/zfs",
];

/// Default locations we probe when looking for a `zpool` binary on the host.
pub const DEFAULT_ZPOOL_PATHS: &[&str] = &[
    "/sbin/zpool",
    "/usr/sbin/zpool",
    "/usr/local/sbin/zpool",
    "/bin/zpool",
];

const STDOUT_EXCERPT_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Zfs,
    Zpool,
}

/// How an invocation interacts with privilege elevation and dry-run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only, runs as the current user.
    Inspect,
    /// Read-only but needs the elevation helper.
    Elevated,
    /// Changes state (or moves a stream); elevated and skipped in dry-run mode.
    Mutating,
}

impl Access {
    fn elevated(self) -> bool {
        !matches!(self, Access::Inspect)
    }
}

/// One `zfs`/`zpool` call, described as data so it can be inspected before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    tool: Tool,
    access: Access,
    args: Vec<String>,
}

impl Invocation {
    pub fn new(tool: Tool, access: Access) -> Self {
        Self {
            tool,
            access,
            args: Vec::new(),
        }
    }

    pub fn zfs(access: Access, subcommand: &str) -> Self {
        Self::new(Tool::Zfs, access).arg(subcommand)
    }

    pub fn zpool(access: Access, subcommand: &str) -> Self {
        Self::new(Tool::Zpool, access).arg(subcommand)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag` only when `enabled`.
    pub fn flag(self, enabled: bool, flag: &str) -> Self {
        if enabled {
            self.arg(flag)
        } else {
            self
        }
    }

    /// Append `option value` when a value is present.
    pub fn option(self, option: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.arg(option).arg(value),
            None => self,
        }
    }

    /// Append one `-o key=value` pair per property, keeping caller order.
    pub fn properties(mut self, properties: &[(String, String)]) -> Self {
        for (key, value) in properties {
            self.args.push("-o".to_string());
            self.args.push(format!("{key}={value}"));
        }
        self
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

/// Where a launched child reads its stdin from.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    None,
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Where a launched child's stdout goes.
#[derive(Debug, Clone, Copy)]
pub enum Sink<'a> {
    Capture,
    File(&'a Path),
}

#[derive(Debug)]
/// Collects stdout, stderr, and exit status from a finished command.
pub struct Output {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

/// Raw result of a streaming launch; stdout stays binary.
#[derive(Debug)]
pub struct StreamOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub status: i32,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
struct Elevation {
    helper: PathBuf,
    args: Vec<String>,
}

/// Runs `zfs`/`zpool` invocations with a fixed elevation prefix, timeout, and
/// optional dry-run short circuit.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    zfs: PathBuf,
    zpool: PathBuf,
    timeout: Duration,
    replication_timeout: Duration,
    elevation: Option<Elevation>,
    dry_run: bool,
}

impl CommandExecutor {
    /// Build an executor for explicit binaries; replication shares the same timeout.
    pub fn new(zfs: PathBuf, zpool: PathBuf, timeout: Duration) -> Self {
        Self {
            zfs,
            zpool,
            timeout,
            replication_timeout: timeout,
            elevation: None,
            dry_run: false,
        }
    }

    /// Build an executor from configuration, discovering binaries that are not set.
    pub fn from_config(config: &WardenConfig) -> WardenResult<Self> {
        let zfs = match config.zfs_binary_path() {
            Some(path) => Self::checked_path(path)?,
            None => Self::discover("zfs", DEFAULT_ZFS_PATHS),
        };
        let zpool = match config.zpool_binary_path() {
            Some(path) => Self::checked_path(path)?,
            None => Self::discover("zpool", DEFAULT_ZPOOL_PATHS),
        };

        let mut executor = Self::new(zfs, zpool, config.zfs_timeout())
            .with_replication_timeout(config.replication_timeout())
            .with_dry_run(config.zfs.dry_run);
        if let Some(helper) = config.elevation_helper() {
            executor = executor.with_elevation(helper, config.privilege.helper_args.clone());
        }
        Ok(executor)
    }

    pub fn with_elevation(mut self, helper: PathBuf, args: Vec<String>) -> Self {
        self.elevation = Some(Elevation { helper, args });
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_replication_timeout(mut self, timeout: Duration) -> Self {
        self.replication_timeout = timeout;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn replication_timeout(&self) -> Duration {
        self.replication_timeout
    }

    /// Return the binary path used for `tool`.
    pub fn binary(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Zfs => &self.zfs,
            Tool::Zpool => &self.zpool,
        }
    }

    /// A configured binary must exist; discovery failures are reported at launch instead.
    fn checked_path(path: PathBuf) -> WardenResult<PathBuf> {
        if !path.exists() {
            return Err(WardenError::InvalidConfig(format!(
                "binary not found at {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Walk `candidates` until one exists, otherwise leave resolution to `PATH`.
    fn discover(name: &str, candidates: &[&str]) -> PathBuf {
        for candidate in candidates {
            let p = Path::new(candidate);
            if p.exists() {
                return p.to_path_buf();
            }
        }
        warn!("unable to locate {name} binary; tried {candidates:?}, falling back to PATH lookup");
        PathBuf::from(name)
    }

    /// Full argument vector for `invocation`, elevation prefix included.
    pub fn argv(&self, invocation: &Invocation) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(invocation.args.len() + 3);
        if invocation.access.elevated() {
            if let Some(elevation) = &self.elevation {
                argv.push(elevation.helper.clone().into_os_string());
                argv.extend(elevation.args.iter().map(OsString::from));
            }
        }
        argv.push(self.binary(invocation.tool).as_os_str().to_os_string());
        argv.extend(invocation.args.iter().map(OsString::from));
        argv
    }

    /// Human-readable rendering of the argument vector, for logs and errors only.
    pub fn command_line(&self, invocation: &Invocation) -> String {
        self.argv(invocation)
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run with the default timeout and no stdin.
    pub fn run(&self, invocation: &Invocation) -> WardenResult<Output> {
        self.execute(invocation, None, self.timeout)
    }

    /// Run `invocation`, failing on timeout, launch errors, and nonzero exit.
    pub fn execute(
        &self,
        invocation: &Invocation,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> WardenResult<Output> {
        let input = match stdin {
            Some(bytes) => Input::Bytes(bytes),
            None => Input::None,
        };
        let out = self.stream(invocation, input, Sink::Capture, timeout)?;
        Ok(Output {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: out.stderr,
            status: out.status,
        })
    }

    /// Run `invocation` with an arbitrary stdin source and stdout destination.
    pub fn stream(
        &self,
        invocation: &Invocation,
        input: Input<'_>,
        sink: Sink<'_>,
        timeout: Duration,
    ) -> WardenResult<StreamOutput> {
        let command_line = self.command_line(invocation);

        if self.dry_run && invocation.access == Access::Mutating {
            debug!("dry-run: {command_line}");
            return Ok(StreamOutput {
                stdout: format!("{DRY_RUN_MARKER} {command_line}").into_bytes(),
                stderr: String::new(),
                status: 0,
                dry_run: true,
            });
        }

        debug!("exec: {command_line}");
        let argv = self.argv(invocation);
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        command.stderr(Stdio::piped());

        match input {
            Input::None => {
                command.stdin(Stdio::null());
            }
            Input::Bytes(_) => {
                command.stdin(Stdio::piped());
            }
            Input::File(path) => {
                command.stdin(Stdio::from(File::open(path)?));
            }
        }

        match sink {
            Sink::Capture => {
                command.stdout(Stdio::piped());
                Self::supervise(command, input, &command_line, timeout)
            }
            Sink::File(path) => {
                // Streams land beside the target and only replace it once complete.
                let partial = partial_path(path);
                command.stdout(Stdio::from(File::create(&partial)?));
                let result = Self::supervise(command, input, &command_line, timeout)
                    .and_then(|out| {
                        fs::rename(&partial, path)?;
                        Ok(out)
                    });
                if result.is_err() {
                    if let Err(err) = fs::remove_file(&partial) {
                        debug!("could not remove {}: {err}", partial.display());
                    }
                }
                result
            }
        }
    }

    /// Spawn `command` and collect its output, all within `timeout`.
    fn supervise(
        mut command: Command,
        input: Input<'_>,
        command_line: &str,
        timeout: Duration,
    ) -> WardenResult<StreamOutput> {
        let deadline = Instant::now() + timeout;
        let mut child = command.spawn().map_err(|err| WardenError::System {
            command: command_line.to_string(),
            message: launch_failure(&err),
        })?;

        if let (Input::Bytes(bytes), Some(stdin)) = (input, child.stdin.take()) {
            Self::spawn_input_writer(stdin, bytes.to_vec(), command_line.to_string());
        }

        let stdout_rx = Self::spawn_output_reader(child.stdout.take());
        let stderr_rx = Self::spawn_output_reader(child.stderr.take());
        let status = wait_until(&mut child, command_line, deadline, timeout)?;

        // A descendant may keep the pipes open after the child exits.
        let stdout = collect(&stdout_rx, command_line, "stdout", deadline, timeout)?;
        let stderr = collect(&stderr_rx, command_line, "stderr", deadline, timeout)?;
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if status != 0 {
            let excerpt = &stdout[..stdout.len().min(STDOUT_EXCERPT_LIMIT)];
            return Err(WardenError::CommandFailed {
                command: command_line.to_string(),
                exit_code: status,
                stdout: String::from_utf8_lossy(excerpt).into_owned(),
                stderr,
            });
        }

        Ok(StreamOutput {
            stdout,
            stderr,
            status,
            dry_run: false,
        })
    }

    /// Drain a pipe on a helper thread; the bytes arrive on the returned channel.
    fn spawn_output_reader<R>(pipe: Option<R>) -> Receiver<WardenResult<Vec<u8>>>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let result = match pipe {
                Some(mut reader) => reader.read_to_end(&mut buf).map(|_| buf),
                None => Ok(buf),
            };
            let _ = tx.send(result.map_err(WardenError::from));
        });
        rx
    }

    /// Feed stdin from its own thread so a chatty child cannot deadlock us.
    fn spawn_input_writer<W>(mut stdin: W, bytes: Vec<u8>, command_line: String)
    where
        W: Write + Send + 'static,
    {
        thread::spawn(move || {
            match stdin.write_all(&bytes) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
                Err(err) => debug!("stdin writer for `{command_line}` stopped early: {err}"),
            }
            // stdin drops here, closing the pipe
        });
    }
}

/// Wait for the child until it exits or `deadline` passes; kill and reap on expiry.
fn wait_until(
    child: &mut Child,
    command_line: &str,
    deadline: Instant,
    timeout: Duration,
) -> WardenResult<i32> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code().unwrap_or(-1));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WardenError::Timeout {
                command: command_line.to_string(),
                timeout,
            });
        }
        thread::sleep(Duration::from_millis(25));
    }
}

/// Take a reader's bytes, giving up once `deadline` passes.
fn collect(
    rx: &Receiver<WardenResult<Vec<u8>>>,
    command_line: &str,
    stream: &str,
    deadline: Instant,
    timeout: Duration,
) -> WardenResult<Vec<u8>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!("`{command_line}` exited but its {stream} stayed open past the deadline");
            Err(WardenError::Timeout {
                command: command_line.to_string(),
                timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(WardenError::System {
            command: command_line.to_string(),
            message: format!("{stream} reader thread panicked"),
        }),
    }
}

/// `stream.bin` becomes `stream.bin.partial` in the same directory.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn launch_failure(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => format!("binary not found ({err})"),
        io::ErrorKind::PermissionDenied => format!("permission denied ({err})"),
        _ => err.to_string(),
    }
}

/// Refine a CLI failure whose diagnostic says the target does not exist.
pub(crate) fn classify_cli_error(err: WardenError) -> WardenError {
    let WardenError::CommandFailed {
        command,
        exit_code,
        stdout,
        stderr,
    } = err
    else {
        return err;
    };

    let diagnostic = if !stderr.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };
    let diagnostic_lower = diagnostic.to_ascii_lowercase();

    if diagnostic_lower.contains("dataset does not exist")
        || diagnostic_lower.contains("no such pool")
        || diagnostic_lower.contains("pool does not exist")
        || diagnostic_lower.contains("could not find any snapshots")
    {
        return WardenError::NotFound {
            subject: diagnostic.to_string(),
            stderr,
        };
    }

    WardenError::CommandFailed {
        command,
        exit_code,
        stdout,
        stderr,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn shell_executor(timeout: Duration) -> CommandExecutor {
        CommandExecutor::new(PathBuf::from("/bin/sh"), PathBuf::from("/bin/sh"), timeout)
    }

    fn script(body: &str) -> Invocation {
        Invocation::new(Tool::Zfs, Access::Inspect).arg("-c").arg(body)
    }

    #[test]
    fn metacharacters_reach_the_child_as_literal_arguments() {
        let exec = shell_executor(Duration::from_secs(5));
        let hostile = ["tank/a;rm -rf /", "tank/$(id)", "tank/`whoami`", "x && y | z"];
        let inv = script(r#"for a in "$@"; do printf '%s\n' "$a"; done"#)
            .arg("sh")
            .args(hostile);
        let out = exec.run(&inv).unwrap();
        let lines: Vec<&str> = out.stdout.lines().collect();
        assert_eq!(lines, hostile);
    }

    #[test]
    fn nonzero_exit_is_command_failed_with_streams() {
        let exec = shell_executor(Duration::from_secs(5));
        let err = exec
            .run(&script("echo partial; echo 'cannot do it' >&2; exit 3"))
            .unwrap_err();
        match err {
            WardenError::CommandFailed {
                exit_code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stdout.trim(), "partial");
                assert_eq!(stderr.trim(), "cannot do it");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let exec = shell_executor(Duration::from_millis(200));
        let started = Instant::now();
        let err = exec.run(&script("sleep 5")).unwrap_err();
        assert!(matches!(err, WardenError::Timeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn lingering_descendant_cannot_outlast_the_timeout() {
        let exec = shell_executor(Duration::from_millis(300));
        let started = Instant::now();
        let err = exec.run(&script("sleep 4 & echo hi")).unwrap_err();
        assert!(matches!(err, WardenError::Timeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn missing_binary_is_system_error() {
        let exec = CommandExecutor::new(
            PathBuf::from("/nonexistent/zfs"),
            PathBuf::from("/nonexistent/zpool"),
            Duration::from_secs(1),
        );
        let err = exec
            .run(&Invocation::zfs(Access::Inspect, "list"))
            .unwrap_err();
        match err {
            WardenError::System { message, .. } => assert!(message.contains("not found")),
            other => panic!("expected System, got {other:?}"),
        }
    }

    #[test]
    fn stdin_bytes_are_delivered() {
        let exec = shell_executor(Duration::from_secs(5));
        let payload = vec![b'x'; 256 * 1024];
        let out = exec
            .execute(&script("cat"), Some(&payload), Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.stdout.len(), payload.len());
    }

    #[test]
    fn stdout_can_be_redirected_to_a_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("stream.bin");
        let exec = shell_executor(Duration::from_secs(5));
        let out = exec
            .stream(
                &script("printf 'abc'"),
                Input::None,
                Sink::File(&target),
                Duration::from_secs(5),
            )
            .unwrap();
        assert!(out.stdout.is_empty());
        assert_eq!(fs::read(&target).unwrap(), b"abc");
        assert!(!dir.path().join("stream.bin.partial").exists());
    }

    #[test]
    fn failed_stream_leaves_existing_file_untouched() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("stream.bin");
        fs::write(&target, b"previous").unwrap();
        let exec = shell_executor(Duration::from_secs(5));

        let err = exec
            .stream(
                &script("printf 'half'; exit 1"),
                Input::None,
                Sink::File(&target),
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, WardenError::CommandFailed { .. }), "{err:?}");
        assert_eq!(fs::read(&target).unwrap(), b"previous");
        assert!(!dir.path().join("stream.bin.partial").exists());

        let fresh = dir.path().join("fresh.bin");
        let err = shell_executor(Duration::from_millis(200))
            .stream(
                &script("printf 'x'; sleep 5"),
                Input::None,
                Sink::File(&fresh),
                Duration::from_millis(200),
            )
            .unwrap_err();
        assert!(matches!(err, WardenError::Timeout { .. }), "{err:?}");
        assert!(!fresh.exists());
        assert!(!dir.path().join("fresh.bin.partial").exists());
    }

    #[test]
    fn dry_run_skips_mutations_only() {
        let exec = CommandExecutor::new(
            PathBuf::from("/nonexistent/zfs"),
            PathBuf::from("/nonexistent/zpool"),
            Duration::from_secs(1),
        )
        .with_dry_run(true);

        let destroy = Invocation::zfs(Access::Mutating, "destroy").arg("tank/data");
        let out = exec.run(&destroy).unwrap();
        assert_eq!(out.stdout, "[DRY-RUN] /nonexistent/zfs destroy tank/data");
        assert_eq!(out.status, 0);
        assert!(out.stderr.is_empty());

        let list = Invocation::zfs(Access::Inspect, "list");
        assert!(matches!(
            exec.run(&list),
            Err(WardenError::System { .. })
        ));
    }

    #[test]
    fn elevation_prefixes_privileged_invocations() {
        let exec = CommandExecutor::new(
            PathBuf::from("/sbin/zfs"),
            PathBuf::from("/sbin/zpool"),
            Duration::from_secs(1),
        )
        .with_elevation(PathBuf::from("/usr/bin/sudo"), vec!["-n".into()]);

        let create = Invocation::zpool(Access::Mutating, "scrub").arg("tank");
        assert_eq!(
            exec.argv(&create),
            vec![
                OsString::from("/usr/bin/sudo"),
                OsString::from("-n"),
                OsString::from("/sbin/zpool"),
                OsString::from("scrub"),
                OsString::from("tank"),
            ]
        );

        let history = Invocation::zpool(Access::Elevated, "history");
        assert_eq!(exec.argv(&history)[0], OsString::from("/usr/bin/sudo"));

        let list = Invocation::zpool(Access::Inspect, "list");
        assert_eq!(exec.argv(&list)[0], OsString::from("/sbin/zpool"));
    }

    #[test]
    fn classify_refines_missing_dataset() {
        let err = WardenError::CommandFailed {
            command: "zfs get all tank/nope".into(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "cannot open 'tank/nope': dataset does not exist\n".into(),
        };
        match classify_cli_error(err) {
            WardenError::NotFound { subject, stderr } => {
                assert!(subject.contains("tank/nope"));
                assert!(stderr.contains("dataset does not exist"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn properties_keep_caller_order() {
        let props = vec![
            ("volblocksize".to_string(), "16K".to_string()),
            ("compression".to_string(), "lz4".to_string()),
        ];
        let inv = Invocation::zfs(Access::Mutating, "create").properties(&props);
        assert_eq!(
            inv.arguments(),
            ["create", "-o", "volblocksize=16K", "-o", "compression=lz4"]
        );
    }
}
