//! Runs one shell command as a child process under a timeout.
//!
//! The whole command string is handed to the shell so that pipes and
//! redirection keep working. On Unix the shell leads its own process group;
//! timeouts signal the group, so grandchildren are reaped along with it.
//!
//! Every exit path leaves no process behind: normal completion, timeout
//! (terminate, grace window, kill) and I/O failure all end with the child
//! waited on and its group swept.

use crate::config::EngineConfig;
use model::INTERNAL_FAILURE_EXIT_CODE;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// What a single command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub output: String,
    /// Stderr on a non-zero exit, or the failure reason.
    pub error: Option<String>,
    pub exit_code: i32,
    pub raw_log: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    fn failure(message: String) -> Self {
        Self {
            output: String::new(),
            error: Some(message.clone()),
            exit_code: INTERNAL_FAILURE_EXIT_CODE,
            raw_log: message,
            timed_out: false,
        }
    }

    fn timed_out(timeout_secs: i64) -> Self {
        let message = format!("Command timed out after {} seconds", timeout_secs);
        Self {
            timed_out: true,
            ..Self::failure(message)
        }
    }

    fn finished(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        let output = String::from_utf8_lossy(stdout).into_owned();
        let stderr = String::from_utf8_lossy(stderr).into_owned();
        let exit_code = exit_code(status);

        let mut raw_log = output.clone();
        if !stderr.is_empty() {
            raw_log.push_str("\nSTDERR:\n");
            raw_log.push_str(&stderr);
        }

        Self {
            output,
            error: (exit_code != 0).then_some(stderr),
            exit_code,
            raw_log,
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    shell: String,
    shell_flag: String,
    grace_period: Duration,
}

impl CommandRunner {
    pub fn new(config: &EngineConfig) -> Self {
        let (shell, shell_flag) = config.shell_invocation();
        Self {
            shell,
            shell_flag,
            grace_period: config.grace_period(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Run `command` through the shell, allowing it `timeout_secs` seconds.
    ///
    /// Never fails: spawn and I/O problems come back as an outcome with
    /// exit code -1.
    pub async fn run(&self, command: &str, timeout_secs: i64) -> CommandOutcome {
        let mut std_cmd = std::process::Command::new(&self.shell);
        std_cmd
            .arg(&self.shell_flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", self.shell, e);
                return CommandOutcome::failure(format!(
                    "Failed to spawn '{}': {}",
                    self.shell, e
                ));
            }
        };
        let group = ProcessGroup::of(&child);
        debug!("Spawned {:?} for command: {}", child.id(), command);

        let limit = Duration::from_secs(u64::try_from(timeout_secs).unwrap_or(0));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collected = timeout(limit, async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_stream(stdout), read_stream(stderr));
            Ok::<_, std::io::Error>((status?, stdout?, stderr?))
        })
        .await;

        match collected {
            Ok(Ok((status, stdout, stderr))) => {
                group.sweep();
                CommandOutcome::finished(status, &stdout, &stderr)
            }
            Ok(Err(e)) => {
                warn!("I/O failure while running command: {}", e);
                self.terminate(&mut child, &group).await;
                CommandOutcome::failure(format!("I/O error while running command: {}", e))
            }
            Err(_) => {
                warn!(
                    "Command exceeded {}s timeout, terminating: {}",
                    timeout_secs, command
                );
                self.terminate(&mut child, &group).await;
                CommandOutcome::timed_out(timeout_secs)
            }
        }
    }

    /// Graceful terminate, wait out the grace period, then force kill.
    async fn terminate(&self, child: &mut Child, group: &ProcessGroup) {
        group.terminate(child);

        match timeout(self.grace_period, child.wait()).await {
            Ok(_) => debug!("Child exited within grace period"),
            Err(_) => {
                warn!(
                    "Child still running after {:?} grace period, killing",
                    self.grace_period
                );
                group.kill(child);
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap killed child: {}", e);
                }
            }
        }
        group.sweep();
    }
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // Shell convention for signal deaths.
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    INTERNAL_FAILURE_EXIT_CODE
}

/// The process group led by a spawned shell.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    leader: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { leader: child.id() }
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> bool {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        match self.leader.and_then(|pid| i32::try_from(pid).ok()) {
            Some(pgid) => killpg(Pid::from_raw(pgid), signal).is_ok(),
            None => false,
        }
    }

    fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            if self.signal(nix::sys::signal::Signal::SIGTERM) {
                return;
            }
        }
        let _ = child.start_kill();
    }

    fn kill(&self, child: &mut Child) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL);
        let _ = child.start_kill();
    }

    /// Kill anything still left in the group.
    ///
    /// Runs after the leader has been reaped. A process group id stays
    /// reserved while any member is alive, so a sweep that finds a target
    /// finds this group. The remaining gap is an already empty group whose
    /// id gets recycled as a new group leader between the reap and the sweep.
    fn sweep(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL);
    }
}
