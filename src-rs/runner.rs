use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one external invocation. `output` is stdout on success and the
/// captured error text otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub ok: bool,
    pub output: String,
}

impl CommandOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
        }
    }

    pub fn into_result(self, command: &str) -> BridgeResult<String> {
        if self.ok {
            Ok(self.output)
        } else {
            Err(BridgeError::Command {
                command: command.to_string(),
                output: self.output.trim().to_string(),
            })
        }
    }
}

/// Spawn `program` once and give it at most `timeout`, including the time
/// spent collecting its output. Never fails: spawn errors, wait errors and
/// timeouts all come back as `ok: false`.
///
/// On unix the child leads its own process group. When the deadline passes,
/// the whole group is killed, so background processes that inherited the
/// output pipes cannot hold the call open.
pub fn run_command(program: &str, args: &[String], timeout: Duration) -> CommandOutcome {
    let cmdline = command_line(program, args);
    let deadline = Instant::now() + timeout;
    debug!(command = %cmdline, timeout_ms = timeout.as_millis() as u64, "running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(command = %cmdline, error = %err, "failed to spawn command");
            return CommandOutcome::failure(format!("failed to spawn `{program}`: {err}"));
        }
    };

    // Drained on their own threads so a chatty child cannot fill the pipe
    // buffer and stall until the timeout fires.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child);
            warn!(command = %cmdline, "command timed out");
            return timed_out(&cmdline, timeout);
        }
        Err(err) => {
            terminate(&mut child);
            warn!(command = %cmdline, error = %err, "failed waiting for command");
            return CommandOutcome::failure(format!("failed to wait for `{program}`: {err}"));
        }
    };

    let (stdout, stderr) = match (collect(stdout, deadline), collect(stderr, deadline)) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => {
            kill_group(&child);
            warn!(command = %cmdline, "command exited but its output stayed open past the deadline");
            return timed_out(&cmdline, timeout);
        }
    };

    if status.success() {
        CommandOutcome::success(stdout)
    } else {
        let code = status.code().unwrap_or(1);
        debug!(command = %cmdline, code, "command exited with failure");
        let message = if !stderr.trim().is_empty() {
            stderr
        } else if !stdout.trim().is_empty() {
            stdout
        } else {
            format!("`{program}` exited with status {code}")
        };
        CommandOutcome::failure(message)
    }
}

fn timed_out(cmdline: &str, timeout: Duration) -> CommandOutcome {
    CommandOutcome::failure(format!(
        "Command `{cmdline}` timed out after {} seconds",
        timeout.as_secs_f32()
    ))
}

fn terminate(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    // The child is its group's leader, so the group id is its pid.
    let pgid = child.id() as libc::pid_t;
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

/// `None` when the pipe is still open at `deadline`.
fn collect(pipe: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Option<String> {
    let Some(rx) = pipe else {
        return Some(String::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The single shape the layout pipeline and device operations need from the
/// device-bridge tool.
pub trait DeviceBridge: Send + Sync {
    /// Run one bridge invocation with `args` after any connection prefix.
    fn execute(&self, args: &[String], timeout: Duration) -> CommandOutcome;

    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    fn run(&self, args: &[&str]) -> CommandOutcome {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.execute(&owned, self.timeout())
    }

    /// `hdc shell <command>`; the remote command line travels as one argument.
    fn shell(&self, command: &str) -> CommandOutcome {
        self.run(&["shell", command])
    }
}

#[derive(Debug, Clone)]
pub struct HdcBridge {
    program: String,
    prefix: Vec<String>,
    timeout: Duration,
}

impl HdcBridge {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut bridge = Self::new(settings.hdc_bin.clone());
        if let Some(server) = settings.server_address() {
            bridge.prefix.push("-s".to_string());
            bridge.prefix.push(server);
        }
        if let Some(target) = settings.target.as_deref().filter(|t| !t.trim().is_empty()) {
            bridge.prefix.push("-t".to_string());
            bridge.prefix.push(target.trim().to_string());
        }
        bridge.timeout = settings.timeout();
        bridge
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }
}

impl DeviceBridge for HdcBridge {
    fn execute(&self, args: &[String], timeout: Duration) -> CommandOutcome {
        let full: Vec<String> = self.prefix.iter().chain(args.iter()).cloned().collect();
        run_command(&self.program, &full, timeout)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
pub mod testing {
    use super::{CommandOutcome, DeviceBridge};
    use std::sync::Mutex;
    use std::time::Duration;

    type Handler = Box<dyn Fn(&[String]) -> CommandOutcome + Send + Sync>;

    /// Records every invocation and answers from a closure.
    pub struct ScriptedBridge {
        handler: Handler,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedBridge {
        pub fn new(handler: impl Fn(&[String]) -> CommandOutcome + Send + Sync + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        pub fn joined_calls(&self) -> Vec<String> {
            self.calls().iter().map(|c| c.join(" ")).collect()
        }
    }

    impl DeviceBridge for ScriptedBridge {
        fn execute(&self, args: &[String], _timeout: Duration) -> CommandOutcome {
            self.calls.lock().unwrap().push(args.to_vec());
            (self.handler)(args)
        }
    }
}
