//! Running a script's commands through the system shell.

use crate::Script;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
// How long a cancelled shell gets to exit after SIGTERM
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

pub const NO_OUTPUT_MESSAGE: &str = "Script executed successfully with no output.";

/// Command interpreter used to run scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: String,
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform()
    }
}

impl Shell {
    // `cmd` on Windows, `sh` everywhere else
    #[must_use]
    pub fn platform() -> Self {
        let program = if cfg!(windows) { "cmd" } else { "sh" };
        Self::new(program)
    }

    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn is_cmd(&self) -> bool {
        Path::new(&self.program)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem.eq_ignore_ascii_case("cmd"))
    }

    // Build the process that interprets `text`
    fn command(&self, text: &str) -> Command {
        let mut command = Command::new(&self.program);
        if self.is_cmd() {
            command.arg("/C");
            // cmd does its own quote parsing; hand it the line untouched
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                command.raw_arg(text);
            }
            #[cfg(not(windows))]
            {
                command.arg(text);
            }
        } else {
            command.arg("-c").arg(text);
        }
        command
    }
}

/// The composed line a user would paste into a terminal: change directory, then
/// every command chained with `&&`.
#[must_use]
pub fn compose_command_line(dir: &str, commands: &[String]) -> String {
    let cd = if cfg!(windows) { "cd /d" } else { "cd" };
    format!("{cd} \"{dir}\" && {}", commands.join(" && "))
}

/// Result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded {
        stdout: String,
        stderr: String,
    },
    Failed {
        message: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    Cancelled,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Text shown to the user once the run is over.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Succeeded { stdout, stderr } => {
                let mut combined = stdout.clone();
                if !stderr.is_empty() {
                    combined.push_str("\n\n[stderr]\n");
                    combined.push_str(stderr);
                }
                let combined = combined.trim();
                if combined.is_empty() {
                    NO_OUTPUT_MESSAGE.to_string()
                } else {
                    combined.to_string()
                }
            }
            Self::Failed {
                message, stderr, ..
            } => {
                let mut text = format!("Error executing script:\n\n{message}");
                if !stderr.is_empty() {
                    text.push_str("\n\n");
                    text.push_str(stderr);
                }
                text
            }
            Self::Cancelled => String::from("Execution cancelled."),
        }
    }
}

/// Run the script's commands as one `&&` chain inside its working directory.
///
/// The directory is applied through the process API rather than spliced into the
/// shell text. Raising `cancel` before the chain finishes terminates it.
pub fn execute(script: &Script, shell: &Shell, cancel: &AtomicBool) -> ExecutionOutcome {
    if script.commands.is_empty() {
        return failed("script has no commands".to_string(), None, String::new());
    }

    let dir = Path::new(&script.dir);
    if !dir.is_dir() {
        return failed(
            format!("working directory does not exist: {}", script.dir),
            None,
            String::new(),
        );
    }

    let text = script.commands.join(" && ");
    let mut command = shell.command(&text);
    command
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group, so cancelling reaches everything the shell started
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let started = Instant::now();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return failed(
                format!("failed to start {}: {e}", shell.program()),
                None,
                String::new(),
            )
        }
    };
    info!(script_id = %script.id, pid = child.id(), "started script");

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if cancel.load(Ordering::SeqCst) {
            warn!(script_id = %script.id, "cancelling script");
            terminate(&mut child);
            let _ = collect(stdout, stderr);
            return ExecutionOutcome::Cancelled;
        }

        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                terminate(&mut child);
                let (_, stderr) = collect(stdout, stderr);
                return failed(format!("failed to wait for command: {e}"), None, stderr);
            }
        }
    };

    // Background jobs started by the chain can hold the pipes open after the shell exits
    while !(stdout.is_finished() && stderr.is_finished()) {
        if cancel.load(Ordering::SeqCst) {
            warn!(script_id = %script.id, "cancelling background processes");
            stop_group(&child, || stdout.is_finished() && stderr.is_finished());
            if stdout.is_finished() && stderr.is_finished() {
                let _ = collect(stdout, stderr);
            }
            return ExecutionOutcome::Cancelled;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let (stdout, stderr) = collect(stdout, stderr);
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    debug!(script_id = %script.id, exit_code = ?status.code(), duration_ms, "script finished");

    if status.success() {
        ExecutionOutcome::Succeeded { stdout, stderr }
    } else {
        failed(describe_status(status), status.code(), stderr)
    }
}

fn failed(message: String, exit_code: Option<i32>, stderr: String) -> ExecutionOutcome {
    ExecutionOutcome::Failed {
        message,
        exit_code,
        stderr,
    }
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("command exited with status {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("command terminated by signal {signal}");
        }
    }

    String::from("command terminated abnormally")
}

// Read a pipe to the end on its own thread
fn drain<R: Read + Send + 'static>(source: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

// Wait for both readers; every exit path goes through here
fn collect(stdout: JoinHandle<String>, stderr: JoinHandle<String>) -> (String, String) {
    (join(stdout), join(stderr))
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    match libc::pid_t::try_from(child.id()) {
        // SAFETY: signalling a process group we created; no memory is shared
        Ok(pgid) => unsafe {
            libc::kill(-pgid, signal);
        },
        Err(_) => warn!(pid = child.id(), "pid out of range, cannot signal its group"),
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    signal_group(child, libc::SIGTERM);

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }

    signal_group(child, libc::SIGKILL);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

// The shell is already reaped but its process group lives on; stop it
// until `done` reports the pipes closed
#[cfg(unix)]
fn stop_group(child: &Child, done: impl Fn() -> bool) {
    signal_group(child, libc::SIGTERM);

    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if done() {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }

    signal_group(child, libc::SIGKILL);
}

// Without process groups the orphans cannot be reached; the readers are left detached
#[cfg(not(unix))]
fn stop_group(child: &Child, _done: impl Fn() -> bool) {
    warn!(pid = child.id(), "background processes of the script keep running");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_command_line() {
        let commands = vec!["npm install".to_string(), "npm run build".to_string()];
        let line = compose_command_line("C:\\proj", &commands);

        if cfg!(windows) {
            assert_eq!(line, "cd /d \"C:\\proj\" && npm install && npm run build");
        } else {
            assert_eq!(line, "cd \"C:\\proj\" && npm install && npm run build");
        }
    }

    #[test]
    fn test_render_success_with_stderr() {
        let outcome = ExecutionOutcome::Succeeded {
            stdout: "built\n".to_string(),
            stderr: "warning: slow\n".to_string(),
        };
        assert!(outcome.is_success());
        assert_eq!(outcome.render(), "built\n\n\n[stderr]\nwarning: slow");
    }

    #[test]
    fn test_render_empty_success() {
        let outcome = ExecutionOutcome::Succeeded {
            stdout: "\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(outcome.render(), NO_OUTPUT_MESSAGE);
    }

    #[test]
    fn test_render_failure() {
        let outcome = ExecutionOutcome::Failed {
            message: "command exited with status 2".to_string(),
            exit_code: Some(2),
            stderr: "make: *** No rule".to_string(),
        };
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.render(),
            "Error executing script:\n\ncommand exited with status 2\n\nmake: *** No rule"
        );
    }

    #[test]
    fn test_shell_flavour() {
        assert!(Shell::new("cmd").is_cmd());
        assert!(Shell::new("CMD.EXE").is_cmd());
        assert!(!Shell::new("/bin/bash").is_cmd());
        assert!(!Shell::new("sh").is_cmd());
    }

    #[test]
    fn test_collect_joins_both_readers() {
        let stdout = drain(Some(std::io::Cursor::new(b"built\n".to_vec())));
        let stderr = drain(Some(std::io::Cursor::new(b"warning\n".to_vec())));

        let (out, err) = collect(stdout, stderr);
        assert_eq!(out, "built\n");
        assert_eq!(err, "warning\n");

        let empty = drain::<std::io::Cursor<Vec<u8>>>(None);
        assert_eq!(join(empty), "");
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(ExecutionOutcome::Cancelled).unwrap();
        assert_eq!(json["status"], "cancelled");

        let json = serde_json::to_value(ExecutionOutcome::Failed {
            message: "m".to_string(),
            exit_code: Some(1),
            stderr: String::new(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["exit_code"], 1);
    }
}
