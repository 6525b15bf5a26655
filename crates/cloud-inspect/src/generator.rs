//! External raw-cloud generator invocation.
//!
//! Each scan subfolder is handed to an external program that produces the
//! `.ply` inputs for the pipeline. The child runs with piped output, a
//! watchdog deadline, and full capture of stdout/stderr so a failing
//! generator can be diagnosed from the error alone.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{CloudError, CloudResult};

/// Default generator deadline.
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(600);

/// Poll interval while waiting for the child to exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configured invocation of the external raw-cloud generator.
#[derive(Debug, Clone)]
pub struct GeneratorCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl GeneratorCommand {
    /// Create a generator command with the default timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }

    /// Add a fixed argument passed before the per-subfolder paths.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Override the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program being invoked.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the generator for one subfolder, blocking until it exits or the
    /// deadline expires. The subfolder and its output directory are appended
    /// as the final two arguments.
    pub fn run(&self, input_dir: &Path, output_dir: &Path) -> CloudResult<()> {
        let start = Instant::now();

        debug!(
            program = %self.program.display(),
            input = %input_dir.display(),
            "launching raw-cloud generator"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(input_dir)
            .arg(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CloudError::GeneratorLaunch {
                program: self.program.clone(),
                source: e,
            })?;

        // Drain both pipes on their own threads so a chatty child cannot
        // deadlock against a full pipe buffer while we poll for exit.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let status = self.wait_with_deadline(&mut child, input_dir)?;

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(CloudError::GeneratorFailed {
                subfolder: input_dir.to_path_buf(),
                status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }

        info!(
            input = %input_dir.display(),
            elapsed = ?start.elapsed(),
            "raw-cloud generator finished"
        );

        Ok(())
    }

    fn wait_with_deadline(
        &self,
        child: &mut Child,
        input_dir: &Path,
    ) -> CloudResult<std::process::ExitStatus> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(CloudError::GeneratorTimeout {
                            subfolder: input_dir.to_path_buf(),
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(CloudError::GeneratorLaunch {
                        program: self.program.clone(),
                        source: e,
                    });
                }
            }
        }
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("generator.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    #[cfg(unix)]
    fn successful_generator_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "exit 0");

        let cmd = GeneratorCommand::new(&program);
        cmd.run(dir.path(), dir.path()).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn generator_receives_both_directories() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("args.txt");
        let program = script(
            dir.path(),
            &format!("echo \"$1|$2\" > {}", marker.display()),
        );

        let input = dir.path().join("in");
        let output = dir.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&output).unwrap();

        GeneratorCommand::new(&program).run(&input, &output).unwrap();

        let recorded = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(
            recorded.trim(),
            format!("{}|{}", input.display(), output.display())
        );
    }

    #[test]
    #[cfg(unix)]
    fn nonzero_exit_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo oops >&2; exit 3");

        let err = GeneratorCommand::new(&program)
            .run(dir.path(), dir.path())
            .unwrap_err();

        match err {
            CloudError::GeneratorFailed { status, stderr, .. } => {
                assert_eq!(status, 3);
                assert!(stderr.contains("oops"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    #[cfg(unix)]
    fn hanging_generator_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "sleep 30");

        let err = GeneratorCommand::new(&program)
            .with_timeout(Duration::from_millis(200))
            .run(dir.path(), dir.path())
            .unwrap_err();

        assert!(matches!(err, CloudError::GeneratorTimeout { .. }));
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GeneratorCommand::new("/nonexistent/generator")
            .run(dir.path(), dir.path())
            .unwrap_err();

        assert!(matches!(err, CloudError::GeneratorLaunch { .. }));
    }
}
