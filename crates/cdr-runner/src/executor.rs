use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cdr_core::sanitize::Sanitizer;
use cdr_core::space::RunConfig;

/// The black-box simulation step. Implementations write the CDR and TEMP
/// artifacts for `config` into the results directory, or fail.
pub trait Executor: Send + Sync {
    fn execute(&self, config: &RunConfig) -> Result<()>;
}

/// Runs a configured argv once per task, passing the run identity through
/// environment variables. The child is expected to write its own artifacts;
/// a non-zero exit or a missed deadline is the task's failure.
#[derive(Debug)]
pub struct ProcessExecutor {
    command: Vec<String>,
    results_dir: PathBuf,
    sanitizer: Sanitizer,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(
        command: Vec<String>,
        results_dir: &Path,
        sanitizer: Sanitizer,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("executor command is empty"));
        }
        Ok(Self {
            command,
            results_dir: results_dir.to_path_buf(),
            sanitizer,
            timeout,
        })
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, config: &RunConfig) -> Result<()> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        cmd.env("CDRLAB_ENSEMBLE_MEMBER", config.ensemble_member.to_string());
        cmd.env("CDRLAB_MODEL", &config.model);
        cmd.env("CDRLAB_OUTPUT_MODEL", self.sanitizer.apply(&config.model));
        cmd.env("CDRLAB_SCENARIO", &config.scenario);
        cmd.env("CDRLAB_RESULTS_DIR", &self.results_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn()?;
        let status = match self.timeout {
            None => child.wait()?,
            Some(deadline) => {
                let started = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if started.elapsed() > deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(anyhow!(
                            "task exceeded deadline of {}s",
                            deadline.as_secs()
                        ));
                    }
                    thread::sleep(Duration::from_millis(200));
                }
            }
        };
        if !status.success() {
            return Err(anyhow!("executor exited with {}", status));
        }
        Ok(())
    }
}
