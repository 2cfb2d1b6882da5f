use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::config::SamplerConfig;

/// Handle to the external sampler (`dstat --output <file>` by default).
///
/// The child is killed when the handle is dropped.
pub struct SamplerProcess {
    child: Child,
    program: String,
}

impl SamplerProcess {
    pub fn start(config: &SamplerConfig, output: &Path) -> Result<Self> {
        let child = Command::new(&config.program)
            .args(&config.args)
            .arg("--output")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start sampler `{}`", config.program))?;
        tracing::info!(
            pid = child.id(),
            program = %config.program,
            output = %output.display(),
            "sampler started"
        );
        Ok(Self {
            child,
            program: config.program.clone(),
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn terminate(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!(program = %self.program, %status, "sampler already exited");
            return Ok(());
        }
        if let Err(err) = self.child.kill() {
            // InvalidInput means the child exited between try_wait and kill.
            if err.kind() != std::io::ErrorKind::InvalidInput {
                return Err(err).with_context(|| format!("failed to kill sampler `{}`", self.program));
            }
        }
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed to reap sampler `{}`", self.program))?;
        tracing::info!(program = %self.program, %status, "sampler stopped");
        Ok(())
    }
}

impl Drop for SamplerProcess {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "failed to stop sampler");
        }
    }
}
