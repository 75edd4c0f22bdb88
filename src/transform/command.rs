use std::process::Stdio;

use anyhow::{Result, ensure};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{trace, warn};

use super::{TransformError, Transformer};
use crate::key::TransformParams;
use crate::origin::OriginalObject;

/// Runs an external program that reads the original on stdin and writes the variant to stdout.
///
/// Arguments may contain the placeholders `{width}`, `{height}`, `{format}` and `{quality}`;
/// absent parameters expand to an empty string.
#[derive(Debug, Clone)]
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
}

impl CommandTransformer {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("transform command must not be empty"))?;
        ensure!(!program.trim().is_empty(), "transform program must not be empty");
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn render_args(&self, params: &TransformParams) -> Vec<String> {
        let width = params.width.map(|v| v.to_string()).unwrap_or_default();
        let height = params.height.map(|v| v.to_string()).unwrap_or_default();
        let format = params.format.map(|f| f.as_str()).unwrap_or_default();
        let quality = params.quality.map(|v| v.to_string()).unwrap_or_default();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{width}", &width)
                    .replace("{height}", &height)
                    .replace("{format}", format)
                    .replace("{quality}", &quality)
            })
            .collect()
    }
}

#[async_trait]
impl Transformer for CommandTransformer {
    async fn transform(
        &self,
        original: &OriginalObject,
        params: &TransformParams,
    ) -> Result<Bytes, TransformError> {
        let args = self.render_args(params);
        trace!(program = %self.program, ?args, "spawning transform command");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                warn!(program = %self.program, error = %err, "failed to spawn transform command");
                TransformError::ComputeFailure("failed to start transformer".into())
            })?;

        // Feed stdin concurrently so a large output cannot stall the pipe.
        let input = original.body.clone();
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let result = stdin.write_all(&input).await;
                drop(stdin);
                result
            })
        });

        let output = child.wait_with_output().await.map_err(|err| {
            TransformError::ComputeFailure(format!("transformer did not complete: {err}"))
        })?;
        if let Some(writer) = writer
            && let Ok(Err(err)) = writer.await
        {
            trace!(error = %err, "transform command closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                program = %self.program,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "transform command failed"
            );
            return Err(TransformError::ComputeFailure(format!(
                "transformer exited with {}",
                output.status
            )));
        }
        if output.stdout.is_empty() {
            return Err(TransformError::ComputeFailure(
                "transformer produced no output".into(),
            ));
        }
        Ok(Bytes::from(output.stdout))
    }
}
