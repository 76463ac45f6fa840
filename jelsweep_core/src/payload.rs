use crate::executor::{StdoutTarget, ToolExecutor, ToolInvocation, ToolInvocationError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A fixed-length message to hide, plus the scratch file holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub path: PathBuf,
}

impl Payload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// MD5 hex digest, used to identify the payload in logs and reports.
    pub fn digest(&self) -> String {
        format!("{:x}", md5::compute(&self.bytes))
    }
}

/// Wraps the external pseudo-random message generator.
pub struct PayloadGenerator {
    executor: Arc<dyn ToolExecutor>,
    command: Vec<String>,
}

impl PayloadGenerator {
    pub fn new(executor: Arc<dyn ToolExecutor>, command: Vec<String>) -> Self {
        Self { executor, command }
    }

    /// Writes exactly `byte_length` generated bytes to `out`.
    pub fn generate(
        &self,
        byte_length: usize,
        out: &Path,
        timeout: Duration,
    ) -> Result<Payload, ToolInvocationError> {
        let invocation =
            ToolInvocation::from_command(&self.command, vec![byte_length.to_string()])
                .with_stdout(StdoutTarget::File(out.to_path_buf()));
        if byte_length == 0 {
            return Err(ToolInvocationError::BadOutput {
                program: invocation.program,
                reason: "requested a zero-length payload".to_string(),
            });
        }
        self.executor.run(&invocation, timeout)?;

        let bytes =
            std::fs::read(out).map_err(|e| ToolInvocationError::io(&invocation.program, e))?;
        if bytes.len() != byte_length {
            return Err(ToolInvocationError::BadOutput {
                program: invocation.program,
                reason: format!("expected {byte_length} bytes, got {}", bytes.len()),
            });
        }
        Ok(Payload {
            bytes,
            path: out.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeToolbox;

    #[test]
    fn generates_exact_length() {
        let toolbox = FakeToolbox::new();
        let generator = PayloadGenerator::new(toolbox.executor(), vec!["randmsg".to_string()]);
        let out = toolbox.path("msg.dat");
        let payload = generator.generate(16, &out, Duration::from_secs(1)).unwrap();
        assert_eq!(payload.len(), 16);
        assert_eq!(std::fs::read(&out).unwrap(), payload.bytes);
        assert_eq!(payload.digest().len(), 32);
    }

    #[test]
    fn rejects_zero_length() {
        let toolbox = FakeToolbox::new();
        let generator = PayloadGenerator::new(toolbox.executor(), vec!["randmsg".to_string()]);
        let err = generator
            .generate(0, &toolbox.path("msg.dat"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::BadOutput { .. }));
        assert!(toolbox.fake.invocations().is_empty());
    }

    #[test]
    fn short_output_is_an_error() {
        let toolbox = FakeToolbox::new();
        // `echo` stands in for a generator that ignores the requested size.
        let generator = PayloadGenerator::new(
            Arc::new(crate::executor::CommandExecutor::new()),
            vec!["echo".to_string()],
        );
        let err = generator
            .generate(64, &toolbox.path("msg.dat"), Duration::from_secs(5))
            .unwrap_err();
        match err {
            ToolInvocationError::BadOutput { reason, .. } => {
                assert!(reason.contains("expected 64 bytes"), "reason: {reason}")
            }
            _ => panic!("Expected BadOutput, got {err:?}"),
        }
    }

    #[test]
    fn missing_generator_is_reported() {
        let toolbox = FakeToolbox::new();
        let generator = PayloadGenerator::new(toolbox.executor(), vec!["no-randmsg".to_string()]);
        let err = generator
            .generate(8, &toolbox.path("msg.dat"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ToolInvocationError::Spawn { .. }));
    }
}
