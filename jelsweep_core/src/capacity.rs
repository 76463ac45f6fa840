use crate::executor::{StdoutTarget, ToolExecutor, ToolInvocation, ToolInvocationError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Bytes left for the message once `header_margin` is reserved for codec overhead.
pub fn payload_size_for(capacity: usize, header_margin: usize) -> Option<usize> {
    capacity.checked_sub(header_margin).filter(|&n| n > 0)
}

/// Asks the external probe how many bytes a cover can carry.
pub struct CapacityProbe {
    executor: Arc<dyn ToolExecutor>,
    command: Vec<String>,
}

impl CapacityProbe {
    pub fn new(executor: Arc<dyn ToolExecutor>, command: Vec<String>) -> Self {
        Self { executor, command }
    }

    pub fn probe(&self, cover: &Path, timeout: Duration) -> Result<usize, ToolInvocationError> {
        let invocation = ToolInvocation::from_command(
            &self.command,
            vec![cover.to_string_lossy().into_owned()],
        )
        .with_stdout(StdoutTarget::Capture);
        let output = self.executor.run(&invocation, timeout)?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<usize>()
            .map_err(|_| ToolInvocationError::BadOutput {
                program: invocation.program,
                reason: format!("expected a byte count, got '{}'", text.trim()),
            })
    }
}
