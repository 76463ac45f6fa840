use crate::executor::{ToolExecutor, ToolInvocation, ToolInvocationError, remove_stale_output};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Substitutes `{name}` placeholders in a command template.
///
/// Each template element stays a single argument, so paths with spaces
/// survive intact.
pub fn expand_template(template: &[String], values: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            values.iter().fold(part.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// JPEG encode/re-encode through an external image tool.
///
/// Output is only reproducible for a fixed tool version.
pub struct Transcoder {
    executor: Arc<dyn ToolExecutor>,
    encode_template: Vec<String>,
    reencode_template: Vec<String>,
    diff_template: Option<Vec<String>>,
}

impl Transcoder {
    pub fn new(
        executor: Arc<dyn ToolExecutor>,
        encode_template: Vec<String>,
        reencode_template: Vec<String>,
        diff_template: Option<Vec<String>>,
    ) -> Self {
        Self {
            executor,
            encode_template,
            reencode_template,
            diff_template,
        }
    }

    fn run_template(
        &self,
        template: &[String],
        values: &[(&str, String)],
        out: &Path,
        timeout: Duration,
    ) -> Result<(), ToolInvocationError> {
        let invocation =
            ToolInvocation::from_command(&expand_template(template, values), Vec::new());
        remove_stale_output(&invocation.program, out)?;
        self.executor.run(&invocation, timeout)?;
        if !out.exists() {
            return Err(ToolInvocationError::MissingOutput {
                program: invocation.program,
                path: out.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Encodes a source image to JPEG at `quality`.
    pub fn encode(
        &self,
        source: &Path,
        quality: u8,
        out: &Path,
        timeout: Duration,
    ) -> Result<(), ToolInvocationError> {
        let values = [
            ("input", path_value(source)),
            ("output", path_value(out)),
            ("quality", quality.to_string()),
        ];
        self.run_template(&self.encode_template, &values, out, timeout)
    }

    /// Decodes and re-encodes a JPEG at `quality`, one lossy pipeline hop.
    pub fn reencode(
        &self,
        source_jpeg: &Path,
        quality: u8,
        out: &Path,
        timeout: Duration,
    ) -> Result<(), ToolInvocationError> {
        let values = [
            ("input", path_value(source_jpeg)),
            ("output", path_value(out)),
            ("quality", quality.to_string()),
        ];
        self.run_template(&self.reencode_template, &values, out, timeout)
    }

    /// Renders a visual difference between two images, if a diff tool is configured.
    pub fn render_difference(
        &self,
        before: &Path,
        after: &Path,
        out: &Path,
        timeout: Duration,
    ) -> Result<Option<()>, ToolInvocationError> {
        let Some(template) = &self.diff_template else {
            return Ok(None);
        };
        let values = [
            ("before", path_value(before)),
            ("after", path_value(after)),
            ("output", path_value(out)),
        ];
        self.run_template(template, &values, out, timeout)?;
        Ok(Some(()))
    }
}
