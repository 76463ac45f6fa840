//! In-process stand-ins for the external tools, used by the unit tests.
//!
//! `FakeExecutor` answers to the default tool names and emulates their file
//! contracts closely enough to drive the adapters and the orchestrator end to
//! end: the embedder scrambles the payload with a seed-keyed ChaCha stream,
//! the extractor honours `-length`, and the requantizer can be told to damage
//! stego images below a quality threshold.

use crate::codec::StegoCodec;
use crate::config::{CoverImage, SweepConfig};
use crate::executor::{
    ProcessOutput, StdoutTarget, ToolExecutor, ToolInvocation, ToolInvocationError,
};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LENGTH_EMBEDDED: u8 = 1;
const LENGTH_OMITTED: u8 = 0;

#[derive(Debug)]
pub struct FakeExecutor {
    pub capacity: usize,
    /// `requant` flips a payload bit when asked for a quality below this.
    pub corrupt_below: Option<u8>,
    /// `convert` exits non-zero when asked for exactly this quality.
    pub fail_encode_at: Option<u8>,
    pub fail_capacity: bool,
    /// `wedge` hangs until its timeout expires for this quality override.
    pub hang_embed_at: Option<u8>,
    /// Per-program run time. A delay that does not fit the timeout behaves
    /// like a hung tool: it uses up the whole timeout and then fails.
    pub delays: HashMap<&'static str, Duration>,
    /// `wedge` and `unwedge` exit cleanly without writing their output.
    pub silent_codec: bool,
    pub(crate) generated: AtomicU64,
    pub(crate) invocations: Mutex<Vec<ToolInvocation>>,
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self {
            capacity: 1040,
            corrupt_below: None,
            fail_encode_at: None,
            fail_capacity: false,
            hang_embed_at: None,
            delays: HashMap::new(),
            silent_codec: false,
            generated: AtomicU64::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }
}

fn keystream(seed: Option<u32>, len: usize) -> Vec<u8> {
    let mut stream = vec![0u8; len];
    if let Some(seed) = seed {
        ChaCha8Rng::seed_from_u64(u64::from(seed)).fill_bytes(&mut stream);
    }
    stream
}

fn exit_error(program: &str, stderr: &str) -> ToolInvocationError {
    ToolInvocationError::ExitCode {
        program: program.to_string(),
        code: 1,
        stderr: stderr.to_string(),
    }
}

/// Splits `-flag value` pairs (and bare `-nolength`) from positional args.
fn parse_flags(args: &[String]) -> (HashMap<String, String>, Vec<String>) {
    let mut flags = HashMap::new();
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-nolength" {
            flags.insert(arg.clone(), String::new());
        } else if arg.starts_with('-') {
            let value = iter.next().cloned().unwrap_or_default();
            flags.insert(arg.clone(), value);
        } else {
            positional.push(arg.clone());
        }
    }
    (flags, positional)
}

impl FakeExecutor {
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocations_of(&self, program: &str) -> Vec<ToolInvocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.program == program)
            .collect()
    }

    fn emit_stdout(
        &self,
        invocation: &ToolInvocation,
        bytes: Vec<u8>,
    ) -> Result<ProcessOutput, ToolInvocationError> {
        match &invocation.stdout {
            StdoutTarget::Capture => Ok(ProcessOutput {
                stdout: bytes,
                exit_code: Some(0),
                ..Default::default()
            }),
            StdoutTarget::File(path) => {
                std::fs::write(path, bytes)
                    .map_err(|e| ToolInvocationError::io(&invocation.program, e))?;
                Ok(ok())
            }
            StdoutTarget::Discard => Ok(ok()),
        }
    }

    fn wedge(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, ToolInvocationError> {
        let (flags, positional) = parse_flags(args);
        let [cover, out] = positional.as_slice() else {
            return Err(exit_error("wedge", "usage: wedge [options] -data msg in out"));
        };
        if let (Some(hang), Some(q)) = (self.hang_embed_at, flags.get("-quality")) {
            if q.parse::<u8>().ok() == Some(hang) {
                return Err(hang_for("wedge", timeout));
            }
        }
        if self.silent_codec {
            return Ok(ok());
        }
        if !Path::new(cover).exists() {
            return Err(exit_error("wedge", "cannot open cover"));
        }
        let data = flags
            .get("-data")
            .ok_or_else(|| exit_error("wedge", "missing -data"))?;
        let payload = std::fs::read(data).map_err(|e| ToolInvocationError::io("wedge", e))?;
        let seed = flags.get("-seed").and_then(|s| s.parse().ok());

        let mut stego = Vec::with_capacity(payload.len() + 5);
        if flags.contains_key("-nolength") {
            stego.push(LENGTH_OMITTED);
        } else {
            stego.push(LENGTH_EMBEDDED);
            stego.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        }
        let stream = keystream(seed, payload.len());
        stego.extend(payload.iter().zip(stream).map(|(b, k)| b ^ k));
        std::fs::write(out, stego).map_err(|e| ToolInvocationError::io("wedge", e))?;
        Ok(ok())
    }

    fn unwedge(&self, args: &[String]) -> Result<ProcessOutput, ToolInvocationError> {
        let (flags, positional) = parse_flags(args);
        let [stego, out] = positional.as_slice() else {
            return Err(exit_error("unwedge", "usage: unwedge [options] in out"));
        };
        if self.silent_codec {
            return Ok(ok());
        }
        let stego = std::fs::read(stego).map_err(|e| ToolInvocationError::io("unwedge", e))?;
        let (&marker, rest) = stego
            .split_first()
            .ok_or_else(|| exit_error("unwedge", "empty stego image"))?;

        let (embedded_len, body) = if marker == LENGTH_EMBEDDED && rest.len() >= 4 {
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            (Some(len), &rest[4..])
        } else {
            (None, rest)
        };
        // A caller that did not embed the length must say how much to read;
        // the real extractor would hand back whatever that many bits decode to.
        let wanted = match (embedded_len, flags.get("-length")) {
            (Some(len), _) => len,
            (None, Some(len)) => len.parse().unwrap_or(0),
            (None, None) => body.len(),
        };
        let seed = flags.get("-seed").and_then(|s| s.parse().ok());
        let stream = keystream(seed, wanted);
        let recovered: Vec<u8> = (0..wanted)
            .map(|i| body.get(i).copied().unwrap_or(0) ^ stream[i])
            .collect();
        std::fs::write(out, recovered).map_err(|e| ToolInvocationError::io("unwedge", e))?;
        Ok(ok())
    }

    fn convert(&self, args: &[String]) -> Result<ProcessOutput, ToolInvocationError> {
        let [input, flag, quality, output] = args else {
            return Err(exit_error("convert", "usage: convert in -quality q out"));
        };
        if flag != "-quality" {
            return Err(exit_error("convert", "expected -quality"));
        }
        let quality: u8 = quality.parse().map_err(|_| exit_error("convert", "bad quality"))?;
        if self.fail_encode_at == Some(quality) {
            return Err(exit_error("convert", "encoder rejected quality"));
        }
        std::fs::copy(input, output).map_err(|e| ToolInvocationError::io("convert", e))?;
        Ok(ok())
    }

    fn requant(&self, args: &[String]) -> Result<ProcessOutput, ToolInvocationError> {
        let [input, output, quality] = args else {
            return Err(exit_error("requant", "usage: requant in out q"));
        };
        let quality: u8 = quality.parse().map_err(|_| exit_error("requant", "bad quality"))?;
        let mut bytes = std::fs::read(input).map_err(|e| ToolInvocationError::io("requant", e))?;
        if self.corrupt_below.is_some_and(|threshold| quality < threshold) {
            if let Some(last) = bytes.last_mut() {
                *last ^= 0x01;
            }
        }
        std::fs::write(output, bytes).map_err(|e| ToolInvocationError::io("requant", e))?;
        Ok(ok())
    }

    fn compare(&self, args: &[String]) -> Result<ProcessOutput, ToolInvocationError> {
        let output = args
            .last()
            .ok_or_else(|| exit_error("compare", "missing output"))?;
        std::fs::write(output, b"difference").map_err(|e| ToolInvocationError::io("compare", e))?;
        Ok(ok())
    }
}

/// Sleeps out the whole timeout, the way a hung child is only noticed once
/// the executor gives up on it.
fn hang_for(program: &str, timeout: Duration) -> ToolInvocationError {
    std::thread::sleep(timeout);
    ToolInvocationError::Timeout {
        program: program.to_string(),
        timeout,
    }
}

fn ok() -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        ..Default::default()
    }
}

impl ToolExecutor for FakeExecutor {
    fn run(
        &self,
        invocation: &ToolInvocation,
        timeout: Duration,
    ) -> Result<ProcessOutput, ToolInvocationError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        if let Some(&delay) = self.delays.get(invocation.program.as_str()) {
            if delay >= timeout {
                return Err(hang_for(&invocation.program, timeout));
            }
            std::thread::sleep(delay);
        }
        let args = invocation.args.as_slice();
        match invocation.program.as_str() {
            "wedge" => self.wedge(args, timeout),
            "unwedge" => self.unwedge(args),
            "convert" => self.convert(args),
            "requant" => self.requant(args),
            "compare" => self.compare(args),
            "wcap" => {
                if self.fail_capacity {
                    return Err(exit_error("wcap", "not a JPEG"));
                }
                self.emit_stdout(invocation, format!("{}\n", self.capacity).into_bytes())
            }
            "randmsg" => {
                let len: usize = args
                    .first()
                    .and_then(|a| a.parse().ok())
                    .ok_or_else(|| exit_error("randmsg", "usage: randmsg N"))?;
                let n = self.generated.fetch_add(1, Ordering::SeqCst);
                let mut bytes = vec![0u8; len];
                ChaCha8Rng::seed_from_u64(n).fill_bytes(&mut bytes);
                self.emit_stdout(invocation, bytes)
            }
            other => Err(ToolInvocationError::Spawn {
                program: other.to_string(),
                reason: "No such file or directory".to_string(),
            }),
        }
    }
}

/// A scratch directory plus a shared [`FakeExecutor`].
pub struct FakeToolbox {
    dir: tempfile::TempDir,
    pub fake: Arc<FakeExecutor>,
}

impl FakeToolbox {
    pub fn new() -> Self {
        Self::with_executor(FakeExecutor::default())
    }

    pub fn with_executor(fake: FakeExecutor) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            fake: Arc::new(fake),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn executor(&self) -> Arc<dyn ToolExecutor> {
        self.fake.clone()
    }

    pub fn codec(&self) -> StegoCodec {
        StegoCodec::new(
            self.executor(),
            vec!["wedge".to_string()],
            vec!["unwedge".to_string()],
        )
    }

    /// A configuration over one raw cover, wired to the fake tools.
    pub fn config(&self) -> SweepConfig {
        let cover = self.write_file("images/tree640.pnm", b"P6 640 480 255");
        let mut config = SweepConfig::default();
        config.work_dir = self.path("work");
        config.covers.images = vec![CoverImage {
            id: "tree640".to_string(),
            path: cover,
        }];
        config.tools.reencode = ["requant", "{input}", "{output}", "{quality}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.tools.diff = Some(
            ["compare", "{before}", "{after}", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        config.sweep.trial_timeout_ms = 5_000;
        config.sweep.setup_timeout_ms = 5_000;
        config
    }
}
