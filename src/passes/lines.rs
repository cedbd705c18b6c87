/// Line-removal pass: one delete hint per line, or per top-level block via
/// the external topformflat helper
use crate::hints::{parse_bundle, Hint, HintBundle};
use crate::passes::hint_based::HintSource;
use crate::types::{Fur, PassError, PassResult};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Emits a hint for every physical line of the file as written.
pub struct LinesSource;

impl HintSource for LinesSource {
    fn generate(&self, fur: &Fur) -> PassResult<HintBundle> {
        let mut hints = Vec::new();
        let mut pos = 0usize;
        for line in fur.data().split_inclusive(|&b| b == b'\n') {
            let end = pos + line.len();
            hints.push(Hint::delete(pos, end));
            pos = end;
        }
        Ok(HintBundle::new(Vec::new(), hints))
    }
}

/// Emits hints produced by the `topformflat_hints` helper: roughly one hint
/// per curly-brace block at the nesting level given by `level`. The file is
/// piped through stdin; hints come back one JSON object per line.
pub struct TopformflatSource {
    program: PathBuf,
    level: String,
}

impl TopformflatSource {
    pub fn new(program: PathBuf, level: impl Into<String>) -> Self {
        Self {
            program,
            level: level.into(),
        }
    }
}

impl HintSource for TopformflatSource {
    fn check_prerequisites(&self) -> std::result::Result<(), String> {
        if self.program.is_file() {
            Ok(())
        } else {
            Err(format!("topformflat_hints ({})", self.program.display()))
        }
    }

    fn generate(&self, fur: &Fur) -> PassResult<HintBundle> {
        let mut child = Command::new(&self.program)
            .arg(&self.level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PassError::Bug(format!("failed to spawn topformflat_hints: {e}")))?;

        // Feed stdin from a thread; the helper may emit hints before
        // consuming all input.
        let input = fur.snapshot();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PassError::Bug("topformflat_hints stdin unavailable".into()))?;
        let feeder = std::thread::spawn(move || {
            let _ = stdin.write_all(&input);
        });

        let output = child
            .wait_with_output()
            .map_err(|e| PassError::Bug(format!("topformflat_hints failed: {e}")))?;
        let _ = feeder.join();
        if !output.status.success() {
            return Err(PassError::Bug(format!(
                "topformflat_hints exited with {}",
                output.status
            )));
        }
        parse_bundle(output.stdout.as_slice())
            .map_err(|e| PassError::Bug(format!("topformflat_hints output: {e}")))
    }
}
