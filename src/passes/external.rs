/// Passes realized by helper executables: hint emitters and raw rewriters
use crate::hints::{parse_bundle, HintBundle, SearchState};
use crate::passes::hint_based::HintSource;
use crate::passes::{Pass, PassState, TransformResult};
use crate::types::{Fur, PassError, PassResult};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Exit code by which a rewriting helper reports that the counter ran past
/// the last transformation instance.
const HELPER_STOP_EXIT: i32 = 255;

/// Hint-emitting helper: spawned as `<program> <transformation> <file>`,
/// writes a bundle (vocabulary line, then hint lines) to stdout.
pub struct ExternalHintSource {
    program: PathBuf,
    transformation: String,
    /// Window width for subsegment search; `None` selects binary search.
    window: Option<usize>,
}

impl ExternalHintSource {
    pub fn new(program: PathBuf, transformation: impl Into<String>, window: Option<usize>) -> Self {
        Self {
            program,
            transformation: transformation.into(),
            window,
        }
    }
}

impl HintSource for ExternalHintSource {
    fn check_prerequisites(&self) -> std::result::Result<(), String> {
        if self.program.is_file() {
            Ok(())
        } else {
            Err(format!("{}", self.program.display()))
        }
    }

    fn generate(&self, fur: &Fur) -> PassResult<HintBundle> {
        let output = Command::new(&self.program)
            .arg(&self.transformation)
            .arg(fur.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| {
                PassError::Bug(format!("failed to spawn {}: {e}", self.program.display()))
            })?;
        if !output.status.success() {
            return Err(PassError::Bug(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }
        parse_bundle(output.stdout.as_slice())
            .map_err(|e| PassError::Bug(format!("{}: {e}", self.program.display())))
    }

    fn elementary_state(&self, hint_count: usize) -> Option<SearchState> {
        match self.window {
            Some(window) => SearchState::subsegment(hint_count, window),
            None => SearchState::binary(hint_count),
        }
    }
}

/// Cursor of a rewriting helper: the instance counter passed on the command
/// line. The helper owns the enumeration; we only count.
#[derive(Clone, Debug)]
pub struct CounterState {
    pub index: usize,
}

/// Raw-rewrite helper in the clang_delta mold: spawned per state as
/// `<program> --transformation=<name> --counter=<index> <file>`, writes the
/// complete rewritten file to stdout. A distinguished exit code signals that
/// the counter ran out.
pub struct ExternalTransformPass {
    name: String,
    program: PathBuf,
    transformation: String,
    max_transforms: Option<usize>,
}

impl ExternalTransformPass {
    pub fn new(
        name: impl Into<String>,
        program: PathBuf,
        transformation: impl Into<String>,
        max_transforms: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            program,
            transformation: transformation.into(),
            max_transforms,
        }
    }

    /// Counters are 1-based on the helper command line.
    fn run_helper(&self, file: &Path, index: usize) -> PassResult<TransformResult> {
        let output = Command::new(&self.program)
            .arg(format!("--transformation={}", self.transformation))
            .arg(format!("--counter={}", index + 1))
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| {
                PassError::Bug(format!("failed to spawn {}: {e}", self.program.display()))
            })?;
        match output.status.code() {
            Some(0) => Ok(TransformResult::Ok(output.stdout)),
            Some(HELPER_STOP_EXIT) => Ok(TransformResult::Stop),
            _ => Err(PassError::Bug(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            ))),
        }
    }
}

impl Pass for ExternalTransformPass {
    fn name(&self) -> String {
        format!("{}::{}", self.name, self.transformation)
    }

    fn check_prerequisites(&self) -> std::result::Result<(), String> {
        if self.program.is_file() {
            Ok(())
        } else {
            Err(format!("{}", self.program.display()))
        }
    }

    fn max_transforms(&self) -> Option<usize> {
        self.max_transforms
    }

    fn new_state(&self, fur: &Fur) -> PassResult<Option<PassState>> {
        if fur.size() == 0 {
            return Ok(None);
        }
        debug!("{}: starting helper enumeration", self.name());
        Ok(Some(PassState::Counter(CounterState { index: 0 })))
    }

    fn advance(&self, state: &PassState) -> Option<PassState> {
        let PassState::Counter(state) = state else {
            return None;
        };
        // The helper reports exhaustion itself via the stop exit code; the
        // counter just walks forward.
        Some(PassState::Counter(CounterState {
            index: state.index + 1,
        }))
    }

    fn transform(
        &self,
        data: &[u8],
        sandbox_file: &Path,
        state: &PassState,
    ) -> PassResult<TransformResult> {
        let PassState::Counter(state) = state else {
            return Err(PassError::Bug(format!(
                "{}: unexpected state flavor",
                self.name
            )));
        };
        match self.run_helper(sandbox_file, state.index)? {
            TransformResult::Ok(bytes) if bytes == data => Ok(TransformResult::Invalid),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_helper(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("helper");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fur_with(contents: &[u8]) -> (tempfile::TempDir, Fur) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.c");
        std::fs::write(&path, contents).unwrap();
        (dir, Fur::load(&path).unwrap())
    }

    #[test]
    fn hint_helper_bundle_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let helper = fake_helper(
            dir.path(),
            r#"echo '["tok"]'
echo '{"p":[{"l":0,"r":2}]}'"#,
        );
        let (_fdir, fur) = fur_with(b"abcd");
        let source = ExternalHintSource::new(helper, "rm-toks", Some(4));
        let bundle = source.generate(&fur).unwrap();
        assert_eq!(bundle.vocabulary, vec!["tok"]);
        assert_eq!(bundle.hints.len(), 1);
    }

    #[test]
    fn hint_helper_failure_is_a_pass_bug() {
        let dir = tempfile::tempdir().unwrap();
        let helper = fake_helper(dir.path(), "exit 1");
        let (_fdir, fur) = fur_with(b"abcd");
        let source = ExternalHintSource::new(helper, "rm-toks", None);
        assert!(matches!(source.generate(&fur), Err(PassError::Bug(_))));
    }

    #[test]
    fn rewrite_helper_output_becomes_the_variant() {
        let dir = tempfile::tempdir().unwrap();
        // Drops the first line of its input file, mimicking a rewriting
        // helper; stops once the counter exceeds the line count.
        let helper = fake_helper(
            dir.path(),
            r#"file="$3"
count=$(wc -l < "$file")
counter="${2#--counter=}"
[ "$counter" -gt "$count" ] && exit 255
sed "${counter}d" "$file""#,
        );
        let (_fdir, fur) = fur_with(b"aaa\nbbb\n");
        let pass = ExternalTransformPass::new("clang", helper, "remove-line", None);
        let state = pass.new_state(&fur).unwrap().unwrap();
        let TransformResult::Ok(out) = pass
            .transform(fur.data(), fur.path(), &state)
            .unwrap()
        else {
            panic!("expected a variant");
        };
        assert_eq!(out, b"bbb\n");

        // Walk past the end: the helper signals stop.
        let mut state = state;
        for _ in 0..2 {
            state = pass.advance(&state).unwrap();
        }
        assert!(matches!(
            pass.transform(fur.data(), fur.path(), &state).unwrap(),
            TransformResult::Stop
        ));
    }

    #[test]
    fn missing_helper_fails_prerequisites() {
        let pass = ExternalTransformPass::new(
            "clang",
            PathBuf::from("/nonexistent/clang_delta"),
            "x",
            None,
        );
        assert!(pass.check_prerequisites().is_err());
    }
}
