/// Regex search-and-replace pass for idioms the generic passes cannot
/// shrink: checksum-print calls and extern-linkage wrappers
use crate::types::{Fur, PassError, PassResult};
use crate::passes::{Pass, PassState, TransformResult};
use regex::bytes::{Captures, Regex};
use std::path::Path;
use std::sync::Arc;

/// Cursor over the precomputed replacement list: one state per match,
/// enumerated last-match-first so earlier offsets stay valid on commit.
#[derive(Clone, Debug)]
pub struct ReplacementState {
    replacements: Arc<Vec<Replacement>>,
    index: usize,
}

#[derive(Clone, Debug)]
struct Replacement {
    start: usize,
    end: usize,
    text: Vec<u8>,
}

pub struct SpecialPass {
    arg: String,
    pattern: Regex,
    replace: fn(&Captures) -> Vec<u8>,
    max_transforms: Option<usize>,
}

fn replace_with_printf(caps: &Captures) -> Vec<u8> {
    let args = caps.name("list").map(|m| m.as_bytes()).unwrap_or(b"");
    let first = args.split(|&b| b == b',').next().unwrap_or(b"");
    let mut out = Vec::new();
    out.extend_from_slice(b"printf(\"%d\\n\", (int)");
    out.extend_from_slice(first);
    out.extend_from_slice(b")");
    out
}

fn replace_with_empty(_caps: &Captures) -> Vec<u8> {
    Vec::new()
}

impl SpecialPass {
    pub fn new(arg: &str, max_transforms: Option<usize>) -> PassResult<Self> {
        let (pattern, replace): (&str, fn(&Captures) -> Vec<u8>) = match arg {
            "a" => (r"transparent_crc\s*\((?P<list>[^)]*)\)", replace_with_printf),
            "b" => (r#"extern "C""#, replace_with_empty),
            "c" => (r#"extern "C\+\+""#, replace_with_empty),
            other => {
                return Err(PassError::Bug(format!(
                    "special: unknown argument {other:?}"
                )))
            }
        };
        Ok(Self {
            arg: arg.to_string(),
            pattern: Regex::new(pattern).expect("static pattern"),
            replace,
            max_transforms,
        })
    }
}

impl Pass for SpecialPass {
    fn name(&self) -> String {
        format!("special::{}", self.arg)
    }

    fn max_transforms(&self) -> Option<usize> {
        self.max_transforms
    }

    fn new_state(&self, fur: &Fur) -> PassResult<Option<PassState>> {
        let mut replacements: Vec<Replacement> = self
            .pattern
            .captures_iter(fur.data())
            .map(|caps| {
                let m = caps.get(0).expect("whole-match group");
                Replacement {
                    start: m.start(),
                    end: m.end(),
                    text: (self.replace)(&caps),
                }
            })
            .collect();
        if replacements.is_empty() {
            return Ok(None);
        }
        replacements.reverse();
        Ok(Some(PassState::Replacement(ReplacementState {
            replacements: Arc::new(replacements),
            index: 0,
        })))
    }

    fn advance(&self, state: &PassState) -> Option<PassState> {
        let PassState::Replacement(state) = state else {
            return None;
        };
        let index = state.index + 1;
        if index >= state.replacements.len() {
            return None;
        }
        Some(PassState::Replacement(ReplacementState {
            replacements: Arc::clone(&state.replacements),
            index,
        }))
    }

    fn transform(
        &self,
        data: &[u8],
        _sandbox_file: &Path,
        state: &PassState,
    ) -> PassResult<TransformResult> {
        let PassState::Replacement(state) = state else {
            return Err(PassError::Bug("special: unexpected state flavor".into()));
        };
        let r = &state.replacements[state.index];
        if r.end > data.len() {
            return Err(PassError::Bug("special: stale replacement offset".into()));
        }
        let mut out = Vec::with_capacity(data.len());
        out.extend_from_slice(&data[..r.start]);
        out.extend_from_slice(&r.text);
        out.extend_from_slice(&data[r.end..]);
        if out == data {
            return Ok(TransformResult::Invalid);
        }
        Ok(TransformResult::Ok(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fur_with(contents: &[u8]) -> (tempfile::TempDir, Fur) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.c");
        std::fs::write(&path, contents).unwrap();
        (dir, Fur::load(&path).unwrap())
    }

    #[test]
    fn crc_call_becomes_printf() {
        let (_dir, fur) = fur_with(b"transparent_crc(g.f0, \"g.f0\", print_hash);\n");
        let pass = SpecialPass::new("a", None).unwrap();
        let state = pass.new_state(&fur).unwrap().unwrap();
        let TransformResult::Ok(out) = pass.transform(fur.data(), fur.path(), &state).unwrap()
        else {
            panic!("expected a variant");
        };
        assert_eq!(out, b"printf(\"%d\\n\", (int)g.f0);\n");
    }

    #[test]
    fn extern_c_is_removed() {
        let (_dir, fur) = fur_with(b"extern \"C\" int f(void);\n");
        let pass = SpecialPass::new("b", None).unwrap();
        let state = pass.new_state(&fur).unwrap().unwrap();
        let TransformResult::Ok(out) = pass.transform(fur.data(), fur.path(), &state).unwrap()
        else {
            panic!("expected a variant");
        };
        assert_eq!(out, b" int f(void);\n");
    }

    #[test]
    fn states_enumerate_matches_in_reverse() {
        let (_dir, fur) = fur_with(b"extern \"C\" a; extern \"C\" b;\n");
        let pass = SpecialPass::new("b", None).unwrap();
        let state = pass.new_state(&fur).unwrap().unwrap();
        let TransformResult::Ok(first) = pass.transform(fur.data(), fur.path(), &state).unwrap()
        else {
            panic!()
        };
        // Last match is attempted first.
        assert_eq!(first, b"extern \"C\" a;  b;\n");
        let next = pass.advance(&state).unwrap();
        let TransformResult::Ok(second) = pass.transform(fur.data(), fur.path(), &next).unwrap()
        else {
            panic!()
        };
        assert_eq!(second, b" a; extern \"C\" b;\n");
        assert!(pass.advance(&next).is_none());
    }

    #[test]
    fn no_match_means_no_state() {
        let (_dir, fur) = fur_with(b"int x;\n");
        let pass = SpecialPass::new("a", None).unwrap();
        assert!(pass.new_state(&fur).unwrap().is_none());
    }

    #[test]
    fn unknown_arg_is_rejected() {
        assert!(SpecialPass::new("z", None).is_err());
    }
}
