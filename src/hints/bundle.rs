/// Hint and bundle data model, wire format, and validation
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use thiserror::Error;

/// A bundle that fails validation is a pass bug: the invocation is skipped,
/// the run continues.
#[derive(Error, Debug)]
pub enum HintError {
    #[error("malformed hint line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("vocabulary must be a JSON array of strings: {0}")]
    BadVocabulary(String),

    #[error("patch range [{left}, {right}) is invalid for a file of {file_len} bytes")]
    BadRange {
        left: usize,
        right: usize,
        file_len: usize,
    },

    #[error("patches within a hint must be sorted and disjoint")]
    UnsortedPatches,

    #[error("vocabulary index {index} out of range ({len} entries)")]
    BadVocabIndex { index: usize, len: usize },

    #[error("overlapping patches in applied set at byte {at}")]
    OverlappingPatches { at: usize },

    #[error("IO error reading bundle: {0}")]
    Io(#[from] std::io::Error),
}

/// One byte-range edit: `[left, right)` is deleted, or replaced by the
/// vocabulary entry at `vocab` when present. `file` selects the target file
/// in multi-file bundles; single-file reduction ignores it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Patch {
    #[serde(rename = "l")]
    pub left: usize,
    #[serde(rename = "r")]
    pub right: usize,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub vocab: Option<usize>,
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<usize>,
}

impl Patch {
    pub fn delete(left: usize, right: usize) -> Self {
        Self {
            left,
            right,
            vocab: None,
            file: None,
        }
    }

    pub fn replace(left: usize, right: usize, vocab: usize) -> Self {
        Self {
            left,
            right,
            vocab: Some(vocab),
            file: None,
        }
    }

    pub fn overlaps(&self, other: &Patch) -> bool {
        self.left.max(other.left) < self.right.min(other.right)
    }
}

/// One candidate edit: a sorted list of disjoint patches, optionally tagged
/// with a type (a vocabulary index) for pass-internal grouping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<usize>,
    #[serde(rename = "p")]
    pub patches: Vec<Patch>,
}

impl Hint {
    pub fn delete(left: usize, right: usize) -> Self {
        Self {
            type_id: None,
            patches: vec![Patch::delete(left, right)],
        }
    }

    pub fn typed_delete(type_id: usize, left: usize, right: usize) -> Self {
        Self {
            type_id: Some(type_id),
            patches: vec![Patch::delete(left, right)],
        }
    }
}

/// The full hint output of one pass invocation. Hints reference the
/// vocabulary by index; vocabulary ids are local to the bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HintBundle {
    pub vocabulary: Vec<String>,
    pub hints: Vec<Hint>,
}

impl HintBundle {
    pub fn new(vocabulary: Vec<String>, hints: Vec<Hint>) -> Self {
        Self { vocabulary, hints }
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    /// Resolve a hint's type tag to its vocabulary string. Untyped hints
    /// share the empty type.
    pub fn type_name(&self, hint: &Hint) -> &str {
        hint.type_id
            .and_then(|t| self.vocabulary.get(t))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Sort hints by (first-patch left, first-patch right) and drop exact
    /// duplicates. Passes must hand the engine a sorted bundle; doing it
    /// here keeps every producer honest.
    pub fn sort_and_dedup(&mut self) {
        self.hints
            .sort_by(|a, b| a.patches.cmp(&b.patches).then(a.type_id.cmp(&b.type_id)));
        self.hints.dedup();
    }

    /// Check every structural invariant against the file the hints were
    /// generated from. Any violation makes the whole bundle unusable.
    pub fn validate(&self, file_len: usize) -> Result<(), HintError> {
        for hint in &self.hints {
            if hint.patches.is_empty() {
                return Err(HintError::UnsortedPatches);
            }
            let mut prev_end = 0usize;
            for (i, patch) in hint.patches.iter().enumerate() {
                if patch.left >= patch.right || patch.right > file_len {
                    return Err(HintError::BadRange {
                        left: patch.left,
                        right: patch.right,
                        file_len,
                    });
                }
                if i > 0 && patch.left < prev_end {
                    return Err(HintError::UnsortedPatches);
                }
                prev_end = patch.right;
                for index in [patch.vocab, patch.file].into_iter().flatten() {
                    if index >= self.vocabulary.len() {
                        return Err(HintError::BadVocabIndex {
                            index,
                            len: self.vocabulary.len(),
                        });
                    }
                }
            }
            if let Some(t) = hint.type_id {
                if t >= self.vocabulary.len() {
                    return Err(HintError::BadVocabIndex {
                        index: t,
                        len: self.vocabulary.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Parse a bundle from helper output. The unified framing puts a JSON array
/// (the vocabulary) on the first non-blank line, followed by one hint object
/// per line; the legacy framing omits the vocabulary and starts straight
/// with hint objects.
pub fn parse_bundle(reader: impl BufRead) -> Result<HintBundle, HintError> {
    let mut bundle = HintBundle::default();
    let mut saw_first = false;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !saw_first {
            saw_first = true;
            if trimmed.starts_with('[') {
                bundle.vocabulary = serde_json::from_str(trimmed)
                    .map_err(|e| HintError::BadVocabulary(e.to_string()))?;
                continue;
            }
        }
        let hint: Hint = serde_json::from_str(trimmed).map_err(|e| HintError::Malformed {
            line: lineno + 1,
            message: e.to_string(),
        })?;
        bundle.hints.push(hint);
    }
    Ok(bundle)
}
