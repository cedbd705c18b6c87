/// Comment-stripping pass: delete hints for block and line comments
use crate::hints::{Hint, HintBundle};
use crate::passes::hint_based::HintSource;
use crate::types::{Fur, PassResult};
use regex::bytes::Regex;

const TYPE_MULTILINE: usize = 0;
const TYPE_SINGLELINE: usize = 1;

pub struct CommentsSource {
    multi: Regex,
    single: Regex,
}

impl CommentsSource {
    pub fn new() -> Self {
        Self {
            // Block comments, including newlines in the body.
            multi: Regex::new(r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/").expect("static pattern"),
            // Line comments up to (excluding) the newline.
            single: Regex::new(r"(?m)//[^\n]*").expect("static pattern"),
        }
    }
}

impl Default for CommentsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HintSource for CommentsSource {
    fn generate(&self, fur: &Fur) -> PassResult<HintBundle> {
        let data = fur.data();
        let mut hints = Vec::new();
        for m in self.multi.find_iter(data) {
            hints.push(Hint::typed_delete(TYPE_MULTILINE, m.start(), m.end()));
        }
        for m in self.single.find_iter(data) {
            hints.push(Hint::typed_delete(TYPE_SINGLELINE, m.start(), m.end()));
        }
        // Vocabulary order must match the type ids above.
        let vocab = vec!["multi-line".to_string(), "single-line".to_string()];
        Ok(HintBundle::new(vocab, hints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hints::apply_hints;

    fn fur_with(contents: &[u8]) -> (tempfile::TempDir, Fur) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.c");
        std::fs::write(&path, contents).unwrap();
        (dir, Fur::load(&path).unwrap())
    }

    #[test]
    fn finds_both_comment_kinds() {
        let (_dir, fur) = fur_with(b"/* keep */ int x; // drop\n");
        let bundle = CommentsSource::new().generate(&fur).unwrap();
        assert_eq!(bundle.hints.len(), 2);
        assert_eq!(bundle.type_name(&bundle.hints[0]), "multi-line");
        assert_eq!(bundle.type_name(&bundle.hints[1]), "single-line");

        let stripped = apply_hints(fur.data(), &bundle.hints, &bundle.vocabulary).unwrap();
        assert_eq!(stripped, b" int x; \n");
    }

    #[test]
    fn multiline_comment_spans_lines() {
        let (_dir, fur) = fur_with(b"/* a\n * b\n */int x;\n");
        let bundle = CommentsSource::new().generate(&fur).unwrap();
        assert_eq!(bundle.hints.len(), 1);
        assert_eq!(bundle.hints[0], Hint::typed_delete(0, 0, 13));
    }

    #[test]
    fn stars_inside_block_comment_do_not_end_it() {
        let (_dir, fur) = fur_with(b"/* ** x ** */y\n");
        let bundle = CommentsSource::new().generate(&fur).unwrap();
        assert_eq!(bundle.hints.len(), 1);
        assert_eq!(bundle.hints[0].patches[0].right, 13);
    }

    #[test]
    fn comment_free_input_yields_nothing() {
        let (_dir, fur) = fur_with(b"int x = 1 / 2;\n");
        let bundle = CommentsSource::new().generate(&fur).unwrap();
        assert!(bundle.is_empty());
    }
}
