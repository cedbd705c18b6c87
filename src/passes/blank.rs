/// Blank-line and preprocessor-line removal pass
use crate::hints::{Hint, HintBundle};
use crate::passes::hint_based::HintSource;
use crate::types::{Fur, PassResult};

const TYPE_BLANKLINE: usize = 0;
const TYPE_HASHLINE: usize = 1;

pub struct BlankSource;

impl HintSource for BlankSource {
    fn generate(&self, fur: &Fur) -> PassResult<HintBundle> {
        let mut hints = Vec::new();
        let mut pos = 0usize;
        for line in fur.data().split_inclusive(|&b| b == b'\n') {
            let end = pos + line.len();
            if line.iter().all(|b| b.is_ascii_whitespace()) && !line.is_empty() {
                hints.push(Hint::typed_delete(TYPE_BLANKLINE, pos, end));
            } else if line.first() == Some(&b'#') {
                hints.push(Hint::typed_delete(TYPE_HASHLINE, pos, end));
            }
            pos = end;
        }
        // Vocabulary order must match the type ids above.
        let vocab = vec!["blankline".to_string(), "hashline".to_string()];
        Ok(HintBundle::new(vocab, hints))
    }
}
