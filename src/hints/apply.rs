/// Overlap-safe application of hint sets to a byte buffer
use super::bundle::{Hint, HintError, Patch};
use std::collections::BTreeMap;

/// Pick a maximal non-overlapping subset of `hints`, first come, first kept,
/// in source order. Deterministic by construction: the outcome depends only
/// on the order of the slice, never on timing.
pub fn select_nonoverlapping<'a>(hints: impl IntoIterator<Item = &'a Hint>) -> Vec<&'a Hint> {
    // left -> right of every accepted patch; entries never overlap, so the
    // predecessor by left position is the only collision candidate.
    let mut occupied: BTreeMap<usize, usize> = BTreeMap::new();
    let mut selected = Vec::new();
    for hint in hints {
        let collides = hint.patches.iter().any(|p| {
            occupied
                .range(..p.right)
                .next_back()
                .is_some_and(|(_, &right)| right > p.left)
        });
        if collides {
            continue;
        }
        for p in &hint.patches {
            occupied.insert(p.left, p.right);
        }
        selected.push(hint);
    }
    selected
}

/// Apply a set of hints to `data`, producing the edited buffer. The patches
/// of all hints together must be non-overlapping; use
/// [`select_nonoverlapping`] first when the set comes from a chunk.
///
/// Applying the empty set is the identity; applying a valid set is
/// order-independent.
pub fn apply_hints<'a>(
    data: &[u8],
    hints: impl IntoIterator<Item = &'a Hint>,
    vocabulary: &[String],
) -> Result<Vec<u8>, HintError> {
    let mut patches: Vec<&Patch> = hints.into_iter().flat_map(|h| h.patches.iter()).collect();
    patches.sort_by_key(|p| (p.left, p.right));

    let mut out = Vec::with_capacity(data.len());
    let mut cursor = 0usize;
    for patch in patches {
        if patch.left < cursor {
            return Err(HintError::OverlappingPatches { at: patch.left });
        }
        if patch.right > data.len() {
            return Err(HintError::BadRange {
                left: patch.left,
                right: patch.right,
                file_len: data.len(),
            });
        }
        out.extend_from_slice(&data[cursor..patch.left]);
        if let Some(v) = patch.vocab {
            let text = vocabulary.get(v).ok_or(HintError::BadVocabIndex {
                index: v,
                len: vocabulary.len(),
            })?;
            out.extend_from_slice(text.as_bytes());
        }
        cursor = patch.right;
    }
    out.extend_from_slice(&data[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_identity() {
        let out = apply_hints(b"hello", std::iter::empty::<&Hint>(), &[]).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn single_deletion() {
        let hint = Hint::delete(2, 4);
        let out = apply_hints(b"AABBCC", [&hint], &[]).unwrap();
        assert_eq!(out, b"AACC");
    }

    #[test]
    fn replacement_uses_vocabulary() {
        let hint = Hint {
            type_id: None,
            patches: vec![Patch::replace(0, 5, 0)],
        };
        let out = apply_hints(b"hello world", [&hint], &["bye".to_string()]).unwrap();
        assert_eq!(out, b"bye world");
    }

    #[test]
    fn bulk_apply_equals_one_by_one() {
        let data = b"int a; int b; int c;\n";
        let hints = vec![Hint::delete(0, 7), Hint::delete(14, 20)];

        let bulk = apply_hints(data, &hints, &[]).unwrap();

        // One-by-one in source order, re-deriving offsets after each edit.
        let first = apply_hints(data, [&hints[0]], &[]).unwrap();
        let shifted = Hint::delete(14 - 7, 20 - 7);
        let serial = apply_hints(&first, [&shifted], &[]).unwrap();
        assert_eq!(bulk, serial);
        assert_eq!(bulk, b"int b; \n");
    }

    #[test]
    fn overlapping_patches_are_rejected() {
        let hints = vec![Hint::delete(0, 3), Hint::delete(2, 5)];
        assert!(matches!(
            apply_hints(b"ABCDEF", &hints, &[]),
            Err(HintError::OverlappingPatches { .. })
        ));
    }

    #[test]
    fn select_drops_second_of_overlapping_pair() {
        let hints = vec![Hint::delete(0, 3), Hint::delete(2, 5), Hint::delete(5, 6)];
        let selected = select_nonoverlapping(&hints);
        assert_eq!(selected, vec![&hints[0], &hints[2]]);
    }

    #[test]
    fn select_checks_every_patch_of_a_hint() {
        // The second hint's first patch fits in a gap but its second patch
        // collides, so the whole hint must be dropped.
        let a = Hint {
            type_id: None,
            patches: vec![Patch::delete(0, 2), Patch::delete(8, 10)],
        };
        let b = Hint {
            type_id: None,
            patches: vec![Patch::delete(3, 5), Patch::delete(9, 11)],
        };
        let hints = vec![a, b];
        let selected = select_nonoverlapping(&hints);
        assert_eq!(selected, vec![&hints[0]]);
    }

    #[test]
    fn touching_patches_do_not_overlap() {
        let hints = vec![Hint::delete(0, 3), Hint::delete(3, 6)];
        let selected = select_nonoverlapping(&hints);
        assert_eq!(selected.len(), 2);
        let out = apply_hints(b"ABCDEF", selected, &[]).unwrap();
        assert_eq!(out, b"");
    }
}
