/// Shared machinery for hint-producing passes
use crate::hints::{apply_hints, select_nonoverlapping, HintBundle, SearchState};
use crate::types::{Fur, PassError, PassResult};
use crate::passes::{Pass, PassKind, PassState, TransformResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Produces the hint bundle a [`HintBasedPass`] enumerates over. The pass
/// contributes only this; states are generated by the search driver.
pub trait HintSource: Send + Sync {
    fn check_prerequisites(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Generate all candidate edits for the current file, in source order.
    fn generate(&self, fur: &Fur) -> PassResult<HintBundle>;

    /// Search flavor over `hint_count` hints; binary search by default.
    fn elementary_state(&self, hint_count: usize) -> Option<SearchState> {
        SearchState::binary(hint_count)
    }
}

/// Hints of one type, sorted and deduplicated. The vocabulary is shared
/// with the originating bundle.
#[derive(Clone, Debug)]
pub struct TypedGroup {
    pub ty: String,
    pub bundle: HintBundle,
}

/// Cursor of a hint-based pass: one search per hint type, advanced in a
/// round-robin so no type starves while another binary-searches.
#[derive(Clone, Debug)]
pub struct HintState {
    groups: Arc<Vec<TypedGroup>>,
    cursors: Vec<TypeCursor>,
    ptr: usize,
}

#[derive(Clone, Copy, Debug)]
struct TypeCursor {
    group: usize,
    search: SearchState,
}

impl HintState {
    /// The chunk the current cursor denotes, for logging.
    pub fn describe(&self) -> String {
        let cursor = &self.cursors[self.ptr];
        let group = &self.groups[cursor.group];
        let prefix = if group.ty.is_empty() {
            String::new()
        } else {
            format!("{}: ", group.ty)
        };
        format!(
            "{}{}-{} out of {}",
            prefix,
            cursor.search.index(),
            cursor.search.end(),
            group.bundle.len()
        )
    }

    fn current(&self) -> (&TypedGroup, &SearchState) {
        let cursor = &self.cursors[self.ptr];
        (&self.groups[cursor.group], &cursor.search)
    }

    fn advance(&self) -> Option<HintState> {
        let mut cursors = self.cursors.clone();
        let mut ptr = self.ptr;
        match cursors[ptr].search.advance() {
            Some(next) => {
                cursors[ptr].search = next;
                ptr = (ptr + 1) % cursors.len();
            }
            None => {
                cursors.remove(ptr);
                if cursors.is_empty() {
                    return None;
                }
                ptr %= cursors.len();
            }
        }
        Some(HintState {
            groups: Arc::clone(&self.groups),
            cursors,
            ptr,
        })
    }
}

/// Generic pass over a [`HintSource`]: groups hints by type, runs one
/// search per group, and applies overlap-safe chunks of hints.
pub struct HintBasedPass {
    name: String,
    max_transforms: Option<usize>,
    source: Box<dyn HintSource>,
}

impl HintBasedPass {
    pub fn new(name: impl Into<String>, source: Box<dyn HintSource>) -> Self {
        Self {
            name: name.into(),
            max_transforms: None,
            source,
        }
    }

    pub fn with_max_transforms(mut self, max_transforms: Option<usize>) -> Self {
        self.max_transforms = max_transforms;
        self
    }

    fn build_groups(&self, fur: &Fur) -> PassResult<Vec<TypedGroup>> {
        let bundle = self.source.generate(fur)?;
        bundle
            .validate(fur.data().len())
            .map_err(|e| PassError::Bug(format!("{}: {e}", self.name)))?;

        let mut by_type: BTreeMap<String, Vec<crate::hints::Hint>> = BTreeMap::new();
        for hint in &bundle.hints {
            by_type
                .entry(bundle.type_name(hint).to_string())
                .or_default()
                .push(hint.clone());
        }

        Ok(by_type
            .into_iter()
            .map(|(ty, hints)| {
                let mut sub = HintBundle::new(bundle.vocabulary.clone(), hints);
                sub.sort_and_dedup();
                TypedGroup { ty, bundle: sub }
            })
            .collect())
    }

    fn seed(&self, groups: Vec<TypedGroup>) -> Option<HintState> {
        let cursors: Vec<TypeCursor> = groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| {
                self.source
                    .elementary_state(g.bundle.len())
                    .map(|search| TypeCursor { group: i, search })
            })
            .collect();
        if cursors.is_empty() {
            return None;
        }
        Some(HintState {
            groups: Arc::new(groups),
            cursors,
            ptr: 0,
        })
    }
}

impl Pass for HintBasedPass {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> PassKind {
        PassKind::HintBased
    }

    fn max_transforms(&self) -> Option<usize> {
        self.max_transforms
    }

    fn check_prerequisites(&self) -> std::result::Result<(), String> {
        self.source.check_prerequisites()
    }

    fn new_state(&self, fur: &Fur) -> PassResult<Option<PassState>> {
        let groups = self.build_groups(fur)?;
        Ok(self.seed(groups).map(PassState::Hint))
    }

    fn advance(&self, state: &PassState) -> Option<PassState> {
        let PassState::Hint(state) = state else {
            return None;
        };
        state.advance().map(PassState::Hint)
    }

    fn transform(
        &self,
        data: &[u8],
        _sandbox_file: &Path,
        state: &PassState,
    ) -> PassResult<TransformResult> {
        let PassState::Hint(state) = state else {
            return Err(PassError::Bug(format!(
                "{}: unexpected state flavor",
                self.name
            )));
        };
        let (group, search) = state.current();
        let chunk = &group.bundle.hints[search.index()..search.end()];
        let selected = select_nonoverlapping(chunk);
        let variant = apply_hints(data, selected, &group.bundle.vocabulary)
            .map_err(|e| PassError::Bug(format!("{}: {e}", self.name)))?;
        if variant == data {
            return Ok(TransformResult::Invalid);
        }
        Ok(TransformResult::Ok(variant))
    }

    /// Regenerate the bundle against the committed file and resume every
    /// surviving type's search where it stood.
    fn advance_on_success(&self, fur: &Fur, state: &PassState) -> PassResult<Option<PassState>> {
        let PassState::Hint(old) = state else {
            return self.new_state(fur);
        };
        let groups = self.build_groups(fur)?;
        let mut cursors = Vec::new();
        for cursor in &old.cursors {
            let ty = &old.groups[cursor.group].ty;
            let Some((new_idx, group)) = groups
                .iter()
                .enumerate()
                .find(|(_, g)| &g.ty == ty)
            else {
                // Every hint of this type disappeared with the commit.
                continue;
            };
            if let Some(search) = cursor.search.advance_on_success(group.bundle.len()) {
                cursors.push(TypeCursor {
                    group: new_idx,
                    search,
                });
            }
        }
        if cursors.is_empty() {
            return Ok(None);
        }
        Ok(Some(PassState::Hint(HintState {
            groups: Arc::new(groups),
            cursors,
            ptr: 0,
        })))
    }
}
