/// Search cursors over a hint list: halving binary search and bounded
/// sliding windows
use log::debug;

/// Classic delta-debugging cursor: try chunks of `chunk` consecutive hints
/// at `index = 0, chunk, 2*chunk, ...`; when a sweep completes, halve the
/// chunk and start over. Terminates after the sweep at chunk size 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryState {
    pub instances: usize,
    pub chunk: usize,
    pub index: usize,
}

impl BinaryState {
    pub fn create(instances: usize) -> Option<Self> {
        if instances == 0 {
            return None;
        }
        Some(Self {
            instances,
            chunk: instances,
            index: 0,
        })
    }

    pub fn end(&self) -> usize {
        (self.index + self.chunk).min(self.instances)
    }

    pub fn real_chunk(&self) -> usize {
        self.end() - self.index
    }

    pub fn advance(mut self) -> Option<Self> {
        self.index += self.chunk;
        if self.index >= self.instances {
            self.chunk /= 2;
            if self.chunk < 1 {
                return None;
            }
            debug!("granularity reduced to {}", self.chunk);
            self.index = 0;
        }
        Some(self)
    }

    /// After a commit the hint list shrank to `instances`. Keep the same
    /// chunk size and index: the next unprocessed chunk slid into place
    /// under the cursor when the committed hints disappeared.
    pub fn advance_on_success(mut self, instances: usize) -> Option<Self> {
        if instances == 0 {
            return None;
        }
        self.instances = instances;
        if self.index >= self.instances {
            self.advance()
        } else {
            Some(self)
        }
    }
}

/// Sliding-window cursor for token-removal style passes: enumerates every
/// window `[index, index + chunk)` with `chunk = 1..=max_chunk`, widening
/// the window when a width's sweep completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubsegmentState {
    pub instances: usize,
    pub chunk: usize,
    pub max_chunk: usize,
    pub index: usize,
}

impl SubsegmentState {
    pub fn create(instances: usize, max_chunk: usize) -> Option<Self> {
        if instances == 0 || max_chunk == 0 {
            return None;
        }
        Some(Self {
            instances,
            chunk: 1,
            max_chunk: max_chunk.min(instances),
            index: 0,
        })
    }

    pub fn end(&self) -> usize {
        (self.index + self.chunk).min(self.instances)
    }

    pub fn real_chunk(&self) -> usize {
        self.end() - self.index
    }

    pub fn advance(mut self) -> Option<Self> {
        self.index += 1;
        if self.index + self.chunk > self.instances {
            self.chunk += 1;
            if self.chunk > self.max_chunk || self.chunk > self.instances {
                return None;
            }
            self.index = 0;
        }
        Some(self)
    }

    pub fn advance_on_success(mut self, instances: usize) -> Option<Self> {
        if instances == 0 || self.chunk > instances {
            return None;
        }
        self.instances = instances;
        self.max_chunk = self.max_chunk.min(instances);
        if self.index + self.chunk > instances {
            self.index = 0;
        }
        Some(self)
    }
}

/// The cursor flavors a hint-based pass can enumerate with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    Binary(BinaryState),
    Subsegment(SubsegmentState),
}

impl SearchState {
    pub fn binary(instances: usize) -> Option<Self> {
        BinaryState::create(instances).map(SearchState::Binary)
    }

    pub fn subsegment(instances: usize, max_chunk: usize) -> Option<Self> {
        SubsegmentState::create(instances, max_chunk).map(SearchState::Subsegment)
    }

    pub fn index(&self) -> usize {
        match self {
            SearchState::Binary(s) => s.index,
            SearchState::Subsegment(s) => s.index,
        }
    }

    pub fn end(&self) -> usize {
        match self {
            SearchState::Binary(s) => s.end(),
            SearchState::Subsegment(s) => s.end(),
        }
    }

    pub fn advance(self) -> Option<Self> {
        match self {
            SearchState::Binary(s) => s.advance().map(SearchState::Binary),
            SearchState::Subsegment(s) => s.advance().map(SearchState::Subsegment),
        }
    }

    pub fn advance_on_success(self, instances: usize) -> Option<Self> {
        match self {
            SearchState::Binary(s) => s.advance_on_success(instances).map(SearchState::Binary),
            SearchState::Subsegment(s) => {
                s.advance_on_success(instances).map(SearchState::Subsegment)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_sweep(instances: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut state = BinaryState::create(instances);
        while let Some(s) = state {
            out.push((s.index, s.end()));
            state = s.advance();
        }
        out
    }

    #[test]
    fn binary_covers_whole_file_first() {
        let sweep = binary_sweep(8);
        assert_eq!(sweep[0], (0, 8));
        assert_eq!(&sweep[1..3], &[(0, 4), (4, 8)]);
    }

    #[test]
    fn binary_visits_every_singleton() {
        let sweep = binary_sweep(8);
        for i in 0..8 {
            assert!(sweep.contains(&(i, i + 1)), "singleton {i} never visited");
        }
    }

    #[test]
    fn binary_handles_non_power_of_two() {
        let sweep = binary_sweep(5);
        // chunk 5, then 2, then 1
        assert_eq!(sweep[0], (0, 5));
        assert_eq!(&sweep[1..4], &[(0, 2), (2, 4), (4, 5)]);
        for i in 0..5 {
            assert!(sweep.contains(&(i, i + 1)));
        }
    }

    #[test]
    fn binary_zero_instances_has_no_state() {
        assert!(BinaryState::create(0).is_none());
    }

    #[test]
    fn binary_success_keeps_cursor_in_place() {
        // Committed the chunk [0, 4) of 8: the remaining 4 hints slide to
        // the front and the cursor stays at index 0, same chunk size.
        let state = BinaryState {
            instances: 8,
            chunk: 4,
            index: 0,
        };
        let next = state.advance_on_success(4).unwrap();
        assert_eq!(next.index, 0);
        assert_eq!(next.chunk, 4);
        assert_eq!(next.instances, 4);
    }

    #[test]
    fn binary_success_past_end_halves() {
        let state = BinaryState {
            instances: 8,
            chunk: 4,
            index: 4,
        };
        // Only 4 hints remain, so index 4 is out of range; the sweep is
        // done and the chunk halves.
        let next = state.advance_on_success(4).unwrap();
        assert_eq!(next.chunk, 2);
        assert_eq!(next.index, 0);
    }

    #[test]
    fn subsegment_enumerates_windows_in_order() {
        let mut out = Vec::new();
        let mut state = SubsegmentState::create(3, 2);
        while let Some(s) = state {
            out.push((s.index, s.end()));
            state = s.advance();
        }
        assert_eq!(out, vec![(0, 1), (1, 2), (2, 3), (0, 2), (1, 3)]);
    }

    #[test]
    fn subsegment_caps_window_at_instances() {
        let state = SubsegmentState::create(2, 10).unwrap();
        assert_eq!(state.max_chunk, 2);
    }
}
