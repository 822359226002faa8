//! Runtime matching of compiled signatures against a scan window.
//!
//! The caller hands over one window of bytes per signature: the opening
//! window of the file for BOF-relative and variable signatures, the
//! closing window for EOF-relative ones. Subsequences are placed greedily
//! in anchor order, each one leftmost (or rightmost, scanning backward)
//! past the previous placement; fragments around each anchor are resolved
//! by backtracking over their gap windows, smallest gap first,
//! alternatives in declaration order.

use super::compiler::{Anchor, CompiledSignature, Fragment, SubSequence};

/// A placed subsequence: the extent of the full match including
/// fragments, as a half-open byte range.
#[derive(Debug, Clone, Copy)]
struct Placement {
    start: usize,
    end: usize,
}

impl CompiledSignature {
    /// Tests the signature against its scan window.
    pub fn matches_window(&self, window: &[u8]) -> bool {
        match self.anchor {
            Anchor::BofOffset | Anchor::Variable => self.matches_forward(window),
            Anchor::EofOffset => self.matches_backward(window),
        }
    }

    fn matches_forward(&self, window: &[u8]) -> bool {
        let mut position = 0usize;
        for (index, subsequence) in self.subsequences.iter().enumerate() {
            let (floor, ceiling) = if index == 0 {
                let ceiling = match self.anchor {
                    Anchor::BofOffset => subsequence.max_offset,
                    _ => usize::MAX,
                };
                (subsequence.min_offset, ceiling)
            } else {
                // Subsequence boundaries always come from `*`, so only
                // the minimum distance is bounded.
                (position.saturating_add(subsequence.min_offset), usize::MAX)
            };
            match subsequence.find_forward(window, floor, ceiling) {
                Some(placement) => position = placement.end,
                None => return false,
            }
        }
        true
    }

    fn matches_backward(&self, window: &[u8]) -> bool {
        let mut position = window.len();
        for (index, subsequence) in self.subsequences.iter().enumerate().rev() {
            let (end_floor, end_ceiling) = if index == self.subsequences.len() - 1 {
                let ceiling = match window.len().checked_sub(subsequence.min_offset) {
                    Some(value) => value,
                    None => return false,
                };
                (window.len().saturating_sub(subsequence.max_offset), ceiling)
            } else {
                let ceiling = match position.checked_sub(subsequence.min_offset) {
                    Some(value) => value,
                    None => return false,
                };
                (0, ceiling)
            };
            match subsequence.find_backward(window, end_floor, end_ceiling) {
                Some(placement) => position = placement.start,
                None => return false,
            }
        }
        true
    }
}

impl SubSequence {
    /// Finds the leftmost placement whose extent starts within
    /// `[floor, ceiling]`.
    fn find_forward(&self, window: &[u8], floor: usize, ceiling: usize) -> Option<Placement> {
        let anchor_len = self.anchor.len();
        // The anchor can sit no further right than the extent ceiling
        // plus whatever the left fragments can span.
        let anchor_ceiling = ceiling.saturating_add(self.left_extent_max());
        let mut search_from = floor;
        while let Some(anchor_start) = self.anchor.find_forward(window, search_from) {
            if anchor_start > anchor_ceiling {
                return None;
            }
            let start = self.match_left(window, anchor_start, 0, floor, ceiling);
            if let Some(start) = start {
                if let Some(end) = self.match_right(window, anchor_start + anchor_len, 0) {
                    return Some(Placement { start, end });
                }
            }
            search_from = anchor_start + 1;
        }
        None
    }

    /// Finds the rightmost placement whose extent ends within
    /// `[end_floor, end_ceiling]`.
    fn find_backward(
        &self,
        window: &[u8],
        end_floor: usize,
        end_ceiling: usize,
    ) -> Option<Placement> {
        let anchor_len = self.anchor.len();
        if anchor_len > window.len() {
            return None;
        }
        // Mirror bound: the anchor's end can sit no further left than
        // the extent floor minus the right fragments' maximum span.
        let anchor_end_floor = end_floor.saturating_sub(self.right_extent_max());
        let mut last_start = end_ceiling.min(window.len().saturating_sub(anchor_len));
        loop {
            let anchor_start = self.anchor.find_backward(window, last_start)?;
            if anchor_start + anchor_len < anchor_end_floor {
                return None;
            }
            let end = self.match_right_bounded(
                window,
                anchor_start + anchor_len,
                0,
                end_floor,
                end_ceiling,
            );
            if let Some(end) = end {
                if let Some(start) = self.match_left_unbounded(window, anchor_start, 0) {
                    return Some(Placement { start, end });
                }
            }
            if anchor_start == 0 {
                return None;
            }
            last_start = anchor_start - 1;
        }
    }

    /// Resolves left fragment positions outward from `position`, trying
    /// gaps ascending. Succeeds only if the final extent start lands
    /// within `[floor, ceiling]`.
    fn match_left(
        &self,
        window: &[u8],
        position: usize,
        depth: usize,
        floor: usize,
        ceiling: usize,
    ) -> Option<usize> {
        let Some(alternatives) = self.left_fragments.get(depth) else {
            return (floor..=ceiling).contains(&position).then_some(position);
        };
        for fragment in alternatives {
            let length = fragment.matcher.len();
            for gap in fragment.min_gap..=fragment.max_gap {
                let Some(candidate) = position.checked_sub(gap + length) else {
                    break;
                };
                if candidate < floor.saturating_sub(self.left_extent_max_from(depth + 1)) {
                    break;
                }
                if fragment.matcher.matches_at(window, candidate) {
                    if let Some(start) = self.match_left(window, candidate, depth + 1, floor, ceiling)
                    {
                        return Some(start);
                    }
                }
            }
        }
        None
    }

    /// Left walk without extent bounds, used when scanning backward.
    fn match_left_unbounded(&self, window: &[u8], position: usize, depth: usize) -> Option<usize> {
        let Some(alternatives) = self.left_fragments.get(depth) else {
            return Some(position);
        };
        for fragment in alternatives {
            let length = fragment.matcher.len();
            for gap in fragment.min_gap..=fragment.max_gap {
                let Some(candidate) = position.checked_sub(gap + length) else {
                    break;
                };
                if fragment.matcher.matches_at(window, candidate) {
                    if let Some(start) = self.match_left_unbounded(window, candidate, depth + 1) {
                        return Some(start);
                    }
                }
            }
        }
        None
    }

    /// Resolves right fragment positions outward from `position`.
    fn match_right(&self, window: &[u8], position: usize, depth: usize) -> Option<usize> {
        let Some(alternatives) = self.right_fragments.get(depth) else {
            return Some(position);
        };
        for fragment in alternatives {
            let length = fragment.matcher.len();
            for gap in fragment.min_gap..=fragment.max_gap {
                let candidate = position.saturating_add(gap);
                if candidate + length > window.len() {
                    break;
                }
                if fragment.matcher.matches_at(window, candidate) {
                    if let Some(end) = self.match_right(window, candidate + length, depth + 1) {
                        return Some(end);
                    }
                }
            }
        }
        None
    }

    /// Right walk that must land the final extent end within
    /// `[floor, ceiling]`, used when scanning backward.
    fn match_right_bounded(
        &self,
        window: &[u8],
        position: usize,
        depth: usize,
        floor: usize,
        ceiling: usize,
    ) -> Option<usize> {
        let Some(alternatives) = self.right_fragments.get(depth) else {
            return (floor..=ceiling).contains(&position).then_some(position);
        };
        for fragment in alternatives {
            let length = fragment.matcher.len();
            for gap in fragment.min_gap..=fragment.max_gap {
                let candidate = position.saturating_add(gap);
                if candidate + length > window.len() || candidate + length > ceiling {
                    break;
                }
                if fragment.matcher.matches_at(window, candidate) {
                    if let Some(end) = self.match_right_bounded(
                        window,
                        candidate + length,
                        depth + 1,
                        floor,
                        ceiling,
                    ) {
                        return Some(end);
                    }
                }
            }
        }
        None
    }

    /// Widest span the left fragments can cover, all positions included.
    fn left_extent_max(&self) -> usize {
        self.left_extent_max_from(0)
    }

    fn left_extent_max_from(&self, depth: usize) -> usize {
        self.left_fragments[depth..]
            .iter()
            .map(|alternatives| widest(alternatives))
            .sum()
    }

    fn right_extent_max(&self) -> usize {
        self.right_fragments
            .iter()
            .map(|alternatives| widest(alternatives))
            .sum()
    }
}

fn widest(alternatives: &[Fragment]) -> usize {
    alternatives
        .iter()
        .map(|fragment| fragment.max_gap + fragment.matcher.len())
        .max()
        .unwrap_or(0)
}
