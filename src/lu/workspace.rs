//! Per-step panel workspaces and their current/previous double-buffering.
//!
//! `spec.md` §3 describes `U_k`/`U_p` and `L_k`/`L_p` as pointers
//! "swapped between 'current' and 'previous' roles at each outer step
//! via pointer swap". DESIGN NOTES §9 is explicit that this must not
//! become reseatable raw pointers at an API boundary in the target
//! language; instead we hold two owning buffers per panel plus a
//! current/previous index, matching the note's first alternative.

/// A pair of same-shaped buffers, one holding the panel just produced
/// ("current"), one holding the panel from the previous outer step
/// ("previous"). [`PanelPair::swap`] flips the roles in O(1) without
/// moving any data.
pub struct PanelPair {
    buffers: [Vec<f64>; 2],
    current: usize,
}

impl PanelPair {
    pub fn new(capacity: usize) -> Self {
        PanelPair {
            buffers: [vec![0.0; capacity], vec![0.0; capacity]],
            current: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> &[f64] {
        &self.buffers[self.current]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut [f64] {
        &mut self.buffers[self.current]
    }

    #[inline]
    pub fn previous(&self) -> &[f64] {
        &self.buffers[1 - self.current]
    }

    /// Promotes "current" to "previous" for the next outer step. The
    /// buffer that was "previous" becomes the new "current" scratch
    /// space (its stale contents are overwritten before being read,
    /// since every write to `current_mut` happens before the matching
    /// read at the next step).
    #[inline]
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Splits into a mutable borrow of "current" and an immutable
    /// borrow of "previous" at the same time. The two halves are
    /// disjoint buffers, so this lets one thread broadcast a new panel
    /// into "current" while another concurrently reads "previous" for
    /// the bulk trailing update, without the borrow checker seeing a
    /// single aliased `&mut PanelPair`.
    #[inline]
    pub fn split_mut(&mut self) -> (&mut [f64], &[f64]) {
        let current = self.current;
        let (first, second) = self.buffers.split_at_mut(1);
        if current == 0 {
            (&mut first[0], &second[0])
        } else {
            (&mut second[0], &first[0])
        }
    }
}

/// All per-step workspaces held by a process during factorization,
/// per `spec.md` §3 "Per-step workspaces": the broadcast diagonal
/// block `lu_k`, the row-panel pair (`u`), the column-panel pair
/// (`l`), and the diagonal reciprocals `q`.
pub struct StepWorkspace {
    pub lu_k: Vec<f64>,
    pub u: PanelPair,
    pub l: PanelPair,
    pub q: Vec<f64>,
    block: usize,
}

impl StepWorkspace {
    /// `m` is the local square-buffer dimension (see `lu::pack`); the
    /// row/column panels are sized for the worst case (`block *
    /// (m - block)` generously rounded to `block * m`), since their
    /// live width shrinks by one block each outer step and callers
    /// only ever read the logically valid prefix.
    pub fn new(block: usize, m: usize) -> Self {
        StepWorkspace {
            lu_k: vec![0.0; block * block],
            u: PanelPair::new(block * m),
            l: PanelPair::new(m * block),
            q: vec![0.0; block],
            block,
        }
    }

    pub fn block(&self) -> usize {
        self.block
    }
}
