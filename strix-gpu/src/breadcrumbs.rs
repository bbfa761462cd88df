// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU breadcrumbs for crash diagnostics.
//!
//! A tree of named scopes over a fixed-capacity marker ring, recorded per
//! submission context. Walked only after a fatal GPU error to reconstruct
//! what was executing; never read on the synchronization path.

/// Sentinel meaning "no scope".
pub const NO_SCOPE: u32 = u32::MAX;

/// One named scope in the breadcrumb tree.
#[derive(Debug, Clone, Copy)]
pub struct BreadcrumbScope {
    /// CRC of the scope name, supplied precomputed by the caller.
    pub name_crc: u32,
    /// Marker-ring slot allocated when the scope was entered.
    pub marker_index: u32,
    /// First child scope, or `NO_SCOPE`.
    pub child: u32,
    /// Next sibling scope, or `NO_SCOPE`.
    pub sibling: u32,
}

pub struct BreadcrumbStack {
    context_id: i32,
    max_markers: u32,
    /// Write cursor into the marker ring; monotone, wraps modulo capacity.
    next_idx: u32,
    markers: Vec<u32>,
    scopes: Vec<BreadcrumbScope>,
    /// Indices of the scopes on the current path; the top entry may already
    /// be closed (`top_is_open == false`), in which case the next scope
    /// entered becomes its sibling rather than its child.
    scope_stack: Vec<u32>,
    top_is_open: bool,
    last_root: u32,
}

impl BreadcrumbStack {
    pub fn new(context_id: i32, max_markers: u32) -> Self {
        assert!(max_markers > 0, "breadcrumb ring capacity must be nonzero");
        Self {
            context_id,
            max_markers,
            next_idx: 0,
            markers: vec![0; max_markers as usize],
            scopes: Vec::new(),
            scope_stack: Vec::new(),
            top_is_open: false,
            last_root: NO_SCOPE,
        }
    }

    pub fn context_id(&self) -> i32 {
        self.context_id
    }

    pub fn scopes(&self) -> &[BreadcrumbScope] {
        &self.scopes
    }

    pub fn markers(&self) -> &[u32] {
        &self.markers
    }

    pub fn write_cursor(&self) -> u32 {
        self.next_idx
    }

    /// Enter a named scope; returns its index in the scope arena.
    pub fn begin_scope(&mut self, name_crc: u32) -> u32 {
        let index = self.scopes.len() as u32;
        let marker_index = self.allocate_marker(name_crc);
        self.scopes.push(BreadcrumbScope {
            name_crc,
            marker_index,
            child: NO_SCOPE,
            sibling: NO_SCOPE,
        });

        match self.scope_stack.last().copied() {
            Some(top) if self.top_is_open => {
                // Nested under an open scope.
                debug_assert_eq!(self.scopes[top as usize].child, NO_SCOPE);
                self.scopes[top as usize].child = index;
                self.scope_stack.push(index);
            }
            Some(top) => {
                // The previous scope at this level is closed; chain after it.
                self.scopes[top as usize].sibling = index;
                *self.scope_stack.last_mut().unwrap() = index;
            }
            None => {
                if self.last_root != NO_SCOPE {
                    self.scopes[self.last_root as usize].sibling = index;
                }
                self.last_root = index;
                self.scope_stack.push(index);
            }
        }

        self.top_is_open = true;
        index
    }

    /// Leave the innermost open scope.
    pub fn end_scope(&mut self) {
        debug_assert!(
            !self.scope_stack.is_empty(),
            "end_scope without matching begin_scope"
        );
        if self.top_is_open {
            self.top_is_open = false;
        } else {
            self.scope_stack.pop();
        }
    }

    /// Name CRCs of the scopes still open, outermost first.
    pub fn active_scopes(&self) -> Vec<u32> {
        let mut crcs: Vec<u32> = self
            .scope_stack
            .iter()
            .map(|&index| self.scopes[index as usize].name_crc)
            .collect();
        if !self.top_is_open {
            crcs.pop();
        }
        crcs
    }

    fn allocate_marker(&mut self, name_crc: u32) -> u32 {
        let slot = self.next_idx % self.max_markers;
        self.markers[slot as usize] = name_crc;
        self.next_idx = self.next_idx.wrapping_add(1);
        slot
    }
}
