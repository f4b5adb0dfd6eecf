// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Source positions.
//!
//! Positions map instructions back to source lines. Inlining chains them:
//! a position introduced by an inlined procedure gains the call site's
//! position as its parent, so the ancestry of a position records the stack
//! of inlinings that produced the code it annotates.

/// A source file/line annotation with an optional parent chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub parent: Option<Box<SourcePos>>,
}

impl SourcePos {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        SourcePos { file: file.into(), line, parent: None }
    }

    pub fn with_parent(file: impl Into<String>, line: u32, parent: SourcePos) -> Self {
        SourcePos { file: file.into(), line, parent: Some(Box::new(parent)) }
    }

    /// Attach `parent`, first-writer-wins: a parent recorded by an earlier
    /// inlining is never overwritten.
    pub fn adopt_parent(&mut self, parent: &SourcePos) {
        if self.parent.is_none() {
            self.parent = Some(Box::new(parent.clone()));
        }
    }

    /// The outermost position in the parent chain.
    pub fn root(&self) -> &SourcePos {
        let mut cur = self;
        while let Some(parent) = &cur.parent {
            cur = parent;
        }
        cur
    }

    /// Number of positions in the parent chain, self included.
    pub fn depth(&self) -> usize {
        let mut n = 1;
        let mut cur = self;
        while let Some(parent) = &cur.parent {
            n += 1;
            cur = parent;
        }
        n
    }
}
