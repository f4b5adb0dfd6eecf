// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Basic blocks and typed control edges.

use crate::{Instruction, SourcePos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u32);

/// One slot in a block's ordered entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Source-position marker; annotates the instructions that follow it.
    Position(SourcePos),
    Insn(Instruction),
}

/// A basic block: an ordered list of entries. Outgoing control flow lives on
/// the graph's edges, not in the block.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub entries: Vec<Entry>,
    pub(crate) preds: Vec<EdgeId>,
    pub(crate) succs: Vec<EdgeId>,
}

impl Block {
    pub(crate) fn new(id: BlockId) -> Self {
        Block { id, entries: Vec::new(), preds: Vec::new(), succs: Vec::new() }
    }

    /// Instructions with their entry indices, skipping position markers.
    pub fn insn_indices(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.entries.iter().enumerate().filter_map(|(idx, e)| match e {
            Entry::Insn(insn) => Some((idx, insn)),
            Entry::Position(_) => None,
        })
    }

    pub fn insns(&self) -> impl Iterator<Item = &Instruction> {
        self.insn_indices().map(|(_, insn)| insn)
    }

    pub fn insns_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.entries.iter_mut().filter_map(|e| match e {
            Entry::Insn(insn) => Some(insn),
            Entry::Position(_) => None,
        })
    }

    pub fn num_insns(&self) -> usize {
        self.insns().count()
    }

    pub fn first_insn(&self) -> Option<(usize, &Instruction)> {
        self.insn_indices().next()
    }

    pub fn last_insn(&self) -> Option<(usize, &Instruction)> {
        self.insn_indices().last()
    }

    pub fn first_insn_idx(&self) -> Option<usize> {
        self.first_insn().map(|(idx, _)| idx)
    }

    pub fn last_insn_idx(&self) -> Option<usize> {
        self.last_insn().map(|(idx, _)| idx)
    }

    pub fn starts_with_position(&self) -> bool {
        matches!(self.entries.first(), Some(Entry::Position(_)))
    }

    pub fn prepend_position(&mut self, pos: SourcePos) {
        self.entries.insert(0, Entry::Position(pos));
    }

    pub fn positions(&self) -> impl Iterator<Item = &SourcePos> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Position(pos) => Some(pos),
            Entry::Insn(_) => None,
        })
    }

    pub fn positions_mut(&mut self) -> impl Iterator<Item = &mut SourcePos> {
        self.entries.iter_mut().filter_map(|e| match e {
            Entry::Position(pos) => Some(pos),
            Entry::Insn(_) => None,
        })
    }
}

/// Catch information carried by a throw edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrowInfo {
    /// Exception type caught by the target handler; `None` is a catch-all.
    pub catch_type: Option<String>,
    /// Position in the block's handler trial order.
    pub index: u32,
}

/// Edge type. A block has at most one `Goto` successor; `Branch` edges carry
/// their case key (`None` = default); `Throw` edges form the ordered catch
/// chain; `Ghost` edges only connect real exits to a synthetic exit block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    Goto,
    Branch { case: Option<i64> },
    Throw(ThrowInfo),
    Ghost,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EdgeId,
    pub src: BlockId,
    pub dst: BlockId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn is_goto(&self) -> bool {
        matches!(self.kind, EdgeKind::Goto)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, EdgeKind::Branch { .. })
    }

    pub fn is_throw(&self) -> bool {
        matches!(self.kind, EdgeKind::Throw(_))
    }

    pub fn is_ghost(&self) -> bool {
        matches!(self.kind, EdgeKind::Ghost)
    }

    pub fn throw_info(&self) -> Option<&ThrowInfo> {
        match &self.kind {
            EdgeKind::Throw(info) => Some(info),
            _ => None,
        }
    }
}
