// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! The editable control-flow graph.
//!
//! Blocks and edges live in arenas keyed by opaque ids. Structural edits
//! (splits, instruction removal, edge rewiring) keep both arenas and the
//! per-block pred/succ lists in agreement; `check_consistency` verifies the
//! agreement plus the throw-chain ordering invariants.

use std::collections::BTreeMap;

use crate::block::{Block, BlockId, Edge, EdgeId, EdgeKind, Entry, ThrowInfo};
use crate::error::CfgError;
use crate::insn::{Instruction, Reg};

/// A re-resolvable instruction position: block id plus entry index.
///
/// Positions are recomputed, never cached, across any mutating call that
/// touches the block's entry list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsnPos {
    pub block: BlockId,
    pub idx: usize,
}

impl InsnPos {
    pub fn new(block: BlockId, idx: usize) -> Self {
        InsnPos { block, idx }
    }
}

/// A procedure's control-flow graph. `Clone` produces a deep, fully
/// independent copy.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: BTreeMap<BlockId, Block>,
    edges: BTreeMap<EdgeId, Edge>,
    entry: BlockId,
    exit: Option<BlockId>,
    registers_size: u32,
    next_block: u32,
    next_edge: u32,
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFlowGraph {
    /// A graph holding a single empty entry block.
    pub fn new() -> Self {
        let entry = BlockId(0);
        let mut blocks = BTreeMap::new();
        blocks.insert(entry, Block::new(entry));
        ControlFlowGraph {
            blocks,
            edges: BTreeMap::new(),
            entry,
            exit: None,
            registers_size: 0,
            next_block: 1,
            next_edge: 0,
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn entry_block(&self) -> BlockId {
        self.entry
    }

    /// The synthetic exit block, if one was installed.
    pub fn exit_block(&self) -> Option<BlockId> {
        self.exit
    }

    pub fn set_exit(&mut self, exit: Option<BlockId>) {
        self.exit = exit;
    }

    pub fn block(&self, id: BlockId) -> &Block {
        match self.blocks.get(&id) {
            Some(b) => b,
            None => panic!("unknown block b{}", id.0),
        }
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match self.blocks.get_mut(&id) {
            Some(b) => b,
            None => panic!("unknown block b{}", id.0),
        }
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        match self.edges.get(&id) {
            Some(e) => e,
            None => panic!("unknown edge e{}", id.0),
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.values_mut()
    }

    /// Block ids in ascending order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn succ_edges(&self, block: BlockId) -> impl Iterator<Item = &Edge> {
        self.block(block).succs.iter().map(|id| self.edge(*id))
    }

    pub fn pred_edges(&self, block: BlockId) -> impl Iterator<Item = &Edge> {
        self.block(block).preds.iter().map(|id| self.edge(*id))
    }

    pub fn pred_edge_ids(&self, block: BlockId) -> Vec<EdgeId> {
        self.block(block).preds.clone()
    }

    pub fn pred_count(&self, block: BlockId) -> usize {
        self.block(block).preds.len()
    }

    pub fn goto_succ_edge(&self, block: BlockId) -> Option<&Edge> {
        self.succ_edges(block).find(|e| e.is_goto())
    }

    /// The fallthrough target of `block`, if it has a goto successor.
    pub fn goto_target(&self, block: BlockId) -> Option<BlockId> {
        self.goto_succ_edge(block).map(|e| e.dst)
    }

    pub fn branch_succ_edges(&self, block: BlockId) -> Vec<&Edge> {
        self.succ_edges(block).filter(|e| e.is_branch()).collect()
    }

    /// Outgoing throw edges sorted by catch index: the handler trial order.
    pub fn throw_succs_in_order(&self, block: BlockId) -> Vec<&Edge> {
        let mut throws: Vec<&Edge> = self.succ_edges(block).filter(|e| e.is_throw()).collect();
        throws.sort_by_key(|e| e.throw_info().map(|t| t.index));
        throws
    }

    pub fn has_throw_succ(&self, block: BlockId) -> bool {
        self.succ_edges(block).any(|e| e.is_throw())
    }

    pub fn goto_pred_edges(&self, block: BlockId) -> Vec<&Edge> {
        self.pred_edges(block).filter(|e| e.is_goto()).collect()
    }

    pub fn has_ghost_pred(&self, block: BlockId) -> bool {
        self.pred_edges(block).any(|e| e.is_ghost())
    }

    /// Blocks whose last instruction is a return, in ascending id order.
    pub fn return_blocks(&self) -> Vec<BlockId> {
        self.blocks
            .values()
            .filter(|b| b.last_insn().is_some_and(|(_, insn)| insn.is_return()))
            .map(|b| b.id)
            .collect()
    }

    // ── Registers ───────────────────────────────────────────────────

    pub fn registers_size(&self) -> u32 {
        self.registers_size
    }

    pub fn set_registers_size(&mut self, size: u32) {
        self.registers_size = size;
    }

    /// Reserve a fresh register past the current file.
    pub fn alloc_temp_reg(&mut self) -> Reg {
        let reg = self.registers_size;
        self.registers_size += 1;
        reg
    }

    /// Reset the register-file size to the highest referenced register + 1.
    pub fn recompute_registers_size(&mut self) {
        let mut max: Option<Reg> = None;
        for block in self.blocks.values() {
            for insn in block.insns() {
                for &src in &insn.srcs {
                    max = Some(max.map_or(src, |m: Reg| m.max(src)));
                }
                if let Some(dest) = insn.dest {
                    max = Some(max.map_or(dest, |m: Reg| m.max(dest)));
                }
            }
        }
        self.registers_size = max.map_or(0, |m| m + 1);
    }

    // ── Instruction access ──────────────────────────────────────────

    pub fn insn_at(&self, pos: InsnPos) -> &Instruction {
        match self.block(pos.block).entries.get(pos.idx) {
            Some(Entry::Insn(insn)) => insn,
            _ => panic!("b{}[{}] is not an instruction", pos.block.0, pos.idx),
        }
    }

    pub fn insn_at_mut(&mut self, pos: InsnPos) -> &mut Instruction {
        match self.block_mut(pos.block).entries.get_mut(pos.idx) {
            Some(Entry::Insn(insn)) => insn,
            _ => panic!("b{}[{}] is not an instruction", pos.block.0, pos.idx),
        }
    }

    pub fn first_insn_pos(&self, block: BlockId) -> Option<InsnPos> {
        self.block(block).first_insn_idx().map(|idx| InsnPos::new(block, idx))
    }

    pub fn last_insn_pos(&self, block: BlockId) -> Option<InsnPos> {
        self.block(block).last_insn_idx().map(|idx| InsnPos::new(block, idx))
    }

    /// First instruction matching `pred`, scanning blocks in id order.
    pub fn find_insn(&self, pred: impl Fn(&Instruction) -> bool) -> Option<InsnPos> {
        for block in self.blocks.values() {
            for (idx, insn) in block.insn_indices() {
                if pred(insn) {
                    return Some(InsnPos::new(block.id, idx));
                }
            }
        }
        None
    }

    /// The `MoveResult` consuming `call_pos`'s value: the next instruction
    /// after the call in its block, or the first instruction of the goto
    /// target when the call is block-terminal. `None` if that instruction is
    /// not a `MoveResult`.
    pub fn move_result_of(&self, call_pos: InsnPos) -> Option<InsnPos> {
        let block = self.block(call_pos.block);
        for (idx, insn) in block.insn_indices() {
            if idx > call_pos.idx {
                return (insn.opcode == crate::Opcode::MoveResult)
                    .then_some(InsnPos::new(call_pos.block, idx));
            }
        }
        let target = self.goto_target(call_pos.block)?;
        let (idx, insn) = self.block(target).first_insn()?;
        (insn.opcode == crate::Opcode::MoveResult).then_some(InsnPos::new(target, idx))
    }

    // ── Block mutators ──────────────────────────────────────────────

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.insert(id, Block::new(id));
        id
    }

    /// Remove a block and every edge incident to it.
    pub fn remove_block(&mut self, block: BlockId) {
        let mut incident: Vec<EdgeId> = {
            let b = self.block(block);
            b.preds.iter().chain(b.succs.iter()).copied().collect()
        };
        incident.sort();
        incident.dedup();
        for edge in incident {
            self.remove_edge(edge);
        }
        self.blocks.remove(&block);
    }

    /// Split `pos.block` right after the instruction at `pos`. The
    /// instruction stays last in the old block; the tail entries and all of
    /// the old block's successor edges move to a fresh block, and the old
    /// block falls through to it via a new goto edge. Returns the new block.
    pub fn split_block(&mut self, pos: InsnPos) -> BlockId {
        debug_assert!(matches!(
            self.block(pos.block).entries.get(pos.idx),
            Some(Entry::Insn(_))
        ));
        let new_block = self.add_block();
        let tail = self.block_mut(pos.block).entries.split_off(pos.idx + 1);
        self.block_mut(new_block).entries = tail;

        // successor edges follow the tail
        let moved = std::mem::take(&mut self.block_mut(pos.block).succs);
        for &edge in &moved {
            match self.edges.get_mut(&edge) {
                Some(e) => e.src = new_block,
                None => panic!("unknown edge e{}", edge.0),
            }
        }
        self.block_mut(new_block).succs = moved;

        self.add_goto_edge(pos.block, new_block);
        new_block
    }

    /// Insert instructions ahead of the one at `pos`.
    pub fn insert_before(&mut self, pos: InsnPos, insns: Vec<Instruction>) {
        let entries = &mut self.block_mut(pos.block).entries;
        assert!(pos.idx <= entries.len(), "insertion point out of range");
        entries.splice(pos.idx..pos.idx, insns.into_iter().map(Entry::Insn));
    }

    /// Remove the instruction at `pos`, along with the edges it solely
    /// justified: a throwing terminal takes its throw edges with it, a branch
    /// terminal its branch edges. Goto edges are untouched.
    pub fn remove_insn(&mut self, pos: InsnPos) {
        let was_last = self.block(pos.block).last_insn_idx() == Some(pos.idx);
        let insn = match self.block(pos.block).entries.get(pos.idx) {
            Some(Entry::Insn(insn)) => insn.clone(),
            _ => panic!("b{}[{}] is not an instruction", pos.block.0, pos.idx),
        };
        self.block_mut(pos.block).entries.remove(pos.idx);
        if was_last {
            if insn.can_throw() {
                let throws: Vec<EdgeId> = self
                    .succ_edges(pos.block)
                    .filter(|e| e.is_throw())
                    .map(|e| e.id)
                    .collect();
                for edge in throws {
                    self.remove_edge(edge);
                }
            }
            if insn.is_branch() {
                let branches: Vec<EdgeId> = self
                    .succ_edges(pos.block)
                    .filter(|e| e.is_branch())
                    .map(|e| e.id)
                    .collect();
                for edge in branches {
                    self.remove_edge(edge);
                }
            }
        }
    }

    // ── Edge mutators ───────────────────────────────────────────────

    fn add_edge(&mut self, src: BlockId, dst: BlockId, kind: EdgeKind) -> EdgeId {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        self.edges.insert(id, Edge { id, src, dst, kind });
        self.block_mut(src).succs.push(id);
        self.block_mut(dst).preds.push(id);
        id
    }

    pub fn add_goto_edge(&mut self, src: BlockId, dst: BlockId) -> EdgeId {
        assert!(
            self.goto_succ_edge(src).is_none(),
            "b{} already has a goto successor",
            src.0
        );
        self.add_edge(src, dst, EdgeKind::Goto)
    }

    pub fn add_branch_edge(&mut self, src: BlockId, dst: BlockId, case: Option<i64>) -> EdgeId {
        self.add_edge(src, dst, EdgeKind::Branch { case })
    }

    /// Append a throw edge to `src`'s catch chain. The chain's indices must
    /// stay strictly increasing and a catch-all may never gain successors.
    pub fn add_throw_edge(
        &mut self,
        src: BlockId,
        dst: BlockId,
        catch_type: Option<String>,
        index: u32,
    ) -> EdgeId {
        if let Some(last) = self.throw_succs_in_order(src).last() {
            let info = last.throw_info().map(|t| (t.catch_type.clone(), t.index));
            if let Some((last_type, last_index)) = info {
                assert!(
                    last_type.is_some(),
                    "b{} already ends its catch chain with a catch-all",
                    src.0
                );
                assert!(
                    index > last_index,
                    "catch index {} not past the chain end {} on b{}",
                    index,
                    last_index,
                    src.0
                );
            }
        }
        self.add_edge(src, dst, EdgeKind::Throw(ThrowInfo { catch_type, index }))
    }

    pub fn add_ghost_edge(&mut self, src: BlockId, dst: BlockId) -> EdgeId {
        self.add_edge(src, dst, EdgeKind::Ghost)
    }

    pub fn remove_edge(&mut self, edge: EdgeId) {
        let Some(e) = self.edges.remove(&edge) else {
            panic!("unknown edge e{}", edge.0);
        };
        self.block_mut(e.src).succs.retain(|id| *id != edge);
        self.block_mut(e.dst).preds.retain(|id| *id != edge);
    }

    /// Point an existing edge at a different destination, keeping its kind.
    pub fn retarget_edge(&mut self, edge: EdgeId, new_dst: BlockId) {
        let old_dst = self.edge(edge).dst;
        self.block_mut(old_dst).preds.retain(|id| *id != edge);
        match self.edges.get_mut(&edge) {
            Some(e) => e.dst = new_dst,
            None => panic!("unknown edge e{}", edge.0),
        }
        self.block_mut(new_dst).preds.push(edge);
    }

    pub fn delete_succ_gotos(&mut self, block: BlockId) {
        let gotos: Vec<EdgeId> = self
            .succ_edges(block)
            .filter(|e| e.is_goto())
            .map(|e| e.id)
            .collect();
        for edge in gotos {
            self.remove_edge(edge);
        }
    }

    pub fn delete_pred_edges(&mut self, block: BlockId) {
        for edge in self.pred_edge_ids(block) {
            self.remove_edge(edge);
        }
    }

    // ── Ownership transfer ──────────────────────────────────────────

    /// Move every block and edge out of `donor` into this graph under fresh
    /// ids allocated past the current maxima. Returns the old-to-new block
    /// id mapping. The donor is left empty and must not be used as a graph
    /// again; register sizes are deliberately untouched.
    pub fn absorb(&mut self, donor: &mut ControlFlowGraph) -> BTreeMap<BlockId, BlockId> {
        let mut block_map: BTreeMap<BlockId, BlockId> = BTreeMap::new();
        let mut edge_map: BTreeMap<EdgeId, EdgeId> = BTreeMap::new();

        for (old, mut block) in std::mem::take(&mut donor.blocks) {
            let id = BlockId(self.next_block);
            self.next_block += 1;
            block.id = id;
            block_map.insert(old, id);
            self.blocks.insert(id, block);
        }
        for (old, mut edge) in std::mem::take(&mut donor.edges) {
            let id = EdgeId(self.next_edge);
            self.next_edge += 1;
            edge.id = id;
            edge.src = block_map[&edge.src];
            edge.dst = block_map[&edge.dst];
            edge_map.insert(old, id);
            self.edges.insert(id, edge);
        }
        for new_id in block_map.values() {
            let block = match self.blocks.get_mut(new_id) {
                Some(b) => b,
                None => panic!("unknown block b{}", new_id.0),
            };
            for edge in block.preds.iter_mut().chain(block.succs.iter_mut()) {
                *edge = edge_map[edge];
            }
        }
        block_map
    }

    // ── Consistency ─────────────────────────────────────────────────

    /// Verify the arena/list agreement and the edge-shape invariants.
    pub fn check_consistency(&self) -> Result<(), CfgError> {
        if !self.blocks.contains_key(&self.entry) {
            return Err(CfgError::MissingEntry(self.entry.0));
        }
        for edge in self.edges.values() {
            for endpoint in [edge.src, edge.dst] {
                if !self.blocks.contains_key(&endpoint) {
                    return Err(CfgError::DanglingEndpoint { edge: edge.id.0, block: endpoint.0 });
                }
            }
            if !self.blocks[&edge.src].succs.contains(&edge.id) {
                return Err(CfgError::DetachedEdge { edge: edge.id.0, block: edge.src.0 });
            }
            if !self.blocks[&edge.dst].preds.contains(&edge.id) {
                return Err(CfgError::DetachedEdge { edge: edge.id.0, block: edge.dst.0 });
            }
        }
        for block in self.blocks.values() {
            for &edge in block.preds.iter().chain(block.succs.iter()) {
                if !self.edges.contains_key(&edge) {
                    return Err(CfgError::StaleEdgeRef { block: block.id.0, edge: edge.0 });
                }
            }
            let gotos = self.succ_edges(block.id).filter(|e| e.is_goto()).count();
            if gotos > 1 {
                return Err(CfgError::MultipleGotos(block.id.0));
            }
            let throws = self.throw_succs_in_order(block.id);
            let mut prev: Option<&ThrowInfo> = None;
            for edge in &throws {
                let info = match edge.throw_info() {
                    Some(info) => info,
                    None => continue,
                };
                if let Some(prev) = prev {
                    if prev.catch_type.is_none() {
                        return Err(CfgError::ThrowAfterCatchAll(block.id.0));
                    }
                    if info.index <= prev.index {
                        return Err(CfgError::ThrowOrder { block: block.id.0, index: info.index });
                    }
                }
                prev = Some(info);
            }
        }
        Ok(())
    }
}
