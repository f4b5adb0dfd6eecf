// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Procedure inlining over the editable CFG.
//!
//! `inline_cfg` splices a copy of a callee's control-flow graph into a
//! caller at a call instruction, leaving a single connected graph with no
//! call behind: callee registers are shifted into fresh caller registers,
//! parameter loads become moves from the argument registers, returns become
//! moves into the caller's result register, and every throwing instruction
//! of the spliced body is wired to the handlers the call instruction could
//! reach, in the same trial order.
//!
//! The engine decides nothing about *whether* to inline; policy, budgets
//! and the call graph belong to the driving pass. Violated preconditions
//! are treated as pass-author bugs and abort via panic rather than
//! returning errors: a silently corrupted graph would miscompile.

mod plugin;
#[cfg(test)]
mod tests;

pub use plugin::{DefaultPlugin, InlinePlugin};

use std::collections::HashSet;

use magpie_ir::{
    Block, BlockId, ControlFlowGraph, Entry, InsnPos, Instruction, Opcode, Reg, SourcePos,
};

/// Inline `callee` at `callsite` with plain (default-plugin) behavior.
///
/// `callsite` must dereference to a call instruction inside `caller`;
/// `callee` must be a well-formed procedure graph (single entry, at least
/// one exit). The callee itself is never mutated and stays reusable at
/// other call sites.
pub fn inline_cfg(caller: &mut ControlFlowGraph, callsite: InsnPos, callee: &ControlFlowGraph) {
    let mut plugin = DefaultPlugin;
    inline_cfg_with(caller, callsite, callee, &mut plugin);
}

/// Inline `callee` at `callsite`, customized by `plugin`.
pub fn inline_cfg_with(
    caller: &mut ControlFlowGraph,
    callsite: InsnPos,
    callee_orig: &ControlFlowGraph,
    plugin: &mut dyn InlinePlugin,
) {
    let call_insn = caller.insn_at(callsite).clone();
    assert!(
        call_insn.opcode == Opcode::Invoke,
        "inline site b{}[{}] is not a call instruction",
        callsite.block.0,
        callsite.idx
    );

    // splice from a copy; the caller keeps ownership of everything after
    let mut callee = callee_orig.clone();
    remove_ghost_exit_block(&mut callee);

    // the call site sits in a try region: make every throwing callee
    // instruction block-terminal so it can receive catch edges later
    if caller.has_throw_succ(callsite.block) {
        split_on_callee_throws(&mut callee);
    }

    // saved here because the callee arena is emptied below
    let callee_entry = callee.entry_block();
    let callee_returns = callee.return_blocks();

    let inline_after = plugin.insert_after();

    // in before-mode the split invalidates the backward search, so capture first
    let mut callsite_pos = if inline_after { None } else { nearest_pos(caller, callsite) };

    let (call_block, continuation) = if inline_after {
        make_call_last(caller, callsite)
    } else {
        make_call_first(caller, callsite)
    };

    if inline_after {
        if let Some(pos) = caller.last_insn_pos(call_block) {
            callsite_pos = nearest_pos(caller, pos);
        }
    }

    if let Some(parent) = &callsite_pos {
        set_pos_parents(&mut callee, parent);
        // caller code after the splice keeps attributing to its original line
        if !caller.block(continuation).starts_with_position() {
            caller.block_mut(continuation).prepend_position(parent.clone());
        }
    }

    // re-resolve the call position after the splits and the marker prepend
    let call_pos = if inline_after {
        caller.last_insn_pos(call_block)
    } else {
        caller.first_insn_pos(call_block)
    };
    let call_pos = match call_pos {
        Some(pos) => pos,
        None => panic!("call instruction lost during block split"),
    };
    debug_assert_eq!(*caller.insn_at(call_pos), call_insn);

    plugin.before_remap(caller, &mut callee);

    // make the callee's registers disjoint from the caller's
    let callee_regs = callee.registers_size();
    let caller_regs = caller.registers_size();
    remap_registers(&mut callee, caller_regs);

    let srcs = match plugin.arg_sources() {
        Some(alt) => alt,
        None => call_insn.srcs.clone(),
    };
    move_arg_regs(&mut callee, &srcs);

    let mut return_reg = plugin.return_reg();
    if call_insn.expects_result() {
        let move_res = caller.move_result_of(call_pos);
        if return_reg.is_none() {
            return_reg = move_res.and_then(|pos| caller.insn_at(pos).dest);
        }
        // delete the result consumer before connecting the graphs because
        // its block may be merged into another
        if plugin.remove_call_site() {
            if let Some(pos) = move_res {
                caller.remove_insn(pos);
            }
        }
    }
    move_return_reg(&mut callee, return_reg);

    let need_recompute = plugin.after_remap(caller, &mut callee);

    // transfer ownership and reconnect
    let block_map = caller.absorb(&mut callee);
    let callee_entry = block_map[&callee_entry];
    let callee_exits: Vec<BlockId> = callee_returns.iter().map(|b| block_map[b]).collect();
    let callee_blocks: Vec<BlockId> = block_map.values().copied().collect();

    connect_cfgs(
        caller,
        inline_after,
        call_pos.block,
        &callee_blocks,
        callee_entry,
        &callee_exits,
        continuation,
    );

    if need_recompute {
        caller.recompute_registers_size();
    } else {
        caller.set_registers_size(caller_regs + callee_regs);
    }

    if plugin.remove_call_site() {
        // after reconnection, so the call's superseded throw edges go with it
        caller.remove_insn(call_pos);
    }

    #[cfg(debug_assertions)]
    if let Err(err) = caller.check_consistency() {
        panic!("inlining left a malformed caller graph: {err}");
    }
}

/// Drop the synthetic exit block some analyses append. It carries no real
/// instructions and hangs off the true exits by ghost edges only, so
/// removing it cannot disconnect them.
fn remove_ghost_exit_block(cfg: &mut ControlFlowGraph) {
    if let Some(exit) = cfg.exit_block() {
        if cfg.has_ghost_pred(exit) {
            cfg.remove_block(exit);
            cfg.set_exit(None);
        }
    }
}

/// Make the call the last instruction of its block. Returns the call's
/// block and the block the caller resumes in after the callee.
fn make_call_last(caller: &mut ControlFlowGraph, callsite: InsnPos) -> (BlockId, BlockId) {
    let block = callsite.block;
    if caller.block(block).last_insn_idx() != Some(callsite.idx) {
        caller.split_block(callsite);
    }
    let continuation = match caller.goto_target(block) {
        Some(b) => b,
        None => panic!("call block b{} has no fallthrough successor", block.0),
    };
    (block, continuation)
}

/// Make the call the first instruction of a block; the callee will run ahead
/// of it. Returns that block twice (it doubles as the continuation).
fn make_call_first(caller: &mut ControlFlowGraph, callsite: InsnPos) -> (BlockId, BlockId) {
    let block = callsite.block;
    if caller.block(block).first_insn_idx() == Some(callsite.idx) {
        return (block, block);
    }
    // plant a marker so the split leaves the call at the head of a new block
    caller.insert_before(callsite, vec![Instruction::nop()]);
    let new_block = caller.split_block(InsnPos::new(block, callsite.idx));
    (new_block, new_block)
}

/// Shift every callee operand past the caller's register file.
fn remap_registers(callee: &mut ControlFlowGraph, caller_regs_size: u32) {
    for block in callee.blocks_mut() {
        for insn in block.insns_mut() {
            for src in &mut insn.srcs {
                *src += caller_regs_size;
            }
            if let Some(dest) = &mut insn.dest {
                *dest += caller_regs_size;
            }
        }
    }
}

/// Convert the callee's parameter loads into moves from the actual argument
/// registers, matched positionally.
fn move_arg_regs(callee: &mut ControlFlowGraph, srcs: &[Reg]) {
    let entry = callee.entry_block();
    let mut i = 0;
    for insn in callee.block_mut(entry).insns_mut() {
        if insn.opcode != Opcode::LoadParam {
            continue;
        }
        let opcode = insn.opcode.load_param_to_move();
        let dest = insn.dest;
        *insn = Instruction { opcode, srcs: vec![srcs[i]], dest, literal: None };
        i += 1;
    }
}

/// Convert the callee's returns into moves into `return_reg`. A value-less
/// return, or any return when the caller never consumes the value, is
/// deleted outright.
fn move_return_reg(callee: &mut ControlFlowGraph, return_reg: Option<Reg>) {
    let mut to_delete: Vec<InsnPos> = Vec::new();
    for block in callee.block_ids() {
        let returns: Vec<usize> = callee
            .block(block)
            .insn_indices()
            .filter(|(_, insn)| insn.is_return())
            .map(|(idx, _)| idx)
            .collect();
        for idx in returns {
            let pos = InsnPos::new(block, idx);
            let ret = callee.insn_at(pos).clone();
            match (ret.opcode.return_to_move(), return_reg) {
                (Some(opcode), Some(reg)) => {
                    *callee.insn_at_mut(pos) = Instruction {
                        opcode,
                        srcs: vec![ret.srcs[0]],
                        dest: Some(reg),
                        literal: None,
                    };
                }
                _ => to_delete.push(pos),
            }
        }
    }
    // back-to-front so earlier removals don't shift pending positions
    to_delete.sort_by(|a, b| (b.block, b.idx).cmp(&(a.block, a.idx)));
    for pos in to_delete {
        callee.remove_insn(pos);
    }
}

/// Split every callee block so each throwing instruction ends its block.
/// Needed when the call site sits in a try region the callee was never
/// compiled with: catch edges can only hang off block-terminal throwers.
fn split_on_callee_throws(callee: &mut ControlFlowGraph) {
    // indexed worklist: splits append new tails while we scan
    let mut work = callee.block_ids();
    let mut i = 0;
    while i < work.len() {
        let block = work[i];
        i += 1;
        let split_at = {
            let b = callee.block(block);
            let last = b.last_insn_idx();
            b.insn_indices()
                .find(|(idx, insn)| insn.can_throw() && Some(*idx) != last)
                .map(|(idx, _)| idx)
        };
        if let Some(idx) = split_at {
            work.push(callee.split_block(InsnPos::new(block, idx)));
        }
    }
}

/// A snapshot of one catch-handler edge leaving the call block.
struct CatchEdge {
    handler: BlockId,
    catch_type: Option<String>,
}

/// Wire the transferred callee blocks into the caller: catch edges first,
/// then the control edges into the callee entry and out of its exits.
fn connect_cfgs(
    cfg: &mut ControlFlowGraph,
    inline_after: bool,
    call_block: BlockId,
    callee_blocks: &[BlockId],
    callee_entry: BlockId,
    callee_exits: &[BlockId],
    continuation: BlockId,
) {
    let caller_catches: Vec<CatchEdge> = cfg
        .throw_succs_in_order(call_block)
        .iter()
        .map(|e| CatchEdge {
            handler: e.dst,
            catch_type: e.throw_info().and_then(|t| t.catch_type.clone()),
        })
        .collect();
    if !caller_catches.is_empty() {
        add_callee_throws(cfg, callee_blocks, &caller_catches);
    }

    if inline_after {
        // the caller now flows through the callee instead of past the call
        cfg.delete_succ_gotos(call_block);
        cfg.add_goto_edge(call_block, callee_entry);
    } else {
        // everything that used to reach the call reaches the callee first
        for edge in cfg.pred_edge_ids(continuation) {
            cfg.retarget_edge(edge, callee_entry);
        }
    }
    // TODO: tail call optimization (continuation is a lone return, after-mode)
    for &exit in callee_exits {
        cfg.add_goto_edge(exit, continuation);
    }
}

/// Give every throwing callee block the call site's catch handlers, in the
/// caller's trial order.
///
/// Blocks with no catch chain yet start at index 0; blocks the callee
/// already compiled with a try region continue past their last index. A
/// chain ending in a catch-all is already exhaustive and gains nothing.
fn add_callee_throws(
    cfg: &mut ControlFlowGraph,
    callee_blocks: &[BlockId],
    caller_catches: &[CatchEdge],
) {
    for &block in callee_blocks {
        let start = {
            let existing = cfg.throw_succs_in_order(block);
            match existing.last().and_then(|e| e.throw_info()) {
                None => {
                    let throwing = cfg
                        .block(block)
                        .last_insn()
                        .is_some_and(|(_, insn)| insn.can_throw());
                    if throwing {
                        Some(0)
                    } else {
                        None
                    }
                }
                Some(info) if info.catch_type.is_some() => Some(info.index + 1),
                Some(_) => None,
            }
        };
        if let Some(start) = start {
            for (i, catch) in caller_catches.iter().enumerate() {
                cfg.add_throw_edge(block, catch.handler, catch.catch_type.clone(), start + i as u32);
            }
        }
    }
}

/// Set `parent` on every callee position that has none yet. Positions with
/// parents already recorded came from earlier inlinings into the callee and
/// keep their chains.
fn set_pos_parents(callee: &mut ControlFlowGraph, parent: &SourcePos) {
    for block in callee.blocks_mut() {
        for pos in block.positions_mut() {
            pos.adopt_parent(parent);
        }
    }
}

/// The source position in effect at `at`: the nearest marker before it in
/// its block, else found by walking lone-goto-predecessor chains backward.
/// The visited set bounds the walk on malformed cyclic chains.
fn nearest_pos(cfg: &ControlFlowGraph, at: InsnPos) -> Option<SourcePos> {
    fn search_back(block: &Block, from_idx: usize) -> Option<SourcePos> {
        block.entries[..=from_idx].iter().rev().find_map(|e| match e {
            Entry::Position(pos) => Some(pos.clone()),
            Entry::Insn(_) => None,
        })
    }

    if let Some(pos) = search_back(cfg.block(at.block), at.idx) {
        return Some(pos);
    }

    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut current = at.block;
    loop {
        if !visited.insert(current) {
            return None;
        }
        let gotos = cfg.goto_pred_edges(current);
        if cfg.pred_count(current) != 1 || gotos.is_empty() {
            return None;
        }
        let prev = gotos[0].src;
        let block = cfg.block(prev);
        if !block.entries.is_empty() {
            if let Some(pos) = search_back(block, block.entries.len() - 1) {
                return Some(pos);
            }
        }
        current = prev;
    }
}
