// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Inlining tests: graph shape, register wiring, catch chains, positions.

use magpie_ir::{
    BlockId, CfgBuilder, ControlFlowGraph, EdgeKind, InsnPos, Instruction, Opcode, Reg, SourcePos,
};

use crate::{inline_cfg, inline_cfg_with, InlinePlugin};

// ── Helpers ─────────────────────────────────────────────────────────

/// `f(p) { return p + 1 }` as a single block. Registers: p=0, one=1, sum=2.
fn callee_add_one() -> ControlFlowGraph {
    let mut b = CfgBuilder::new();
    let p = b.param();
    let one = b.reg();
    let sum = b.reg();
    b.push(Instruction::const_(one, 1));
    b.push(Instruction::add(sum, p, one));
    b.push(Instruction::ret(sum));
    b.finish()
}

/// Caller `b0: [const v0, 7; invoke(v0); move-result v1] -> b1: [return v1]`.
fn caller_with_consumer() -> ControlFlowGraph {
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    let v1 = b.reg();
    b.push(Instruction::const_(v0, 7));
    b.push(Instruction::invoke(vec![v0]));
    b.push(Instruction::move_result(v1));
    let ret = b.create_block();
    let entry = b.entry();
    b.connect(entry, ret);
    b.switch_to_block(ret);
    b.push(Instruction::ret(v1));
    b.finish()
}

fn call_site(cfg: &ControlFlowGraph) -> InsnPos {
    cfg.find_insn(|i| i.opcode == Opcode::Invoke)
        .expect("caller holds a call")
}

fn block_insns(cfg: &ControlFlowGraph, block: BlockId) -> Vec<Instruction> {
    cfg.block(block).insns().cloned().collect()
}

fn has_insn(cfg: &ControlFlowGraph, insn: &Instruction) -> bool {
    cfg.find_insn(|i| i == insn).is_some()
}

fn fingerprint(cfg: &ControlFlowGraph) -> (usize, usize, Vec<Vec<Instruction>>) {
    let per_block = cfg
        .block_ids()
        .into_iter()
        .map(|id| block_insns(cfg, id))
        .collect();
    (cfg.num_blocks(), cfg.num_edges(), per_block)
}

// ── Basic splice ────────────────────────────────────────────────────

#[test]
fn callee_graph_is_never_mutated() {
    let mut caller = caller_with_consumer();
    let callee = callee_add_one();
    let before = fingerprint(&callee);
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);
    assert_eq!(fingerprint(&callee), before);
}

#[test]
fn register_files_union_additively() {
    let mut caller = caller_with_consumer();
    let callee = callee_add_one();
    assert_eq!(caller.registers_size(), 2);
    assert_eq!(callee.registers_size(), 3);
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);
    assert_eq!(caller.registers_size(), 5);
}

#[test]
fn arguments_become_moves_in_parameter_order() {
    let mut caller = caller_with_consumer();
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee_add_one());
    // p lands on v2 (offset by the caller's 2 registers), fed from arg v0
    assert!(has_insn(&caller, &Instruction::move_(2, 0)));
    assert!(caller.find_insn(|i| i.opcode == Opcode::LoadParam).is_none());
}

#[test]
fn return_value_reaches_the_consumer_register() {
    let mut caller = caller_with_consumer();
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee_add_one());
    // sum (v2 -> v4) moves into the consumer's v1; call and consumer are gone
    assert!(has_insn(&caller, &Instruction::move_(1, 4)));
    assert!(caller.find_insn(|i| i.opcode == Opcode::MoveResult).is_none());
    assert!(caller.find_insn(|i| i.opcode == Opcode::Invoke).is_none());
    assert!(caller.check_consistency().is_ok());
}

#[test]
fn unconsumed_return_is_deleted() {
    // caller: b0 [invoke(v0)] -> b1 [return-void], nothing consumes the value
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    b.push(Instruction::invoke(vec![v0]));
    let next = b.create_block();
    let entry = b.entry();
    b.connect(entry, next);
    b.switch_to_block(next);
    b.push(Instruction::ret_void());
    let mut caller = b.finish();

    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee_add_one());
    // no move of the callee's result anywhere, and its return is gone
    assert!(caller.find_insn(|i| i.opcode == Opcode::Return).is_none());
    assert!(!has_insn(&caller, &Instruction::move_(0, 3)));
    assert!(caller.check_consistency().is_ok());
}

#[test]
fn single_block_scenario_end_to_end() {
    // caller A = [invoke(v0)], B = [return-void]; callee = add-one
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    b.push(Instruction::invoke(vec![v0]));
    let ret_block = b.create_block();
    let entry = b.entry();
    b.connect(entry, ret_block);
    b.switch_to_block(ret_block);
    b.push(Instruction::ret_void());
    let mut caller = b.finish();

    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee_add_one());

    // A (now callless) falls into the spliced body, which falls into B
    let body = caller.goto_target(entry).expect("entry falls through");
    assert!(block_insns(&caller, entry).is_empty());
    assert_eq!(
        block_insns(&caller, body),
        vec![
            Instruction::move_(1, 0),
            Instruction::const_(2, 1),
            Instruction::add(3, 1, 2),
        ]
    );
    assert_eq!(caller.goto_target(body), Some(ret_block));
    assert_eq!(caller.registers_size(), 4);
    assert!(caller.check_consistency().is_ok());
}

#[test]
fn multi_return_callee_rejoins_at_the_continuation() {
    // callee: if p == 0 return 1 else return 2
    let mut b = CfgBuilder::new();
    let p = b.param();
    let c1 = b.reg();
    let c2 = b.reg();
    b.push(Instruction::if_zero(p));
    let zero = b.create_block();
    let nonzero = b.create_block();
    let entry = b.entry();
    b.connect_case(entry, zero, Some(0));
    b.connect(entry, nonzero);
    b.switch_to_block(zero);
    b.push(Instruction::const_(c1, 1));
    b.push(Instruction::ret(c1));
    b.switch_to_block(nonzero);
    b.push(Instruction::const_(c2, 2));
    b.push(Instruction::ret(c2));
    let callee = b.finish();

    let mut caller = caller_with_consumer();
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    // both exits become moves into the consumer's v1 and rejoin the caller
    assert!(has_insn(&caller, &Instruction::move_(1, 3)));
    assert!(has_insn(&caller, &Instruction::move_(1, 4)));
    // the callee's branch came through the transfer intact
    let branch_block = caller
        .find_insn(|i| i.opcode == Opcode::IfZero)
        .map(|pos| pos.block)
        .expect("branch transferred");
    let branches = caller.branch_succ_edges(branch_block);
    assert_eq!(branches.len(), 1);
    assert!(matches!(branches[0].kind, EdgeKind::Branch { case: Some(0) }));
    let continuation = caller
        .find_insn(|i| *i == Instruction::ret(1))
        .map(|pos| pos.block)
        .expect("caller return survives");
    // the continuation itself is the empty block left by the consumer split
    let rejoin = caller
        .blocks()
        .find(|blk| blk.entries.is_empty())
        .map(|blk| blk.id)
        .expect("consumer block left in place");
    assert_eq!(caller.goto_target(rejoin), Some(continuation));
    assert_eq!(caller.goto_pred_edges(rejoin).len(), 2);
    assert!(caller.check_consistency().is_ok());
}

#[test]
fn ghost_exit_is_stripped_from_the_copy() {
    let mut b = CfgBuilder::new();
    let p = b.param();
    b.push(Instruction::ret(p));
    let exit = b.create_block();
    let entry = b.entry();
    b.connect_ghost(entry, exit);
    let callee = b.finish();

    let mut caller = caller_with_consumer();
    let blocks_before = caller.num_blocks();
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    // only the one real callee block arrives; no ghost edges come with it
    assert_eq!(caller.num_blocks(), blocks_before + 2); // body + consumer split
    for block in caller.block_ids() {
        assert!(!caller.has_ghost_pred(block));
    }
    assert!(caller.check_consistency().is_ok());
}

#[test]
#[should_panic(expected = "not a call instruction")]
fn non_call_site_is_rejected() {
    let mut caller = caller_with_consumer();
    let not_a_call = caller
        .find_insn(|i| i.opcode == Opcode::Const)
        .expect("const present");
    inline_cfg(&mut caller, not_a_call, &callee_add_one());
}

// ── Exception edges ─────────────────────────────────────────────────

/// Caller whose call block carries two catch handlers: `Err` then catch-all.
fn caller_in_try() -> (ControlFlowGraph, BlockId, BlockId) {
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    b.push(Instruction::const_(v0, 7));
    b.push(Instruction::invoke(vec![v0]));
    let cont = b.create_block();
    let entry = b.entry();
    b.connect(entry, cont);
    b.switch_to_block(cont);
    b.push(Instruction::ret_void());
    let h0 = b.create_block();
    b.switch_to_block(h0);
    b.push(Instruction::ret_void());
    let h1 = b.create_block();
    b.switch_to_block(h1);
    b.push(Instruction::ret_void());
    b.connect_catch(entry, h0, Some("Err".into()), 0);
    b.connect_catch(entry, h1, None, 1);
    (b.finish(), h0, h1)
}

/// `g(p) { t = p / p; u = t / t; return u }`: two throwers mid-block.
fn callee_two_divs() -> ControlFlowGraph {
    let mut b = CfgBuilder::new();
    let p = b.param();
    let t = b.reg();
    let u = b.reg();
    b.push(Instruction::div_int(t, p, p));
    b.push(Instruction::div_int(u, t, t));
    b.push(Instruction::ret(u));
    b.finish()
}

#[test]
fn throwing_callee_blocks_reach_the_callers_handlers_in_order() {
    let (mut caller, h0, h1) = caller_in_try();
    let pre_max = *caller.block_ids().last().expect("blocks");
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee_two_divs());

    let mut throwing_blocks = 0;
    for block in caller.block_ids() {
        if block <= pre_max {
            continue;
        }
        let terminal_throws = caller
            .block(block)
            .last_insn()
            .is_some_and(|(_, insn)| insn.can_throw());
        if !terminal_throws {
            assert!(!caller.has_throw_succ(block));
            continue;
        }
        throwing_blocks += 1;
        let chain = caller.throw_succs_in_order(block);
        let targets: Vec<BlockId> = chain.iter().map(|e| e.dst).collect();
        let indices: Vec<u32> = chain
            .iter()
            .filter_map(|e| e.throw_info().map(|t| t.index))
            .collect();
        assert_eq!(targets, vec![h0, h1]);
        assert_eq!(indices, vec![0, 1]);
    }
    // the two divisions were split into separate, throwing-terminal blocks
    assert_eq!(throwing_blocks, 2);
    assert!(caller.check_consistency().is_ok());
}

#[test]
fn call_block_loses_its_catch_chain_with_the_call() {
    let (mut caller, _, _) = caller_in_try();
    let entry = caller.entry_block();
    assert!(caller.has_throw_succ(entry));
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee_two_divs());
    assert!(!caller.has_throw_succ(entry));
}

#[test]
fn existing_catch_chain_is_extended_past_its_last_index() {
    // callee compiled with its own narrower handler on the division
    let mut b = CfgBuilder::new();
    let p = b.param();
    let t = b.reg();
    b.push(Instruction::div_int(t, p, p));
    let ok = b.create_block();
    let hb = b.create_block();
    let entry = b.entry();
    b.connect(entry, ok);
    b.connect_catch(entry, hb, Some("Inner".into()), 0);
    b.switch_to_block(ok);
    b.push(Instruction::ret(t));
    b.switch_to_block(hb);
    b.push(Instruction::ret_void());
    let callee = b.finish();

    let (mut caller, h0, h1) = caller_in_try();
    let pre_max = *caller.block_ids().last().expect("blocks");
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    let body = caller
        .block_ids()
        .into_iter()
        .find(|&id| id > pre_max && caller.has_throw_succ(id))
        .expect("throwing callee block transferred");
    let chain = caller.throw_succs_in_order(body);
    let types: Vec<Option<String>> = chain
        .iter()
        .filter_map(|e| e.throw_info().map(|t| t.catch_type.clone()))
        .collect();
    let indices: Vec<u32> = chain
        .iter()
        .filter_map(|e| e.throw_info().map(|t| t.index))
        .collect();
    assert_eq!(
        types,
        vec![Some("Inner".to_string()), Some("Err".to_string()), None]
    );
    assert_eq!(indices, vec![0, 1, 2]);
    // narrower callee handler stays first in trial order
    assert!(chain[1].dst == h0 && chain[2].dst == h1);
    assert!(caller.check_consistency().is_ok());
}

#[test]
fn catch_all_chain_gains_nothing() {
    // callee handler is already a catch-all: the chain is exhaustive
    let mut b = CfgBuilder::new();
    let p = b.param();
    let t = b.reg();
    b.push(Instruction::div_int(t, p, p));
    let ok = b.create_block();
    let hb = b.create_block();
    let entry = b.entry();
    b.connect(entry, ok);
    b.connect_catch(entry, hb, None, 0);
    b.switch_to_block(ok);
    b.push(Instruction::ret(t));
    b.switch_to_block(hb);
    b.push(Instruction::ret_void());
    let callee = b.finish();

    let (mut caller, _, _) = caller_in_try();
    let pre_max = *caller.block_ids().last().expect("blocks");
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    let body = caller
        .block_ids()
        .into_iter()
        .find(|&id| id > pre_max && caller.has_throw_succ(id))
        .expect("throwing callee block transferred");
    let chain = caller.throw_succs_in_order(body);
    assert_eq!(chain.len(), 1);
    assert!(chain[0].throw_info().is_some_and(|t| t.catch_type.is_none()));
}

// ── Debug positions ─────────────────────────────────────────────────

#[test]
fn callee_positions_adopt_the_call_sites_position() {
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    let v1 = b.reg();
    b.push_pos(SourcePos::new("caller.src", 3));
    b.push(Instruction::const_(v0, 7));
    b.push(Instruction::invoke(vec![v0]));
    b.push(Instruction::move_result(v1));
    let ret = b.create_block();
    let entry = b.entry();
    b.connect(entry, ret);
    b.switch_to_block(ret);
    b.push(Instruction::ret(v1));
    let mut caller = b.finish();

    let mut b = CfgBuilder::new();
    let p = b.param();
    b.push_pos(SourcePos::new("callee.src", 11));
    b.push(Instruction::ret(p));
    let callee = b.finish();

    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    let inlined = caller
        .blocks()
        .flat_map(|blk| blk.positions())
        .find(|pos| pos.file == "callee.src")
        .expect("callee position transferred");
    let parent = inlined.parent.as_deref().expect("parent attached");
    assert_eq!((parent.file.as_str(), parent.line), ("caller.src", 3));
    assert_eq!(inlined.depth(), 2);
    assert_eq!(inlined.root().file, "caller.src");
}

#[test]
fn previously_inlined_positions_keep_their_parent() {
    let mut caller = caller_with_consumer_with_pos();

    // simulate a callee that already went through one inlining
    let mut b = CfgBuilder::new();
    let p = b.param();
    b.push_pos(SourcePos::with_parent(
        "inner.src",
        5,
        SourcePos::new("mid.src", 9),
    ));
    b.push(Instruction::ret(p));
    let callee = b.finish();

    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    let inlined = caller
        .blocks()
        .flat_map(|blk| blk.positions())
        .find(|pos| pos.file == "inner.src")
        .expect("callee position transferred");
    let parent = inlined.parent.as_deref().expect("chain kept");
    assert_eq!((parent.file.as_str(), parent.line), ("mid.src", 9));
    // the ancestry still bottoms out at the first inlining's call site
    assert_eq!(inlined.depth(), 2);
    assert_eq!(inlined.root().file, "mid.src");
}

fn caller_with_consumer_with_pos() -> ControlFlowGraph {
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    let v1 = b.reg();
    b.push_pos(SourcePos::new("caller.src", 3));
    b.push(Instruction::const_(v0, 7));
    b.push(Instruction::invoke(vec![v0]));
    b.push(Instruction::move_result(v1));
    let ret = b.create_block();
    let entry = b.entry();
    b.connect(entry, ret);
    b.switch_to_block(ret);
    b.push(Instruction::ret(v1));
    b.finish()
}

#[test]
fn continuation_reattributes_to_the_original_line() {
    let mut caller = caller_with_consumer_with_pos();
    let entry = caller.entry_block();
    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee_add_one());

    // caller code resuming after the splice starts with a copy of the
    // call site's position
    let body = caller.goto_target(entry).expect("entry falls through");
    let continuation = caller.goto_target(body).expect("body rejoins caller");
    let first = caller
        .block(continuation)
        .positions()
        .next()
        .expect("position marker inserted");
    assert!(caller.block(continuation).starts_with_position());
    assert_eq!((first.file.as_str(), first.line), ("caller.src", 3));
}

#[test]
fn position_search_walks_lone_goto_predecessors() {
    // the position lives in the block before the call's block
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    b.push_pos(SourcePos::new("caller.src", 8));
    b.push(Instruction::const_(v0, 7));
    let call_block = b.create_block();
    let entry = b.entry();
    b.connect(entry, call_block);
    b.switch_to_block(call_block);
    b.push(Instruction::invoke(vec![v0]));
    b.push(Instruction::ret_void());
    let mut caller = b.finish();

    let mut b = CfgBuilder::new();
    let p = b.param();
    b.push_pos(SourcePos::new("callee.src", 2));
    b.push(Instruction::ret(p));
    let callee = b.finish();

    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    let inlined = caller
        .blocks()
        .flat_map(|blk| blk.positions())
        .find(|pos| pos.file == "callee.src")
        .expect("callee position transferred");
    let parent = inlined.parent.as_deref().expect("parent found via pred walk");
    assert_eq!((parent.file.as_str(), parent.line), ("caller.src", 8));
}

#[test]
fn position_walk_terminates_on_a_goto_cycle() {
    // malformed loop: the call block's lone-goto-predecessor chain cycles
    // back to it, so the backward search must give up instead of spinning
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    b.push(Instruction::invoke(vec![v0]));
    let back = b.create_block();
    let entry = b.entry();
    b.connect(entry, back);
    b.connect(back, entry);
    let mut caller = b.finish();

    let mut b = CfgBuilder::new();
    let p = b.param();
    b.push_pos(SourcePos::new("callee.src", 4));
    b.push(Instruction::ret(p));
    let callee = b.finish();

    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);

    // the search found nothing, so the transferred position stays parentless
    let inlined = caller
        .blocks()
        .flat_map(|blk| blk.positions())
        .find(|pos| pos.file == "callee.src")
        .expect("callee position transferred");
    assert!(inlined.parent.is_none());
    assert!(caller.find_insn(|i| i.opcode == Opcode::Invoke).is_none());
    assert!(caller.check_consistency().is_ok());
}

// ── Plugins ─────────────────────────────────────────────────────────

struct BeforePlugin;

impl InlinePlugin for BeforePlugin {
    fn insert_after(&self) -> bool {
        false
    }
    fn remove_call_site(&self) -> bool {
        false
    }
}

#[test]
fn before_mode_runs_the_callee_ahead_of_a_surviving_call() {
    let mut b = CfgBuilder::new();
    let v0 = b.reg();
    b.push(Instruction::const_(v0, 7));
    b.push(Instruction::invoke(vec![v0]));
    b.push(Instruction::ret_void());
    let mut caller = b.finish();
    let entry = caller.entry_block();

    let site = call_site(&caller);
    inline_cfg_with(&mut caller, site, &callee_add_one(), &mut BeforePlugin);

    // the call survives and now follows the spliced body
    let call = caller
        .find_insn(|i| i.opcode == Opcode::Invoke)
        .expect("call kept");
    let body = caller.goto_target(entry).expect("entry redirected");
    assert!(has_insn(&caller, &Instruction::move_(1, 0)));
    assert_eq!(block_insns(&caller, body)[0], Instruction::move_(1, 0));
    assert_eq!(caller.goto_target(body), Some(call.block));
    assert_eq!(
        caller.block(call.block).first_insn().map(|(_, i)| i.opcode),
        Some(Opcode::Invoke)
    );
    assert!(caller.check_consistency().is_ok());
}

struct OverridePlugin;

impl InlinePlugin for OverridePlugin {
    fn arg_sources(&self) -> Option<Vec<Reg>> {
        Some(vec![5])
    }
    fn return_reg(&self) -> Option<Reg> {
        Some(6)
    }
}

#[test]
fn plugin_overrides_argument_sources_and_result_register() {
    let mut b = CfgBuilder::new();
    for _ in 0..7 {
        b.reg();
    }
    b.push(Instruction::const_(5, 9));
    b.push(Instruction::invoke(vec![0]));
    b.push(Instruction::move_result(1));
    let ret = b.create_block();
    let entry = b.entry();
    b.connect(entry, ret);
    b.switch_to_block(ret);
    b.push(Instruction::ret_void());
    let mut caller = b.finish();

    let site = call_site(&caller);
    inline_cfg_with(&mut caller, site, &callee_add_one(), &mut OverridePlugin);

    // parameter fed from the override source, result forced into v6
    assert!(has_insn(&caller, &Instruction::move_(7, 5)));
    assert!(has_insn(&caller, &Instruction::move_(6, 9)));
    assert!(caller.find_insn(|i| i.opcode == Opcode::MoveResult).is_none());
    assert_eq!(caller.registers_size(), 10);
}

struct RecomputePlugin;

impl InlinePlugin for RecomputePlugin {
    fn after_remap(
        &mut self,
        _caller: &mut ControlFlowGraph,
        _callee: &mut ControlFlowGraph,
    ) -> bool {
        true
    }
}

#[test]
fn plugin_can_force_a_register_size_recompute() {
    let mut caller = caller_with_consumer();
    let mut callee = callee_add_one();
    // an inflated callee register file would bloat the additive union
    callee.set_registers_size(50);

    let site = call_site(&caller);
    inline_cfg_with(&mut caller, site, &callee, &mut RecomputePlugin);

    // recompute shrinks to the highest register actually referenced, +1
    assert_eq!(caller.registers_size(), 5);
    assert!(caller.check_consistency().is_ok());
}

#[test]
fn additive_union_uses_the_declared_callee_size() {
    let mut caller = caller_with_consumer();
    let mut callee = callee_add_one();
    callee.set_registers_size(50);

    let site = call_site(&caller);
    inline_cfg(&mut caller, site, &callee);
    assert_eq!(caller.registers_size(), 52);
}
