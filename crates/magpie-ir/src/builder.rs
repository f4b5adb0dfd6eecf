// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! CfgBuilder - helper for graph construction during lowering and in tests.

use crate::{BlockId, ControlFlowGraph, Instruction, Reg, SourcePos};

pub struct CfgBuilder {
    cfg: ControlFlowGraph,
    current: BlockId,
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CfgBuilder {
    pub fn new() -> Self {
        let cfg = ControlFlowGraph::new();
        let current = cfg.entry_block();
        CfgBuilder { cfg, current }
    }

    pub fn entry(&self) -> BlockId {
        self.cfg.entry_block()
    }

    pub fn create_block(&mut self) -> BlockId {
        self.cfg.add_block()
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Reserve a fresh register.
    pub fn reg(&mut self) -> Reg {
        self.cfg.alloc_temp_reg()
    }

    /// Declare the next parameter: reserves its register and emits the
    /// `LoadParam` into the entry block. Parameters must be declared first,
    /// in order.
    pub fn param(&mut self) -> Reg {
        let reg = self.cfg.alloc_temp_reg();
        let entry = self.cfg.entry_block();
        self.cfg
            .block_mut(entry)
            .entries
            .push(crate::Entry::Insn(Instruction::load_param(reg)));
        reg
    }

    pub fn push(&mut self, insn: Instruction) {
        self.cfg
            .block_mut(self.current)
            .entries
            .push(crate::Entry::Insn(insn));
    }

    pub fn push_pos(&mut self, pos: SourcePos) {
        self.cfg
            .block_mut(self.current)
            .entries
            .push(crate::Entry::Position(pos));
    }

    /// Fallthrough edge.
    pub fn connect(&mut self, src: BlockId, dst: BlockId) {
        self.cfg.add_goto_edge(src, dst);
    }

    pub fn connect_case(&mut self, src: BlockId, dst: BlockId, case: Option<i64>) {
        self.cfg.add_branch_edge(src, dst, case);
    }

    pub fn connect_catch(
        &mut self,
        src: BlockId,
        handler: BlockId,
        catch_type: Option<String>,
        index: u32,
    ) {
        self.cfg.add_throw_edge(src, handler, catch_type, index);
    }

    /// Install `exit` as the synthetic exit and wire `src` to it.
    pub fn connect_ghost(&mut self, src: BlockId, exit: BlockId) {
        self.cfg.add_ghost_edge(src, exit);
        self.cfg.set_exit(Some(exit));
    }

    pub fn finish(self) -> ControlFlowGraph {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn params_load_in_entry_in_order() {
        let mut b = CfgBuilder::new();
        let p0 = b.param();
        let p1 = b.param();
        b.push(Instruction::add(p0, p0, p1));
        b.push(Instruction::ret(p0));
        let cfg = b.finish();

        let entry = cfg.entry_block();
        let loads: Vec<Reg> = cfg
            .block(entry)
            .insns()
            .take_while(|i| i.opcode == Opcode::LoadParam)
            .map(|i| i.dest.unwrap())
            .collect();
        assert_eq!(loads, vec![0, 1]);
        assert_eq!(cfg.registers_size(), 2);
    }

    #[test]
    fn ghost_exit_wiring() {
        let mut b = CfgBuilder::new();
        b.push(Instruction::ret_void());
        let exit = b.create_block();
        let entry = b.entry();
        b.connect_ghost(entry, exit);
        let cfg = b.finish();

        assert_eq!(cfg.exit_block(), Some(exit));
        assert!(cfg.has_ghost_pred(exit));
        assert!(cfg.check_consistency().is_ok());
    }
}
