// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Display implementations for IR types.

use std::fmt;

use crate::block::{Edge, EdgeKind, Entry};
use crate::{ControlFlowGraph, Instruction, Opcode};

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.opcode {
            Opcode::Nop => "nop",
            Opcode::Const => "const",
            Opcode::Move => "move",
            Opcode::Add => "add",
            Opcode::DivInt => "div-int",
            Opcode::NewInstance => "new-instance",
            Opcode::FieldGet => "field-get",
            Opcode::FieldPut => "field-put",
            Opcode::Invoke => "invoke",
            Opcode::MoveResult => "move-result",
            Opcode::LoadParam => "load-param",
            Opcode::Return => "return",
            Opcode::ReturnVoid => "return-void",
            Opcode::Throw => "throw",
            Opcode::IfZero => "if-zero",
            Opcode::Switch => "switch",
        };
        write!(f, "{}", name)?;
        let mut sep = " ";
        if let Some(dest) = self.dest {
            write!(f, "{}v{}", sep, dest)?;
            sep = ", ";
        }
        for src in &self.srcs {
            write!(f, "{}v{}", sep, src)?;
            sep = ", ";
        }
        if let Some(lit) = self.literal {
            write!(f, "{}#{}", sep, lit)?;
        }
        Ok(())
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EdgeKind::Goto => write!(f, "-> b{} (goto)", self.dst.0),
            EdgeKind::Branch { case: Some(case) } => {
                write!(f, "-> b{} (case {})", self.dst.0, case)
            }
            EdgeKind::Branch { case: None } => write!(f, "-> b{} (default)", self.dst.0),
            EdgeKind::Throw(info) => match &info.catch_type {
                Some(ty) => write!(f, "-> b{} (throw {} @{})", self.dst.0, ty, info.index),
                None => write!(f, "-> b{} (throw * @{})", self.dst.0, info.index),
            },
            EdgeKind::Ghost => write!(f, "-> b{} (ghost)", self.dst.0),
        }
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cfg (entry b{}, {} regs)", self.entry_block().0, self.registers_size())?;
        for block in self.blocks() {
            writeln!(f, "b{}:", block.id.0)?;
            for entry in &block.entries {
                match entry {
                    Entry::Position(pos) => writeln!(f, "  .pos {}:{}", pos.file, pos.line)?,
                    Entry::Insn(insn) => writeln!(f, "  {}", insn)?,
                }
            }
            for edge in self.succ_edges(block.id) {
                writeln!(f, "  {}", edge)?;
            }
        }
        Ok(())
    }
}
