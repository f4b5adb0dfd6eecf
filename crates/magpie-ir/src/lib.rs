// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Magpie IR - editable control-flow graph for register bytecode.
//!
//! A procedure is a graph of basic blocks connected by typed, ordered edges.
//! Blocks hold instructions interleaved with source-position markers; try
//! regions exist only as throw edges carrying a catch type and priority
//! index. Optimization passes mutate the graph in place through the
//! `ControlFlowGraph` API and re-resolve instruction positions across
//! structural edits instead of caching iterators.

mod block;
mod builder;
mod cfg;
mod display;
mod error;
mod insn;
mod pos;

pub use block::{Block, BlockId, Edge, EdgeId, EdgeKind, Entry, ThrowInfo};
pub use builder::CfgBuilder;
pub use cfg::{ControlFlowGraph, InsnPos};
pub use error::CfgError;
pub use insn::{Instruction, Opcode, Reg};
pub use pos::SourcePos;
