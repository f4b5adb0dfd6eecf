// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Structural consistency errors.

use thiserror::Error;

/// A violated structural invariant found by `ControlFlowGraph::check_consistency`.
#[derive(Debug, Clone, Error)]
pub enum CfgError {
    #[error("entry block b{0} missing from the block table")]
    MissingEntry(u32),

    #[error("edge e{edge} references unknown block b{block}")]
    DanglingEndpoint { edge: u32, block: u32 },

    #[error("edge e{edge} is not recorded on block b{block}")]
    DetachedEdge { edge: u32, block: u32 },

    #[error("block b{block} lists unknown edge e{edge}")]
    StaleEdgeRef { block: u32, edge: u32 },

    #[error("block b{0} has more than one goto successor")]
    MultipleGotos(u32),

    #[error("block b{block} has a throw chain that is not strictly increasing at index {index}")]
    ThrowOrder { block: u32, index: u32 },

    #[error("block b{0} has a throw edge after a catch-all")]
    ThrowAfterCatchAll(u32),
}
