// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Splice customization.
//!
//! Variant inlining behaviors (constructor flattening, field-access
//! rewrites, code injection ahead of a call) are expressed entirely through
//! this capability trait; the orchestrator itself never changes. Every
//! method has a default giving plain inlining. A plugin lives for a single
//! `inline_cfg_with` invocation and is supplied by the driving pass.

use magpie_ir::{ControlFlowGraph, Reg};

pub trait InlinePlugin {
    /// Insertion side. `true` (default): the callee runs where the call used
    /// to return to. `false`: the callee runs ahead of the call.
    fn insert_after(&self) -> bool {
        true
    }

    /// Registers to feed the callee's parameters instead of the call's
    /// literal argument registers, matched positionally.
    fn arg_sources(&self) -> Option<Vec<Reg>> {
        None
    }

    /// Register that receives the callee's return value, overriding the
    /// destination inferred from the caller's result-consuming instruction.
    fn return_reg(&self) -> Option<Reg> {
        None
    }

    /// Whether the call instruction (and its result consumer) are deleted.
    fn remove_call_site(&self) -> bool {
        true
    }

    /// Runs before the callee's registers are remapped into caller space;
    /// may record bindings the plugin needs afterwards.
    fn before_remap(&mut self, _caller: &mut ControlFlowGraph, _callee: &mut ControlFlowGraph) {}

    /// Runs after remapping and argument/return conversion. Returning `true`
    /// asks for a full register-file recompute instead of the additive
    /// caller + callee size, for plugins that inject registers outside the
    /// remap path.
    fn after_remap(
        &mut self,
        _caller: &mut ControlFlowGraph,
        _callee: &mut ControlFlowGraph,
    ) -> bool {
        false
    }
}

/// Plain inlining: every capability at its default.
#[derive(Debug, Default)]
pub struct DefaultPlugin;

impl InlinePlugin for DefaultPlugin {}
