use std::cell::RefCell;

use rustc_hash::FxHashSet;

use crate::graph::{Graph, NodeId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Don't report anything.
    Off,
    /// Report only rewrites which could not be applied.
    Warn,
    /// Report all rewrites.
    Info,
}

/// Reports graph rewrites through the `log` facade.
///
/// Messages are prefixed with the name of the node they concern. Warnings
/// are reported at most once per node.
pub struct Diagnostics {
    /// Nodes against which a warning has been reported.
    warned_nodes: RefCell<FxHashSet<NodeId>>,
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self {
            warned_nodes: RefCell::new(FxHashSet::default()),
            level,
        }
    }

    pub fn set_level(&mut self, level: DiagnosticLevel) {
        self.level = level;
    }

    /// Return true if messages at `level` are reported.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        level != DiagnosticLevel::Off && self.level >= level
    }

    /// Report a rewrite of `node` which was applied.
    pub fn info(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) {
        if !self.enabled(DiagnosticLevel::Info) {
            return;
        }
        log::info!("{}: {}", graph.node_name(node), message);
    }

    /// Report a rewrite of `node` which could not be applied.
    ///
    /// Returns false if the message was not reported.
    pub fn warn(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) -> bool {
        if !self.enabled(DiagnosticLevel::Warn) || !self.warned_nodes.borrow_mut().insert(node) {
            return false;
        }
        log::warn!("{}: {}", graph.node_name(node), message);
        true
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DiagnosticLevel::Info)
    }
}
