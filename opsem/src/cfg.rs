use opsem_ir::{BlockId, Function};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::prelude::DiGraph;
use petgraph::visit::{Dfs, EdgeRef};
use std::collections::HashMap;

/// The control-flow graph of one function, nodes are basic blocks.
///
/// Edges appear once per distinct successor, so a conditional branch with both targets equal
/// contributes a single edge.
#[derive(Debug, Clone)]
pub struct FunctionCfg {
    graph: DiGraph<BlockId, ()>,
    indices: HashMap<BlockId, NodeIndex>,
    entry: Option<BlockId>,
}

impl FunctionCfg {
    pub fn new(function: &Function) -> Self {
        let mut cfg = Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            entry: function.entry().map(|b| b.id),
        };
        for block in &function.blocks {
            cfg.add_node(block.id);
        }
        for block in &function.blocks {
            let mut seen = vec![];
            for succ in block.successors() {
                if !seen.contains(&succ) {
                    seen.push(succ);
                    cfg.add_edge(block.id, succ);
                }
            }
        }
        cfg
    }

    fn add_node(&mut self, block: BlockId) -> NodeIndex {
        if let Some(idx) = self.indices.get(&block) {
            return *idx;
        }
        let idx = self.graph.add_node(block);
        self.indices.insert(block, idx);
        idx
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        self.graph.add_edge(from, to, ());
    }

    pub fn graph(&self) -> &DiGraph<BlockId, ()> {
        &self.graph
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.graph.node_weights().copied()
    }

    /// Every edge, in block order then successor order
    pub fn edges(&self) -> Vec<(BlockId, BlockId)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| (e.id(), self.graph[e.source()], self.graph[e.target()]))
            .collect();
        edges.sort_by_key(|(id, _, _)| *id);
        edges.into_iter().map(|(_, s, d)| (s, d)).collect()
    }

    fn neighbors(&self, block: BlockId, dir: Direction) -> Vec<BlockId> {
        let Some(idx) = self.indices.get(&block) else {
            return vec![];
        };
        let mut out: Vec<_> = self
            .graph
            .neighbors_directed(*idx, dir)
            .map(|n| self.graph[n])
            .collect();
        out.sort();
        out
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.neighbors(block, Direction::Outgoing)
    }

    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.neighbors(block, Direction::Incoming)
    }

    /// Blocks reachable from the entry, the entry included
    pub fn reachable(&self) -> Vec<BlockId> {
        let Some(start) = self.entry.and_then(|e| self.indices.get(&e)) else {
            return vec![];
        };
        let mut dfs = Dfs::new(&self.graph, *start);
        let mut out = vec![];
        while let Some(n) = dfs.next(&self.graph) {
            out.push(self.graph[n]);
        }
        out
    }

    /// Blocks with no successors
    pub fn exits(&self) -> Vec<BlockId> {
        self.graph
            .externals(Direction::Outgoing)
            .map(|idx| self.graph[idx])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsem_ir::{ModuleBuilder, Operand, Type};

    #[test]
    fn diamond_edges() {
        let mut mb = ModuleBuilder::new();
        let main = mb.function("main", &[Type::bool()], Type::Void);
        let c = mb.params(main)[0];
        let entry = mb.block(main, "entry");
        let left = mb.block(main, "left");
        let right = mb.block(main, "right");
        let join = mb.block(main, "join");
        let dead = mb.block(main, "dead");
        mb.at(entry).cond_br(c, left, right);
        mb.at(left).br(join);
        mb.at(right).br(join);
        mb.at(join).ret(None);
        mb.at(dead).cond_br(Operand::bool(true), join, join);
        let m = mb.build().unwrap();

        let cfg = FunctionCfg::new(m.function(main).unwrap());
        assert_eq!(
            cfg.edges(),
            vec![
                (entry, left),
                (entry, right),
                (left, join),
                (right, join),
                (dead, join)
            ]
        );
        assert_eq!(cfg.predecessors(join), vec![left, right, dead]);
        assert_eq!(cfg.successors(entry), vec![left, right]);
        assert_eq!(cfg.exits(), vec![join]);
        let reachable = cfg.reachable();
        assert_eq!(reachable.len(), 4);
        assert!(!reachable.contains(&dead));
    }
}
