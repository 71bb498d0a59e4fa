//! Walker specialised for flat preorder trees.
//!
//! Nodes are visited in raw array order. Because a flat tree stores the
//! depth of every node, the post-order callbacks fall out of depth
//! transitions alone: when node i arrives at depth d, every open node at
//! depth >= d is finished. No child accessor is needed.

use crate::error::{TreeError, TreeResult};
use crate::flat_tree::{FlatAccess, FlatNode};
use crate::walker::{Flow, WalkEnd};

/// Hooks of a flat walk. Errors returned by a hook abort the walk.
pub trait FlatVisitor<N> {
    fn node_begin(&mut self, _idx: u64, _node: &N, _depth: u8) -> TreeResult<Flow> {
        Ok(Flow::Continue)
    }

    fn node_end(&mut self, _idx: u64, _node: &N, _depth: u8) -> TreeResult<Flow> {
        Ok(Flow::Continue)
    }
}

/// Pre-order only visitor built from a closure.
pub struct Preorder<F>(pub F);

impl<N, F> FlatVisitor<N> for Preorder<F>
where
    F: FnMut(u64, &N, u8) -> TreeResult<Flow>,
{
    fn node_begin(&mut self, idx: u64, node: &N, depth: u8) -> TreeResult<Flow> {
        (self.0)(idx, node, depth)
    }
}

pub struct FlatTreeWalker<N> {
    /// Open nodes; entry k is the open node at depth k.
    open: Vec<(u64, N)>,
}

impl<N: FlatNode> Default for FlatTreeWalker<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: FlatNode> FlatTreeWalker<N> {
    pub fn new() -> Self {
        FlatTreeWalker { open: Vec::new() }
    }

    pub fn walk<A, V>(&mut self, tree: &A, visitor: &mut V) -> TreeResult<WalkEnd>
    where
        A: FlatAccess<Node = N> + ?Sized,
        V: FlatVisitor<N> + ?Sized,
    {
        self.open.clear();
        let count = tree.node_count();
        let mut i = 0u64;

        while i < count {
            let depth = tree.read_depth(i)?;
            if depth as usize > self.open.len() {
                self.open.clear();
                return Err(TreeError::Format(format!(
                    "node {} at depth {} has no parent",
                    i, depth
                )));
            }
            if self.close_to(depth as usize, visitor)? == Flow::Terminate {
                return Ok(WalkEnd::Terminated);
            }

            let node = tree.read_node(i)?;
            match visitor.node_begin(i, &node, depth)? {
                Flow::Continue => {
                    self.open.push((i, node));
                    i += 1;
                }
                Flow::Skip => {
                    i += 1;
                    while i < count && tree.read_depth(i)? > depth {
                        i += 1;
                    }
                }
                Flow::Terminate => {
                    self.open.clear();
                    return Ok(WalkEnd::Terminated);
                }
            }
        }

        if self.close_to(0, visitor)? == Flow::Terminate {
            return Ok(WalkEnd::Terminated);
        }
        Ok(WalkEnd::Completed)
    }

    /// Finish open nodes until only `depth` of them remain.
    fn close_to<V>(&mut self, depth: usize, visitor: &mut V) -> TreeResult<Flow>
    where
        V: FlatVisitor<N> + ?Sized,
    {
        while self.open.len() > depth {
            if let Some((idx, node)) = self.open.pop() {
                let d = self.open.len() as u8;
                if visitor.node_end(idx, &node, d)? == Flow::Terminate {
                    self.open.clear();
                    return Ok(Flow::Terminate);
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// Run `f` on every node in preorder.
pub fn walk_preorder<A, F>(tree: &A, f: F) -> TreeResult<WalkEnd>
where
    A: FlatAccess + ?Sized,
    F: FnMut(u64, &A::Node, u8) -> TreeResult<Flow>,
{
    FlatTreeWalker::new().walk(tree, &mut Preorder(f))
}
