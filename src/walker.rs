//! Generic depth-first tree walker.
//!
//! Works on any tree that can hand out the i-th child of a node through
//! [`TreeAccess::next_child`]. The walk keeps an explicit stack of per-depth
//! frames instead of recursing, so arbitrarily deep trees are safe, and the
//! frames are reused between walks and between siblings.

/// What a visitor hook wants the walker to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going (descend into the node when returned from `node_begin`).
    Continue,
    /// Do not descend into this node; its `node_end` is not called.
    Skip,
    /// Stop the walk right after this hook returns.
    Terminate,
}

/// How a walk finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    Completed,
    Terminated,
}

/// Child accessor of a tree.
pub trait TreeAccess {
    type Node: Clone;

    /// Return the child at position `*cursor` and advance the cursor, or
    /// `None` once the children of `node` are exhausted. The cursor starts
    /// at 0 for every node.
    fn next_child(&self, node: &Self::Node, cursor: &mut usize) -> Option<Self::Node>;
}

/// Walk hooks. Every hook has a no-op default.
pub trait Visitor<T: TreeAccess + ?Sized> {
    fn tree_begin(&mut self, _tree: &T, _root: &T::Node) -> Flow {
        Flow::Continue
    }

    /// Checked before `node_begin`; `true` skips the node and its subtree
    /// without calling either node hook.
    fn prune(&mut self, _tree: &T, _node: &T::Node, _depth: usize) -> bool {
        false
    }

    /// Pre-order hook.
    fn node_begin(&mut self, _tree: &T, _node: &T::Node, _depth: usize) -> Flow {
        Flow::Continue
    }

    /// Post-order hook, called once all children are done. `Skip` is
    /// treated as `Continue` here.
    fn node_end(&mut self, _tree: &T, _node: &T::Node, _depth: usize) -> Flow {
        Flow::Continue
    }

    /// Always called exactly once, also after a termination.
    fn tree_end(&mut self, _tree: &T, _root: &T::Node) {}
}

struct Frame<N> {
    node: Option<N>,
    cursor: usize,
}

/// Explicit-stack DFS. Keep one walker around to reuse its frame stack.
pub struct TreeWalker<N> {
    frames: Vec<Frame<N>>,
}

impl<N: Clone> Default for TreeWalker<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone> TreeWalker<N> {
    pub fn new() -> Self {
        TreeWalker { frames: Vec::new() }
    }

    /// Deepest stack used so far.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn walk<T, V>(&mut self, tree: &T, root: N, visitor: &mut V) -> WalkEnd
    where
        T: TreeAccess<Node = N> + ?Sized,
        V: Visitor<T> + ?Sized,
    {
        let mut terminated = visitor.tree_begin(tree, &root) == Flow::Terminate;
        // Number of open frames; frame k holds the open node at depth k.
        let mut depth = 0usize;

        if !terminated {
            match self.enter(tree, visitor, root.clone(), 0) {
                Flow::Continue => depth = 1,
                Flow::Skip => {}
                Flow::Terminate => terminated = true,
            }
        }

        while depth > 0 && !terminated {
            let top = depth - 1;
            let next = {
                let frame = &mut self.frames[top];
                match frame.node.as_ref() {
                    Some(node) => tree.next_child(node, &mut frame.cursor),
                    None => None,
                }
            };
            match next {
                Some(child) => match self.enter(tree, visitor, child, depth) {
                    Flow::Continue => depth += 1,
                    Flow::Skip => {}
                    Flow::Terminate => terminated = true,
                },
                None => {
                    depth -= 1;
                    if let Some(node) = self.frames[top].node.take() {
                        if visitor.node_end(tree, &node, top) == Flow::Terminate {
                            terminated = true;
                        }
                    }
                }
            }
        }

        for frame in self.frames.iter_mut() {
            frame.node = None;
        }
        visitor.tree_end(tree, &root);

        if terminated {
            WalkEnd::Terminated
        } else {
            WalkEnd::Completed
        }
    }

    fn enter<T, V>(&mut self, tree: &T, visitor: &mut V, node: N, depth: usize) -> Flow
    where
        T: TreeAccess<Node = N> + ?Sized,
        V: Visitor<T> + ?Sized,
    {
        if visitor.prune(tree, &node, depth) {
            return Flow::Skip;
        }
        let flow = visitor.node_begin(tree, &node, depth);
        if flow == Flow::Continue {
            if self.frames.len() <= depth {
                self.frames.push(Frame {
                    node: None,
                    cursor: 0,
                });
            }
            let frame = &mut self.frames[depth];
            frame.node = Some(node);
            frame.cursor = 0;
        }
        flow
    }
}

// ---------------------------------------------------------------------------
// Small algorithms on top of the walker
// ---------------------------------------------------------------------------

struct Counter {
    nodes: usize,
    leaves: usize,
    max_depth: usize,
}

impl<T: TreeAccess + ?Sized> Visitor<T> for Counter {
    fn node_begin(&mut self, tree: &T, node: &T::Node, depth: usize) -> Flow {
        self.nodes += 1;
        self.max_depth = self.max_depth.max(depth);
        let mut cursor = 0;
        if tree.next_child(node, &mut cursor).is_none() {
            self.leaves += 1;
        }
        Flow::Continue
    }
}

/// Node, leaf and depth statistics of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub max_depth: usize,
}

pub fn tree_stats<T: TreeAccess + ?Sized>(tree: &T, root: T::Node) -> TreeStats {
    let mut counter = Counter {
        nodes: 0,
        leaves: 0,
        max_depth: 0,
    };
    TreeWalker::new().walk(tree, root, &mut counter);
    TreeStats {
        nodes: counter.nodes,
        leaves: counter.leaves,
        max_depth: counter.max_depth,
    }
}

struct Finder<N, P> {
    pred: P,
    found: Option<(N, usize)>,
}

impl<N, T, P> Visitor<T> for Finder<N, P>
where
    N: Clone,
    T: TreeAccess<Node = N> + ?Sized,
    P: FnMut(&N, usize) -> bool,
{
    fn node_begin(&mut self, _tree: &T, node: &N, depth: usize) -> Flow {
        if (self.pred)(node, depth) {
            self.found = Some((node.clone(), depth));
            return Flow::Terminate;
        }
        Flow::Continue
    }
}

/// First node in preorder matching `pred`, with its depth.
pub fn find_first<T, P>(tree: &T, root: T::Node, pred: P) -> Option<(T::Node, usize)>
where
    T: TreeAccess + ?Sized,
    P: FnMut(&T::Node, usize) -> bool,
{
    let mut finder = Finder { pred, found: None };
    TreeWalker::new().walk(tree, root, &mut finder);
    finder.found
}
