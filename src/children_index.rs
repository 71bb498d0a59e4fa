//! Children index of a flat tree.
//!
//! Two arrays give O(1) random access to the children of any node:
//! `begin[p]..begin[p + 1]` is the slice of `children` holding the child
//! node ids of p in preorder. Built in two linear passes; can
//! be saved next to a large tree and loaded instead of rebuilt.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{TreeError, TreeResult};
use crate::flat_tree::{read_bytes, FlatAccess, VersionTag, FORMAT_VERSION};
use crate::flat_walker::{FlatTreeWalker, FlatVisitor};
use crate::walker::{Flow, TreeAccess};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildrenIndex {
    begin: Vec<u32>,
    children: Vec<u32>,
}

struct CountPass {
    path: Vec<u64>,
    counts: Vec<u32>,
}

impl<N> FlatVisitor<N> for CountPass {
    fn node_begin(&mut self, idx: u64, _node: &N, _depth: u8) -> TreeResult<Flow> {
        self.path.push(idx);
        Ok(Flow::Continue)
    }

    fn node_end(&mut self, _idx: u64, _node: &N, _depth: u8) -> TreeResult<Flow> {
        self.path.pop();
        if let Some(&parent) = self.path.last() {
            self.counts[parent as usize] += 1;
        }
        Ok(Flow::Continue)
    }
}

struct PlacePass<'a> {
    path: Vec<u64>,
    next: Vec<u32>,
    children: &'a mut [u32],
}

impl<N> FlatVisitor<N> for PlacePass<'_> {
    fn node_begin(&mut self, idx: u64, _node: &N, depth: u8) -> TreeResult<Flow> {
        self.path.truncate(depth as usize);
        if let Some(&parent) = self.path.last() {
            let slot = &mut self.next[parent as usize];
            self.children[*slot as usize] = idx as u32;
            *slot += 1;
        }
        self.path.push(idx);
        Ok(Flow::Continue)
    }
}

impl ChildrenIndex {
    pub fn build<A: FlatAccess + ?Sized>(tree: &A) -> TreeResult<Self> {
        let n = tree.node_count();
        if n == 0 {
            return Err(TreeError::InvalidArgument("empty tree".to_string()));
        }
        if n - 1 > i32::MAX as u64 {
            return Err(TreeError::TooLarge {
                what: "children index",
                count: n - 1,
                limit: i32::MAX as u64,
            });
        }
        let n = n as usize;
        let mut walker = FlatTreeWalker::new();

        let mut count = CountPass {
            path: Vec::new(),
            counts: vec![0u32; n],
        };
        walker.walk(tree, &mut count)?;

        let mut begin = Vec::with_capacity(n + 1);
        let mut total = 0u32;
        begin.push(0);
        for &c in &count.counts {
            total += c;
            begin.push(total);
        }

        let mut children = vec![0u32; n - 1];
        let mut place = PlacePass {
            path: Vec::new(),
            next: begin[..n].to_vec(),
            children: &mut children,
        };
        walker.walk(tree, &mut place)?;

        log::debug!("built children index over {} nodes", n);
        Ok(ChildrenIndex { begin, children })
    }

    pub fn node_count(&self) -> u64 {
        (self.begin.len() - 1) as u64
    }

    /// Position of the first child in the flat child list, and child count.
    #[inline]
    pub fn children_range(&self, node: u64) -> (u32, u32) {
        let b = self.begin[node as usize];
        (b, self.begin[node as usize + 1] - b)
    }

    /// Node id stored at position `flat` of the flat child list.
    #[inline]
    pub fn child_at(&self, flat: u32) -> u64 {
        self.children[flat as usize] as u64
    }

    #[inline]
    pub fn children(&self, node: u64) -> &[u32] {
        let (b, c) = self.children_range(node);
        &self.children[b as usize..(b + c) as usize]
    }

    #[inline]
    pub fn child_count(&self, node: u64) -> usize {
        self.children_range(node).1 as usize
    }

    #[inline]
    pub fn is_leaf(&self, node: u64) -> bool {
        self.child_count(node) == 0
    }

    /// Leaves in preorder.
    pub fn leaves(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.node_count()).filter(move |&n| self.is_leaf(n))
    }

    // -----------------------------------------------------------------------
    // Side file
    // -----------------------------------------------------------------------

    /// Write the index, stamped with the version tag of the tree it indexes.
    pub fn write_to<W: Write>(&self, w: &mut W, source: &VersionTag) -> TreeResult<()> {
        VersionTag::new("children index").write_to(w)?;
        w.write_i32::<LittleEndian>(FORMAT_VERSION)?;
        source.write_to(w)?;
        w.write_u64::<LittleEndian>(self.node_count())?;
        for &b in &self.begin {
            w.write_u32::<LittleEndian>(b)?;
        }
        for &c in &self.children {
            w.write_u32::<LittleEndian>(c)?;
        }
        Ok(())
    }

    /// Read an index and the version tag of its source tree.
    pub fn read_from<R: Read>(r: &mut R) -> TreeResult<(Self, VersionTag)> {
        let _own = VersionTag::read_from(r)?;
        let format = r.read_i32::<LittleEndian>()?;
        if format > FORMAT_VERSION {
            return Err(TreeError::UnsupportedVersion {
                found: format,
                max: FORMAT_VERSION,
            });
        }
        let source = VersionTag::read_from(r)?;
        let n = r.read_u64::<LittleEndian>()?;
        if n == 0 || n - 1 > i32::MAX as u64 {
            return Err(TreeError::Format(format!("children index over {} nodes", n)));
        }
        let begin = read_u32s(r, n + 1)?;
        let children = read_u32s(r, n - 1)?;
        let index = ChildrenIndex { begin, children };
        index.check()?;
        Ok((index, source))
    }

    /// Structural checks on a loaded index: prefix sums start at 0, never
    /// decrease and cover every non-root node; each child id lies after
    /// its parent and inside the tree.
    fn check(&self) -> TreeResult<()> {
        let n = self.node_count();
        if self.begin[0] != 0 || self.begin[n as usize] as u64 != n - 1 {
            return Err(TreeError::Format(
                "children index prefix sums do not cover the tree".to_string(),
            ));
        }
        if let Some(p) = self.begin.windows(2).position(|w| w[0] > w[1]) {
            return Err(TreeError::Format(format!(
                "children index prefix sums decrease at node {}",
                p
            )));
        }
        for p in 0..n {
            if let Some(&c) = self
                .children(p)
                .iter()
                .find(|&&c| c as u64 <= p || c as u64 >= n)
            {
                return Err(TreeError::Format(format!(
                    "children index lists node {} under node {} of {}",
                    c, p, n
                )));
            }
        }
        Ok(())
    }

    /// Load the index from `path` unless it is missing, stale or
    /// `force_rebuild` is set; otherwise build it and write the side file.
    pub fn load_or_build<A: FlatAccess + ?Sized>(
        tree: &A,
        source: &VersionTag,
        path: &Path,
        force_rebuild: bool,
    ) -> TreeResult<Self> {
        if !force_rebuild && path.exists() {
            let mut r = BufReader::new(File::open(path)?);
            let (index, tag) = Self::read_from(&mut r)?;
            if index.node_count() == tree.node_count() && &tag == source {
                log::info!("loaded children index from {}", path.display());
                return Ok(index);
            }
            log::warn!(
                "children index {} was built for another tree ({}), rebuilding",
                path.display(),
                tag
            );
        }
        let index = Self::build(tree)?;
        let mut w = BufWriter::new(File::create(path)?);
        index.write_to(&mut w, source)?;
        w.flush()?;
        Ok(index)
    }
}

fn read_u32s<R: Read>(r: &mut R, count: u64) -> TreeResult<Vec<u32>> {
    let bytes = read_bytes(r, count * 4)?;
    let mut values = vec![0u32; count as usize];
    LittleEndian::read_u32_into(&bytes, &mut values);
    Ok(values)
}

/// A flat tree paired with its children index, walkable by the generic
/// [`crate::walker::TreeWalker`]. Nodes are node ids.
pub struct IndexedTree<'a, A: ?Sized> {
    pub tree: &'a A,
    pub index: &'a ChildrenIndex,
}

impl<'a, A: FlatAccess + ?Sized> IndexedTree<'a, A> {
    pub fn new(tree: &'a A, index: &'a ChildrenIndex) -> Self {
        IndexedTree { tree, index }
    }
}

impl<A: FlatAccess + ?Sized> TreeAccess for IndexedTree<'_, A> {
    type Node = u64;

    fn next_child(&self, node: &u64, cursor: &mut usize) -> Option<u64> {
        let kids = self.index.children(*node);
        let child = kids.get(*cursor).map(|&c| c as u64);
        *cursor += 1;
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat_tree::tests::{id_tree, IdNode};
    use crate::flat_tree::FlatTree;
    use crate::walker::{TreeWalker, Visitor};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn naive_children(depths: &[u8], p: usize) -> Vec<u32> {
        let mut kids = Vec::new();
        let mut j = p + 1;
        while j < depths.len() && depths[j] > depths[p] {
            if depths[j] == depths[p] + 1 {
                kids.push(j as u32);
            }
            j += 1;
        }
        kids
    }

    fn random_depths(rng: &mut StdRng, n: usize) -> Vec<u8> {
        let mut depths = vec![0u8];
        for _ in 1..n {
            let prev = *depths.last().unwrap();
            depths.push(rng.gen_range(1..=prev + 1));
        }
        depths
    }

    #[test]
    fn five_node_example() {
        let tree = id_tree(&[0, 1, 2, 1, 1]);
        let index = ChildrenIndex::build(&tree).unwrap();

        assert_eq!(index.children(0), &[1, 3, 4]);
        assert_eq!(index.children(1), &[2]);
        assert!(index.is_leaf(2));
        assert_eq!(index.children_range(0), (0, 3));
        assert_eq!(index.child_at(3), 2);
        assert_eq!(index.leaves().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn matches_naive_scan_on_random_trees() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [1usize, 2, 10, 200, 1000] {
            let depths = random_depths(&mut rng, n);
            let tree = id_tree(&depths);
            let index = ChildrenIndex::build(&tree).unwrap();
            for p in 0..n {
                assert_eq!(
                    index.children(p as u64),
                    naive_children(&depths, p).as_slice(),
                    "children of node {} in tree of {} nodes",
                    p,
                    n
                );
            }
        }
    }

    #[test]
    fn side_file_roundtrip_and_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.idx");
        let tree = id_tree(&[0, 1, 2, 2, 1]);
        let tag = VersionTag::new("ids");

        let built = ChildrenIndex::load_or_build(&tree, &tag, &path, false).unwrap();
        assert!(path.exists());
        let loaded = ChildrenIndex::load_or_build(&tree, &tag, &path, false).unwrap();
        assert_eq!(built, loaded);

        // A different tree with a different tag must not reuse the file.
        let other = id_tree(&[0, 1, 1, 1]);
        let other_tag = VersionTag::new("other");
        let rebuilt = ChildrenIndex::load_or_build(&other, &other_tag, &path, false).unwrap();
        assert_eq!(rebuilt.children(0), &[1, 2, 3]);

        let mut r = BufReader::new(File::open(&path).unwrap());
        let (_, source) = ChildrenIndex::read_from(&mut r).unwrap();
        assert_eq!(source, other_tag);
    }

    /// Side file bytes of `[0, 1, 2, 2, 1]` and the offsets of its two arrays.
    fn side_file_bytes() -> (Vec<u8>, usize, usize) {
        let tree = id_tree(&[0, 1, 2, 2, 1]);
        let tag = VersionTag::new("ids");
        let index = ChildrenIndex::build(&tree).unwrap();
        let mut bytes = Vec::new();
        index.write_to(&mut bytes, &tag).unwrap();
        let begin_at =
            (VersionTag::new("children index").encoded_len() + 4 + tag.encoded_len() + 8) as usize;
        let children_at = begin_at + 4 * 6;
        assert_eq!(bytes.len(), children_at + 4 * 4);
        (bytes, begin_at, children_at)
    }

    fn assert_format_error(bytes: &[u8]) {
        let result = ChildrenIndex::read_from(&mut &bytes[..]);
        assert!(matches!(result, Err(TreeError::Format(_))), "{:?}", result);
    }

    #[test]
    fn corrupt_side_file_is_rejected() {
        let (bytes, begin_at, children_at) = side_file_bytes();
        assert!(ChildrenIndex::read_from(&mut bytes.as_slice()).is_ok());

        // begin = [0, 9, 4, 4, 4, 4] still ends at n - 1 but decreases
        let mut decreasing = bytes.clone();
        LittleEndian::write_u32(&mut decreasing[begin_at + 4..begin_at + 8], 9);
        assert_format_error(&decreasing);

        let mut late_start = bytes.clone();
        LittleEndian::write_u32(&mut late_start[begin_at..begin_at + 4], 1);
        assert_format_error(&late_start);

        // the root listed as its own child
        let mut self_child = bytes.clone();
        LittleEndian::write_u32(&mut self_child[children_at..children_at + 4], 0);
        assert_format_error(&self_child);

        let mut outside = bytes.clone();
        LittleEndian::write_u32(&mut outside[children_at + 8..children_at + 12], 7);
        assert_format_error(&outside);

        assert_format_error(&bytes[..bytes.len() - 2]);
    }

    #[test]
    fn load_or_build_surfaces_a_corrupt_side_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.idx");
        let (mut bytes, _, children_at) = side_file_bytes();
        LittleEndian::write_u32(&mut bytes[children_at..children_at + 4], 5);
        std::fs::write(&path, &bytes).unwrap();

        let tree = id_tree(&[0, 1, 2, 2, 1]);
        let result = ChildrenIndex::load_or_build(&tree, &VersionTag::new("ids"), &path, false);
        assert!(matches!(result, Err(TreeError::Format(_))));
        // a forced rebuild replaces the broken file
        let rebuilt = ChildrenIndex::load_or_build(&tree, &VersionTag::new("ids"), &path, true);
        assert_eq!(rebuilt.unwrap().children(0), &[1, 4]);
    }

    type IdIndexed<'a> = IndexedTree<'a, FlatTree<IdNode>>;

    #[derive(Default)]
    struct Order(Vec<u64>);

    impl<'a> Visitor<IdIndexed<'a>> for Order {
        fn node_begin(&mut self, _tree: &IdIndexed<'a>, node: &u64, _depth: usize) -> Flow {
            self.0.push(*node);
            Flow::Continue
        }
    }

    #[test]
    fn generic_walker_over_indexed_tree_is_preorder() {
        let tree = id_tree(&[0, 1, 2, 3, 1, 2, 2]);
        let index = ChildrenIndex::build(&tree).unwrap();
        let indexed = IndexedTree::new(&tree, &index);
        let mut order = Order::default();
        TreeWalker::new().walk(&indexed, 0, &mut order);
        assert_eq!(order.0, (0..7).collect::<Vec<u64>>());
    }
}
