//! Flat preorder tree storage.
//!
//! A tree of N nodes is kept as two parallel arrays in preorder: one depth
//! byte per node and one fixed-size payload record per node. The children
//! of a node are the contiguous run of following nodes exactly one level
//! deeper, so no child pointers are stored at all.
//!
//! Binary layout (little endian):
//!
//!   [version tag][i32 format][i32 payload size][i64 node count]
//!   [u8 depth; count][payload; count][user data written by the owner]
//!
//! A reader of the base layout stops after the payload array, so trailing
//! user data of a derived tree type is simply left unread.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{TreeError, TreeResult};

/// Highest binary format version this build can read.
pub const FORMAT_VERSION: i32 = 1;

/// Longest version description accepted when reading a file.
const MAX_DESCRIPTION_LEN: u32 = 1 << 16;

/// Fixed-size node record stored in a flat tree.
///
/// `encode`/`decode` always work on a buffer of exactly `SIZE` bytes.
pub trait FlatNode: Copy + Default {
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Self;
}

// ---------------------------------------------------------------------------
// Version tag
// ---------------------------------------------------------------------------

/// Version and free-text description stamped on every persisted tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag {
    pub major: u16,
    pub minor: u16,
    pub revision: u16,
    pub description: String,
}

impl Default for VersionTag {
    fn default() -> Self {
        VersionTag::new("")
    }
}

impl VersionTag {
    pub fn new(description: impl Into<String>) -> Self {
        VersionTag {
            major: 1,
            minor: 0,
            revision: 0,
            description: description.into(),
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> TreeResult<()> {
        w.write_u16::<LittleEndian>(self.major)?;
        w.write_u16::<LittleEndian>(self.minor)?;
        w.write_u16::<LittleEndian>(self.revision)?;
        let bytes = self.description.as_bytes();
        w.write_u32::<LittleEndian>(bytes.len() as u32)?;
        w.write_all(bytes)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> TreeResult<Self> {
        let major = r.read_u16::<LittleEndian>()?;
        let minor = r.read_u16::<LittleEndian>()?;
        let revision = r.read_u16::<LittleEndian>()?;
        let len = r.read_u32::<LittleEndian>()?;
        if len > MAX_DESCRIPTION_LEN {
            return Err(TreeError::Format(format!(
                "version description of {} bytes",
                len
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        r.read_exact(&mut bytes)?;
        let description = String::from_utf8(bytes)
            .map_err(|e| TreeError::Format(format!("version description: {}", e)))?;
        Ok(VersionTag {
            major,
            minor,
            revision,
            description,
        })
    }

    /// Number of bytes `write_to` produces.
    pub fn encoded_len(&self) -> u64 {
        2 * 3 + 4 + self.description.len() as u64
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)?;
        if !self.description.is_empty() {
            write!(f, " {}", self.description)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Uniform read access
// ---------------------------------------------------------------------------

/// Read access shared by in-memory and streamed trees.
///
/// In-memory trees never fail; streamed trees report I/O errors.
pub trait FlatAccess {
    type Node: FlatNode;

    fn node_count(&self) -> u64;

    fn read_depth(&self, i: u64) -> TreeResult<u8>;

    fn read_node(&self, i: u64) -> TreeResult<Self::Node>;
}

// ---------------------------------------------------------------------------
// In-memory tree
// ---------------------------------------------------------------------------

/// In-memory flat tree owning its depth and payload arrays.
#[derive(Debug, Clone)]
pub struct FlatTree<N: FlatNode> {
    version: VersionTag,
    depths: Vec<u8>,
    nodes: Vec<N>,
}

impl<N: FlatNode> FlatTree<N> {
    /// Allocate a tree of `count` nodes, all at depth 0 with default payload.
    /// The caller must fill every node before using the tree.
    pub fn create(count: u64) -> TreeResult<Self> {
        if count == 0 {
            return Err(TreeError::InvalidArgument(
                "node count must be positive".to_string(),
            ));
        }
        let n = usize::try_from(count).map_err(|_| TreeError::TooLarge {
            what: "node count",
            count,
            limit: usize::MAX as u64,
        })?;
        Ok(FlatTree {
            version: VersionTag::default(),
            depths: vec![0u8; n],
            nodes: vec![N::default(); n],
        })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.nodes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn version(&self) -> &VersionTag {
        &self.version
    }

    pub fn set_version(&mut self, version: VersionTag) {
        self.version = version;
    }

    /// Depth of node `i`. Bounds are only asserted in debug builds.
    #[inline]
    pub fn depth(&self, i: u64) -> u8 {
        debug_assert!(i < self.len(), "node {} out of range", i);
        self.depths[i as usize]
    }

    pub fn set_depth(&mut self, i: u64, depth: u8) -> TreeResult<()> {
        self.check_index(i)?;
        self.depths[i as usize] = depth;
        Ok(())
    }

    /// Copy of the payload of node `i`.
    #[inline]
    pub fn node(&self, i: u64) -> N {
        debug_assert!(i < self.len(), "node {} out of range", i);
        self.nodes[i as usize]
    }

    #[inline]
    pub fn node_ref(&self, i: u64) -> &N {
        &self.nodes[i as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, i: u64) -> &mut N {
        &mut self.nodes[i as usize]
    }

    pub fn set_node(&mut self, i: u64, node: N) -> TreeResult<()> {
        self.check_index(i)?;
        self.nodes[i as usize] = node;
        Ok(())
    }

    /// Set depth and payload of node `i` in one call.
    pub fn set(&mut self, i: u64, depth: u8, node: N) -> TreeResult<()> {
        self.check_index(i)?;
        self.depths[i as usize] = depth;
        self.nodes[i as usize] = node;
        Ok(())
    }

    pub fn depths(&self) -> &[u8] {
        &self.depths
    }

    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [N] {
        &mut self.nodes
    }

    /// Deepest depth present in the tree.
    pub fn max_depth(&self) -> u8 {
        self.depths.iter().copied().max().unwrap_or(0)
    }

    fn check_index(&self, i: u64) -> TreeResult<()> {
        if i >= self.len() {
            return Err(TreeError::IndexOutOfRange {
                index: i,
                count: self.len(),
            });
        }
        Ok(())
    }

    /// Check the preorder depth invariant: the root is at depth 0, every
    /// other node at depth >= 1, and no node is more than one level deeper
    /// than its predecessor.
    pub fn validate(&self) -> TreeResult<()> {
        validate_depths(&self.depths)
    }

    // -----------------------------------------------------------------------
    // Binary serialization
    // -----------------------------------------------------------------------

    /// Write the base layout: header, depths and payload.
    pub fn write_to<W: Write>(&self, w: &mut W) -> TreeResult<()> {
        self.version.write_to(w)?;
        w.write_i32::<LittleEndian>(FORMAT_VERSION)?;
        w.write_i32::<LittleEndian>(N::SIZE as i32)?;
        w.write_i64::<LittleEndian>(self.len() as i64)?;
        w.write_all(&self.depths)?;
        let mut buf = vec![0u8; N::SIZE];
        for node in &self.nodes {
            node.encode(&mut buf);
            w.write_all(&buf)?;
        }
        Ok(())
    }

    /// Read the base layout written by `write_to`. Trailing data is left
    /// in the reader.
    pub fn read_from<R: Read>(r: &mut R) -> TreeResult<Self> {
        let header = Header::read_from::<N, R>(r)?;
        let depths = read_bytes(r, header.count)?;
        validate_depths(&depths)?;
        let payload_len = header
            .count
            .checked_mul(N::SIZE as u64)
            .ok_or_else(|| TreeError::Format(format!("node count {}", header.count)))?;
        let nodes = read_bytes(r, payload_len)?
            .chunks_exact(N::SIZE)
            .map(N::decode)
            .collect();
        Ok(FlatTree {
            version: header.version,
            depths,
            nodes,
        })
    }

    pub fn save(&self, path: &Path) -> TreeResult<()> {
        let mut w = std::io::BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> TreeResult<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }
}

impl<N: FlatNode> FlatAccess for FlatTree<N> {
    type Node = N;

    #[inline]
    fn node_count(&self) -> u64 {
        self.len()
    }

    #[inline]
    fn read_depth(&self, i: u64) -> TreeResult<u8> {
        self.check_index(i)?;
        Ok(self.depths[i as usize])
    }

    #[inline]
    fn read_node(&self, i: u64) -> TreeResult<N> {
        self.check_index(i)?;
        Ok(self.nodes[i as usize])
    }
}

fn validate_depths(depths: &[u8]) -> TreeResult<()> {
    match depths.first() {
        None => return Err(TreeError::Format("tree has no nodes".to_string())),
        Some(&d) if d != 0 => {
            return Err(TreeError::Format(format!("root depth is {}", d)));
        }
        _ => {}
    }
    for i in 1..depths.len() {
        let (prev, cur) = (depths[i - 1], depths[i]);
        if cur == 0 || u16::from(cur) > u16::from(prev) + 1 {
            return Err(TreeError::Format(format!(
                "node {} has depth {} after depth {}",
                i, cur, prev
            )));
        }
    }
    Ok(())
}

/// Read exactly `len` bytes. The buffer grows with the data actually read,
/// so a corrupt length fails on the short input instead of allocating it.
pub(crate) fn read_bytes<R: Read>(r: &mut R, len: u64) -> TreeResult<Vec<u8>> {
    let mut buf = Vec::new();
    let got = r.by_ref().take(len).read_to_end(&mut buf)? as u64;
    if got < len {
        return Err(TreeError::Format(format!(
            "input ends after {} of {} bytes",
            got, len
        )));
    }
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

struct Header {
    version: VersionTag,
    count: u64,
}

impl Header {
    fn read_from<N: FlatNode, R: Read>(r: &mut R) -> TreeResult<Header> {
        let version = VersionTag::read_from(r)?;
        let format = r.read_i32::<LittleEndian>()?;
        if format > FORMAT_VERSION {
            return Err(TreeError::UnsupportedVersion {
                found: format,
                max: FORMAT_VERSION,
            });
        }
        let size = r.read_i32::<LittleEndian>()?;
        if size < 0 || size as usize != N::SIZE {
            return Err(TreeError::PayloadSize {
                found: size,
                expected: N::SIZE,
            });
        }
        let count = r.read_i64::<LittleEndian>()?;
        if count <= 0 {
            return Err(TreeError::Format(format!("node count {}", count)));
        }
        Ok(Header {
            version,
            count: count as u64,
        })
    }

    /// Bytes from the start of the file to the depth array.
    fn len(&self) -> u64 {
        self.version.encoded_len() + 4 + 4 + 8
    }
}

// ---------------------------------------------------------------------------
// Streamed tree
// ---------------------------------------------------------------------------

struct StreamState {
    file: File,
    buf: Vec<u8>,
}

/// Tree read directly from its file: every `read_depth`/`read_node` seeks
/// and reads. Supports trees larger than memory at the cost of throughput.
pub struct StreamedTree<N: FlatNode> {
    version: VersionTag,
    count: u64,
    depth_offset: u64,
    payload_offset: u64,
    state: Mutex<StreamState>,
    _node: PhantomData<N>,
}

impl<N: FlatNode> StreamedTree<N> {
    pub fn open(path: &Path) -> TreeResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header = Header::read_from::<N, _>(&mut reader)?;
        let depth_offset = header.len();
        let payload_offset = depth_offset + header.count;
        let file = reader.into_inner();
        let expected = payload_offset + header.count * N::SIZE as u64;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(TreeError::Format(format!(
                "file holds {} bytes, tree needs {}",
                actual, expected
            )));
        }
        Ok(StreamedTree {
            version: header.version,
            count: header.count,
            depth_offset,
            payload_offset,
            state: Mutex::new(StreamState {
                file,
                buf: vec![0u8; N::SIZE],
            }),
            _node: PhantomData,
        })
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn version(&self) -> &VersionTag {
        &self.version
    }

    /// File offset of the owner's trailing user data.
    pub fn user_data_offset(&self) -> u64 {
        self.payload_offset + self.count * N::SIZE as u64
    }

    fn check_index(&self, i: u64) -> TreeResult<()> {
        if i >= self.count {
            return Err(TreeError::IndexOutOfRange {
                index: i,
                count: self.count,
            });
        }
        Ok(())
    }
}

impl<N: FlatNode> FlatAccess for StreamedTree<N> {
    type Node = N;

    fn node_count(&self) -> u64 {
        self.count
    }

    fn read_depth(&self, i: u64) -> TreeResult<u8> {
        self.check_index(i)?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.file.seek(SeekFrom::Start(self.depth_offset + i))?;
        Ok(state.file.read_u8()?)
    }

    fn read_node(&self, i: u64) -> TreeResult<N> {
        self.check_index(i)?;
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        state
            .file
            .seek(SeekFrom::Start(self.payload_offset + i * N::SIZE as u64))?;
        state.file.read_exact(&mut state.buf)?;
        Ok(N::decode(&state.buf))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::ByteOrder;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    pub(crate) struct IdNode {
        pub id: i32,
        pub weight: f64,
    }

    impl FlatNode for IdNode {
        const SIZE: usize = 12;

        fn encode(&self, buf: &mut [u8]) {
            LittleEndian::write_i32(&mut buf[0..4], self.id);
            LittleEndian::write_f64(&mut buf[4..12], self.weight);
        }

        fn decode(buf: &[u8]) -> Self {
            IdNode {
                id: LittleEndian::read_i32(&buf[0..4]),
                weight: LittleEndian::read_f64(&buf[4..12]),
            }
        }
    }

    /// Build a tree from a depth list; node i gets id i.
    pub(crate) fn id_tree(depths: &[u8]) -> FlatTree<IdNode> {
        let mut tree = FlatTree::<IdNode>::create(depths.len() as u64).unwrap();
        for (i, &d) in depths.iter().enumerate() {
            let node = IdNode {
                id: i as i32,
                weight: i as f64 * 0.1,
            };
            tree.set(i as u64, d, node).unwrap();
        }
        tree
    }

    #[test]
    fn create_rejects_empty_tree() {
        assert!(FlatTree::<IdNode>::create(0).is_err());
    }

    #[test]
    fn set_depth_out_of_range_fails() {
        let mut tree = FlatTree::<IdNode>::create(3).unwrap();
        assert!(tree.set_depth(2, 1).is_ok());
        match tree.set_depth(3, 1) {
            Err(TreeError::IndexOutOfRange { index, count }) => {
                assert_eq!(index, 3);
                assert_eq!(count, 3);
            }
            other => panic!("expected IndexOutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn binary_roundtrip_preserves_everything() {
        let mut tree = id_tree(&[0, 1, 2, 2, 1, 2]);
        tree.set_version(VersionTag::new("id tree"));
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();

        let back = FlatTree::<IdNode>::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(back.version(), tree.version());
        assert_eq!(back.depths(), tree.depths());
        assert_eq!(back.nodes(), tree.nodes());
    }

    #[test]
    fn base_reader_ignores_trailing_user_data() {
        let tree = id_tree(&[0, 1, 1]);
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();
        bytes.extend_from_slice(b"derived tree data");

        let mut reader = bytes.as_slice();
        let back = FlatTree::<IdNode>::read_from(&mut reader).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(reader, b"derived tree data");
    }

    #[test]
    fn future_format_version_is_rejected() {
        let tree = id_tree(&[0, 1]);
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();
        let at = tree.version().encoded_len() as usize;
        LittleEndian::write_i32(&mut bytes[at..at + 4], FORMAT_VERSION + 1);

        match FlatTree::<IdNode>::read_from(&mut bytes.as_slice()) {
            Err(TreeError::UnsupportedVersion { found, max }) => {
                assert_eq!(found, FORMAT_VERSION + 1);
                assert_eq!(max, FORMAT_VERSION);
            }
            other => panic!("expected UnsupportedVersion, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn payload_size_mismatch_is_rejected() {
        let tree = id_tree(&[0, 1]);
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();
        let at = tree.version().encoded_len() as usize + 4;
        LittleEndian::write_i32(&mut bytes[at..at + 4], 7);

        assert!(matches!(
            FlatTree::<IdNode>::read_from(&mut bytes.as_slice()),
            Err(TreeError::PayloadSize { found: 7, .. })
        ));
    }

    #[test]
    fn huge_node_count_fails_on_short_input() {
        let tree = id_tree(&[0, 1, 1]);
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();
        let at = tree.version().encoded_len() as usize + 8;
        LittleEndian::write_i64(&mut bytes[at..at + 8], 1 << 45);

        assert!(matches!(
            FlatTree::<IdNode>::read_from(&mut bytes.as_slice()),
            Err(TreeError::Format(_))
        ));
    }

    #[test]
    fn huge_description_length_is_rejected() {
        let mut bytes = Vec::new();
        VersionTag::new("ids").write_to(&mut bytes).unwrap();
        LittleEndian::write_u32(&mut bytes[6..10], u32::MAX);
        assert!(matches!(
            VersionTag::read_from(&mut bytes.as_slice()),
            Err(TreeError::Format(_))
        ));
    }

    #[test]
    fn broken_preorder_is_rejected() {
        let tree = id_tree(&[0, 1, 1]);
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();
        let at = tree.version().encoded_len() as usize + 16;
        bytes[at + 2] = 3;

        assert!(matches!(
            FlatTree::<IdNode>::read_from(&mut bytes.as_slice()),
            Err(TreeError::Format(_))
        ));
    }

    #[test]
    fn streamed_access_matches_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.bin");
        let tree = id_tree(&[0, 1, 2, 3, 1, 2]);
        tree.save(&path).unwrap();

        let streamed = StreamedTree::<IdNode>::open(&path).unwrap();
        assert_eq!(streamed.len(), tree.len());
        for i in (0..tree.len()).rev() {
            assert_eq!(streamed.read_depth(i).unwrap(), tree.depth(i));
            assert_eq!(streamed.read_node(i).unwrap(), tree.node(i));
        }
        assert!(streamed.read_node(tree.len()).is_err());
    }
}
