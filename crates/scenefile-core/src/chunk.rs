//! The chunk: the atomic serialization unit of the container format.
//!
//! A chunk is a DWORD stream payload plus three optional side lists:
//!
//! - an **ID list** of payload offsets holding object IDs, so references can
//!   be rewritten in place without re-parsing the payload;
//! - a **sub-chunk list** of chunks exclusively owned by this one;
//! - a **manager list** of payload offsets holding manager-scoped integers.
//!
//! Both offset lists use the same encoding: a non-negative entry is the
//! offset of a single slot, and the pair `[-1, offset]` marks a sequence
//! whose count word sits at `offset`, followed by `count` entries.
//!
//! # Binary layout
//!
//! ```text
//! [header DWORD][payload word count][payload words]
//! [ID count][ID entries]                      (if IDS option)
//! [sub-chunk count]{[size in words][chunk]}   (if SUB_CHUNKS option)
//! [manager count][manager entries]            (if MANAGERS option)
//! ```
//!
//! Header DWORD: bits 0-7 data version, 8-15 class tag, 16-23 chunk
//! version, 24-31 options. All values are little-endian.

use crate::error::ErrorKind;
use crate::id::{ClassId, Guid, ObjectId};
use std::ops::BitOr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current chunk format version written into every header.
pub const CHUNK_VERSION: u8 = 7;

/// Maximum sub-chunk nesting accepted when decoding.
pub const MAX_CHUNK_DEPTH: usize = 64;

/// Marker preceding the offset of a sequence in an offset list.
pub(crate) const SEQUENCE_MARKER: i32 = -1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building, reading or decoding a chunk.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("read of {requested} words at offset {offset} overruns payload of {len} words")]
    Overrun {
        offset: usize,
        requested: usize,
        len: usize,
    },
    #[error("unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },
    #[error("sub-chunk {index} is malformed")]
    SubChunk {
        index: usize,
        #[source]
        source: Box<ChunkError>,
    },
    #[error("sub-chunk index {index} out of range ({count} sub-chunks)")]
    NoSuchSubChunk { index: u32, count: usize },
    #[error("{what} entry {entry} at position {position} is out of range")]
    InvalidOffset {
        what: &'static str,
        position: usize,
        entry: i64,
    },
    #[error("sequence of {len} entries exceeds the limit of {limit}")]
    SequenceTooLong { len: usize, limit: usize },
    #[error("sequence declares {count} entries but only {available} words remain in its section")]
    BadCount { count: usize, available: usize },
    #[error("chunk nesting exceeds {0} levels")]
    TooDeep(usize),
    #[error("corrupt chunk: {0}")]
    Corrupt(String),
}

impl ChunkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkError::Overrun { .. } => ErrorKind::Overrun,
            ChunkError::UnexpectedEof { .. } => ErrorKind::UnexpectedEof,
            ChunkError::SubChunk { source, .. } => source.kind(),
            ChunkError::NoSuchSubChunk { .. } | ChunkError::InvalidOffset { .. } => {
                ErrorKind::InvalidOffset
            }
            ChunkError::SequenceTooLong { .. } | ChunkError::BadCount { .. } => {
                ErrorKind::Validation
            }
            ChunkError::TooDeep(_) | ChunkError::Corrupt(_) => ErrorKind::Corrupt,
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// The `chunk_options` bitmask stored in the top byte of the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChunkOptions(u8);

impl ChunkOptions {
    pub const NONE: Self = Self(0);
    /// The chunk carries an ID list.
    pub const IDS: Self = Self(0x01);
    /// The chunk carries a manager-int list.
    pub const MANAGERS: Self = Self(0x02);
    /// The chunk carries sub-chunks.
    pub const SUB_CHUNKS: Self = Self(0x04);
    /// Written with a file context (IDs are file IDs).
    pub const FILE: Self = Self(0x08);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for ChunkOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Offset-list entries
// ---------------------------------------------------------------------------

/// One decoded entry of an ID or manager offset list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    /// A single slot at this payload offset.
    Single(usize),
    /// A sequence whose count word sits at this payload offset.
    Sequence(usize),
}

/// Iterate the entries of an offset list. Stops at the first malformed entry;
/// decoded chunks have already been validated.
pub(crate) fn slot_refs(list: &[i32]) -> impl Iterator<Item = SlotRef> + '_ {
    let mut i = 0;
    std::iter::from_fn(move || {
        let entry = *list.get(i)?;
        if entry == SEQUENCE_MARKER {
            let offset = *list.get(i + 1)?;
            i += 2;
            usize::try_from(offset).ok().map(SlotRef::Sequence)
        } else {
            i += 1;
            usize::try_from(entry).ok().map(SlotRef::Single)
        }
    })
}

/// Payload offsets of every slot an offset list covers, sequences expanded.
pub(crate) fn covered_slots(list: &[i32], words: &[u32]) -> Vec<usize> {
    let mut out = Vec::new();
    for r in slot_refs(list) {
        match r {
            SlotRef::Single(offset) => out.push(offset),
            SlotRef::Sequence(offset) => {
                let count = words.get(offset).copied().unwrap_or(0) as usize;
                let end = (offset + 1 + count).min(words.len());
                out.extend(offset + 1..end);
            }
        }
    }
    out
}

fn validate_slot_list(list: &[i32], words: &[u32], what: &'static str) -> Result<(), ChunkError> {
    let len = words.len();
    let mut i = 0;
    while i < list.len() {
        let entry = list[i];
        if entry == SEQUENCE_MARKER {
            let Some(&offset) = list.get(i + 1) else {
                return Err(ChunkError::InvalidOffset {
                    what,
                    position: i,
                    entry: entry as i64,
                });
            };
            let bad = || ChunkError::InvalidOffset {
                what,
                position: i + 1,
                entry: offset as i64,
            };
            let offset = usize::try_from(offset).map_err(|_| bad())?;
            let count = *words.get(offset).ok_or_else(bad)? as usize;
            if count > len - offset - 1 {
                return Err(bad());
            }
            i += 2;
        } else {
            let in_range = usize::try_from(entry).map(|o| o < len).unwrap_or(false);
            if !in_range {
                return Err(ChunkError::InvalidOffset {
                    what,
                    position: i,
                    entry: entry as i64,
                });
            }
            i += 1;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Compression bookkeeping
// ---------------------------------------------------------------------------

/// Informational record of how the section a chunk came from was stored.
/// The payload held by a [`Chunk`] is always uncompressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionInfo {
    pub unpacked_size: usize,
    pub packed_size: usize,
    pub compressed: bool,
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A serialized object or manager state. See the module docs for the layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub(crate) class_id: ClassId,
    pub(crate) data_version: u8,
    pub(crate) chunk_version: u8,
    pub(crate) options: ChunkOptions,
    pub(crate) words: Vec<u32>,
    pub(crate) ids: Vec<i32>,
    pub(crate) sub_chunks: Vec<Chunk>,
    pub(crate) managers: Vec<i32>,
    pub(crate) compression: CompressionInfo,
}

impl Chunk {
    /// An empty chunk at the current chunk version.
    pub fn new(class_id: ClassId, data_version: u8) -> Self {
        Self {
            class_id,
            data_version,
            chunk_version: CHUNK_VERSION,
            ..Self::default()
        }
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn set_class_id(&mut self, class_id: ClassId) {
        self.class_id = class_id;
    }

    pub fn data_version(&self) -> u8 {
        self.data_version
    }

    pub fn set_data_version(&mut self, version: u8) {
        self.data_version = version;
    }

    pub fn chunk_version(&self) -> u8 {
        self.chunk_version
    }

    pub fn options(&self) -> ChunkOptions {
        self.options
    }

    /// Set caller-controlled option bits. List bits are managed by the writer.
    pub fn insert_options(&mut self, options: ChunkOptions) {
        self.options.insert(options);
    }

    /// The payload as DWORDs.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
            && self.ids.is_empty()
            && self.sub_chunks.is_empty()
            && self.managers.is_empty()
    }

    /// Raw ID-list entries (offsets and sequence markers).
    pub fn id_list(&self) -> &[i32] {
        &self.ids
    }

    /// Raw manager-list entries (offsets and sequence markers).
    pub fn manager_list(&self) -> &[i32] {
        &self.managers
    }

    pub fn sub_chunks(&self) -> &[Chunk] {
        &self.sub_chunks
    }

    pub fn sub_chunk(&self, index: usize) -> Option<&Chunk> {
        self.sub_chunks.get(index)
    }

    pub fn compression(&self) -> CompressionInfo {
        self.compression
    }

    pub fn set_compression(&mut self, info: CompressionInfo) {
        self.compression = info;
    }

    /// Every object ID referenced through this chunk's ID list, in list order.
    /// Sub-chunks are not included.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        covered_slots(&self.ids, &self.words)
            .into_iter()
            .filter_map(|o| self.words.get(o).map(|&w| ObjectId(w)))
            .collect()
    }

    /// Every manager-scoped integer recorded in the manager list.
    pub fn manager_values(&self) -> Vec<i32> {
        covered_slots(&self.managers, &self.words)
            .into_iter()
            .filter_map(|o| self.words.get(o).map(|&w| w as i32))
            .collect()
    }

    /// Pass every object-ID slot of this chunk and its sub-chunks through
    /// `translate`, storing the result in place. Returns the number of slots
    /// visited.
    pub fn remap_ids<F>(&mut self, translate: &mut F) -> usize
    where
        F: FnMut(ObjectId) -> ObjectId,
    {
        let mut visited = 0;
        for offset in covered_slots(&self.ids, &self.words) {
            if let Some(slot) = self.words.get_mut(offset) {
                *slot = translate(ObjectId(*slot)).0;
                visited += 1;
            }
        }
        for sub in &mut self.sub_chunks {
            visited += sub.remap_ids(translate);
        }
        visited
    }

    /// Pass every manager-scoped integer of this chunk and its sub-chunks
    /// through `translate`, together with the GUID written ahead of it.
    /// Returns the number of slots visited.
    pub fn remap_manager_values<F>(&mut self, translate: &mut F) -> usize
    where
        F: FnMut(Guid, i32) -> i32,
    {
        let mut visited = 0;
        let refs: Vec<SlotRef> = slot_refs(&self.managers).collect();
        for r in refs {
            let (guid_at, slots) = match r {
                SlotRef::Single(o) => (o.checked_sub(2), o..o + 1),
                SlotRef::Sequence(o) => {
                    let count = self.words.get(o).copied().unwrap_or(0) as usize;
                    (o.checked_sub(2), o + 1..(o + 1 + count).min(self.words.len()))
                }
            };
            let Some(g) = guid_at else { continue };
            let (Some(&d1), Some(&d2)) = (self.words.get(g), self.words.get(g + 1)) else {
                continue;
            };
            let guid = Guid::new(d1, d2);
            for offset in slots {
                if let Some(slot) = self.words.get_mut(offset) {
                    *slot = translate(guid, *slot as i32) as u32;
                    visited += 1;
                }
            }
        }
        for sub in &mut self.sub_chunks {
            visited += sub.remap_manager_values(translate);
        }
        visited
    }

    // -----------------------------------------------------------------------
    // Binary form
    // -----------------------------------------------------------------------

    /// Options as serialized: the stored bits plus a bit for every non-empty
    /// side list.
    fn wire_options(&self) -> ChunkOptions {
        let mut options = self.options;
        if !self.ids.is_empty() {
            options.insert(ChunkOptions::IDS);
        }
        if !self.sub_chunks.is_empty() {
            options.insert(ChunkOptions::SUB_CHUNKS);
        }
        if !self.managers.is_empty() {
            options.insert(ChunkOptions::MANAGERS);
        }
        options
    }

    fn header_dword(&self) -> u32 {
        (self.data_version as u32)
            | ((self.class_id.0 & 0xFF) << 8)
            | ((self.chunk_version as u32) << 16)
            | ((self.wire_options().bits() as u32) << 24)
    }

    /// Size of the binary form in bytes.
    pub fn serialized_len(&self) -> usize {
        self.serialized_words() * 4
    }

    fn serialized_words(&self) -> usize {
        let options = self.wire_options();
        let mut n = 2 + self.words.len();
        if options.contains(ChunkOptions::IDS) {
            n += 1 + self.ids.len();
        }
        if options.contains(ChunkOptions::SUB_CHUNKS) {
            n += 1;
            n += self
                .sub_chunks
                .iter()
                .map(|c| 1 + c.serialized_words())
                .sum::<usize>();
        }
        if options.contains(ChunkOptions::MANAGERS) {
            n += 1 + self.managers.len();
        }
        n
    }

    /// Serialize to the binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        self.write_bytes(&mut out);
        out
    }

    /// Append the binary form to `out`.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        let options = self.wire_options();
        push_word(out, self.header_dword());
        push_word(out, self.words.len() as u32);
        for &w in &self.words {
            push_word(out, w);
        }
        if options.contains(ChunkOptions::IDS) {
            push_word(out, self.ids.len() as u32);
            for &e in &self.ids {
                push_word(out, e as u32);
            }
        }
        if options.contains(ChunkOptions::SUB_CHUNKS) {
            push_word(out, self.sub_chunks.len() as u32);
            for sub in &self.sub_chunks {
                push_word(out, sub.serialized_words() as u32);
                sub.write_bytes(out);
            }
        }
        if options.contains(ChunkOptions::MANAGERS) {
            push_word(out, self.managers.len() as u32);
            for &e in &self.managers {
                push_word(out, e as u32);
            }
        }
    }

    /// Decode a chunk from exactly `bytes`. Trailing bytes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Chunk, ChunkError> {
        let mut src = WordSource::new(bytes);
        let chunk = Self::decode(&mut src, 0)?;
        if src.remaining_bytes() != 0 {
            return Err(ChunkError::Corrupt(format!(
                "{} trailing bytes after chunk",
                src.remaining_bytes()
            )));
        }
        Ok(chunk)
    }

    fn decode(src: &mut WordSource<'_>, depth: usize) -> Result<Chunk, ChunkError> {
        if depth > MAX_CHUNK_DEPTH {
            return Err(ChunkError::TooDeep(MAX_CHUNK_DEPTH));
        }
        let header = src.word()?;
        let data_version = (header & 0xFF) as u8;
        let class_tag = (header >> 8) & 0xFF;
        let chunk_version = ((header >> 16) & 0xFF) as u8;
        let options = ChunkOptions::from_bits((header >> 24) as u8);

        let count = src.word()? as usize;
        let words = src.words(count)?;

        let ids = if options.contains(ChunkOptions::IDS) {
            let n = src.word()? as usize;
            src.words(n)?.into_iter().map(|w| w as i32).collect()
        } else {
            Vec::new()
        };

        let mut sub_chunks = Vec::new();
        if options.contains(ChunkOptions::SUB_CHUNKS) {
            let n = src.word()? as usize;
            if n > src.remaining_words() {
                return Err(ChunkError::Overrun {
                    offset: src.position_words(),
                    requested: n,
                    len: src.total_words(),
                });
            }
            sub_chunks.reserve(n);
            for index in 0..n {
                let sub = Self::decode_framed(src, depth + 1).map_err(|e| ChunkError::SubChunk {
                    index,
                    source: Box::new(e),
                })?;
                sub_chunks.push(sub);
            }
        }

        let managers = if options.contains(ChunkOptions::MANAGERS) {
            let n = src.word()? as usize;
            src.words(n)?.into_iter().map(|w| w as i32).collect()
        } else {
            Vec::new()
        };

        validate_slot_list(&ids, &words, "id list")?;
        validate_slot_list(&managers, &words, "manager list")?;

        Ok(Chunk {
            class_id: ClassId(class_tag),
            data_version,
            chunk_version,
            options,
            words,
            ids,
            sub_chunks,
            managers,
            compression: CompressionInfo::default(),
        })
    }

    /// Decode one size-prefixed sub-chunk, consuming exactly its frame.
    fn decode_framed(src: &mut WordSource<'_>, depth: usize) -> Result<Chunk, ChunkError> {
        let size = src.word()? as usize;
        let body = src.take_bytes(size)?;
        let mut inner = WordSource::new(body);
        let chunk = Self::decode(&mut inner, depth)?;
        if inner.remaining_bytes() != 0 {
            return Err(ChunkError::Corrupt(format!(
                "sub-chunk frame of {size} words has {} unused bytes",
                inner.remaining_bytes()
            )));
        }
        Ok(chunk)
    }
}

fn push_word(out: &mut Vec<u8>, w: u32) {
    out.extend_from_slice(&w.to_le_bytes());
}

// ---------------------------------------------------------------------------
// WordSource
// ---------------------------------------------------------------------------

/// Bounds-checked little-endian DWORD reader over a byte slice.
struct WordSource<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WordSource<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining_bytes(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn remaining_words(&self) -> usize {
        self.remaining_bytes() / 4
    }

    fn total_words(&self) -> usize {
        self.bytes.len() / 4
    }

    fn position_words(&self) -> usize {
        self.pos / 4
    }

    fn word(&mut self) -> Result<u32, ChunkError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ChunkError> {
        if n > self.remaining_bytes() {
            return Err(ChunkError::UnexpectedEof {
                needed: n,
                available: self.remaining_bytes(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Take `count` words as a byte slice, checking the bound before anything
    /// is allocated.
    fn take_bytes(&mut self, count: usize) -> Result<&'a [u8], ChunkError> {
        if count > self.remaining_words() {
            return Err(ChunkError::Overrun {
                offset: self.position_words(),
                requested: count,
                len: self.total_words(),
            });
        }
        self.take(count * 4)
    }

    fn words(&mut self, count: usize) -> Result<Vec<u32>, ChunkError> {
        let bytes = self.take_bytes(count)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
