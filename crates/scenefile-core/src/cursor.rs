//! Read and write cursors over a chunk payload, and the identifier protocol.
//!
//! Structured payloads are segmented into identifier sections. Each section
//! starts with two words, `[tag][offset of the next identifier]`, and the
//! last identifier links back to offset 0, closing the chain into a ring.
//! A reader seeks a section by tag by walking the ring from its current
//! position, so sections may be read in any order and an absent tag simply
//! means "this object has none of that feature". Identifier-structured
//! payloads must begin with an identifier.
//!
//! Every primitive occupies whole DWORDs: bytes and 16-bit words take one
//! DWORD each, and buffers are zero-padded to a DWORD boundary.

use crate::chunk::{Chunk, ChunkError, ChunkOptions, SEQUENCE_MARKER, SlotRef, slot_refs};
use crate::id::{Guid, ObjectId};
use crate::math::{Color, Mat4, Quat, Vec2, Vec3, Vec4};

/// Default ceiling on the declared length of any sequence.
pub const DEFAULT_SEQUENCE_LIMIT: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Section descriptors
// ---------------------------------------------------------------------------

/// One section of an identifier chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierSection {
    pub tag: u32,
    /// Offset of the identifier word itself.
    pub offset: usize,
    /// Number of body words following the two identifier words.
    pub len: usize,
}

/// A section the reader never sought, kept so it can be written back.
///
/// Object-ID and manager slots inside the body are recorded relative to the
/// body start so the section stays remappable after it is re-emitted.
/// Sub-chunks the body refers to travel with it and are re-indexed on write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreservedSection {
    pub tag: u32,
    pub words: Vec<u32>,
    pub id_refs: Vec<SlotRef>,
    pub manager_refs: Vec<SlotRef>,
    /// `(body offset of the index word, sub-chunk)`.
    pub sub_chunks: Vec<(usize, Chunk)>,
}

fn relative_refs(list: &[i32], start: usize, end: usize) -> Vec<SlotRef> {
    slot_refs(list)
        .filter_map(|r| match r {
            SlotRef::Single(o) if (start..end).contains(&o) => Some(SlotRef::Single(o - start)),
            SlotRef::Sequence(o) if (start..end).contains(&o) => {
                Some(SlotRef::Sequence(o - start))
            }
            _ => None,
        })
        .collect()
}

fn push_refs(list: &mut Vec<i32>, refs: &[SlotRef], base: usize) {
    for r in refs {
        match *r {
            SlotRef::Single(o) => list.push((base + o) as i32),
            SlotRef::Sequence(o) => {
                list.push(SEQUENCE_MARKER);
                list.push((base + o) as i32);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Appends primitives and identifier sections to a chunk.
#[derive(Debug)]
pub struct ChunkWriter<'c> {
    chunk: &'c mut Chunk,
    prev_identifier: Option<usize>,
}

impl Chunk {
    /// Begin writing from scratch. The payload and all side lists are cleared;
    /// class, versions and caller-set options are kept.
    pub fn start_write(&mut self) -> ChunkWriter<'_> {
        self.words.clear();
        self.ids.clear();
        self.sub_chunks.clear();
        self.managers.clear();
        self.options.remove(ChunkOptions::IDS);
        self.options.remove(ChunkOptions::SUB_CHUNKS);
        self.options.remove(ChunkOptions::MANAGERS);
        ChunkWriter {
            chunk: self,
            prev_identifier: None,
        }
    }

    /// A fresh read cursor at offset 0.
    pub fn reader(&self) -> ChunkReader<'_> {
        ChunkReader {
            chunk: self,
            pos: 0,
            section_end: self.words.len(),
            prev_identifier: None,
            visited: Vec::new(),
            claimed_subs: Vec::new(),
            sequence_limit: DEFAULT_SEQUENCE_LIMIT,
        }
    }
}

impl ChunkWriter<'_> {
    /// Current write offset in words.
    pub fn position(&self) -> usize {
        self.chunk.words.len()
    }

    pub fn chunk(&self) -> &Chunk {
        self.chunk
    }

    /// Start a new identifier section and link the previous one to it.
    pub fn write_identifier(&mut self, tag: u32) {
        let pos = self.chunk.words.len();
        if let Some(prev) = self.prev_identifier
            && let Some(link) = self.chunk.words.get_mut(prev + 1)
        {
            *link = pos as u32;
        }
        self.chunk.words.push(tag);
        self.chunk.words.push(0);
        self.prev_identifier = Some(pos);
    }

    pub fn write_dword(&mut self, v: u32) {
        self.chunk.words.push(v);
    }

    pub fn write_int(&mut self, v: i32) {
        self.chunk.words.push(v as u32);
    }

    pub fn write_byte(&mut self, v: u8) {
        self.chunk.words.push(v as u32);
    }

    pub fn write_word(&mut self, v: u16) {
        self.chunk.words.push(v as u32);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.chunk.words.push(v as u32);
    }

    pub fn write_float(&mut self, v: f32) {
        self.chunk.words.push(v.to_bits());
    }

    pub fn write_guid(&mut self, g: Guid) {
        self.chunk.words.push(g.d1);
        self.chunk.words.push(g.d2);
    }

    pub fn write_raw_words(&mut self, words: &[u32]) {
        self.chunk.words.extend_from_slice(words);
    }

    /// Write an object ID and record its slot in the ID list.
    pub fn write_object_id(&mut self, id: ObjectId) {
        let pos = self.chunk.words.len();
        self.chunk.ids.push(pos as i32);
        self.chunk.options.insert(ChunkOptions::IDS);
        self.chunk.words.push(id.0);
    }

    /// Write a byte count followed by the bytes, zero-padded to a DWORD.
    pub fn write_buffer(&mut self, bytes: &[u8]) {
        self.chunk.words.push(bytes.len() as u32);
        for part in bytes.chunks(4) {
            let mut w = [0u8; 4];
            w[..part.len()].copy_from_slice(part);
            self.chunk.words.push(u32::from_le_bytes(w));
        }
    }

    /// Write a NUL-terminated string; `None` is stored as a zero length.
    pub fn write_string(&mut self, s: Option<&str>) {
        match s {
            None => self.chunk.words.push(0),
            Some(s) => {
                let mut bytes = Vec::with_capacity(s.len() + 1);
                bytes.extend_from_slice(s.as_bytes());
                bytes.push(0);
                self.write_buffer(&bytes);
            }
        }
    }

    pub fn write_vec2(&mut self, v: Vec2) {
        self.write_floats(&v.to_array());
    }

    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_floats(&v.to_array());
    }

    pub fn write_vec4(&mut self, v: Vec4) {
        self.write_floats(&v.to_array());
    }

    pub fn write_quat(&mut self, q: Quat) {
        self.write_floats(&q.to_array());
    }

    /// Sixteen floats, one basis row after another.
    pub fn write_matrix(&mut self, m: Mat4) {
        self.write_floats(&m.to_cols_array());
    }

    pub fn write_color(&mut self, c: Color) {
        self.write_floats(&c.to_array());
    }

    fn write_floats(&mut self, values: &[f32]) {
        self.chunk.words.extend(values.iter().map(|f| f.to_bits()));
    }

    /// Write a count followed by object IDs, recorded as one ID-list sequence.
    pub fn write_object_sequence(&mut self, ids: &[ObjectId]) {
        let pos = self.chunk.words.len();
        self.chunk.ids.push(SEQUENCE_MARKER);
        self.chunk.ids.push(pos as i32);
        self.chunk.options.insert(ChunkOptions::IDS);
        self.chunk.words.push(ids.len() as u32);
        self.chunk.words.extend(ids.iter().map(|id| id.0));
    }

    /// Write a count followed by plain integers.
    pub fn write_int_sequence(&mut self, values: &[i32]) {
        self.chunk.words.push(values.len() as u32);
        self.chunk.words.extend(values.iter().map(|&v| v as u32));
    }

    /// Write one manager-scoped integer preceded by its owning manager GUID.
    pub fn write_manager_int(&mut self, manager: Guid, value: i32) {
        self.write_guid(manager);
        let pos = self.chunk.words.len();
        self.chunk.managers.push(pos as i32);
        self.chunk.options.insert(ChunkOptions::MANAGERS);
        self.chunk.words.push(value as u32);
    }

    /// Write `[guid][count][values...]`, recorded as one manager sequence.
    pub fn write_manager_sequence(&mut self, manager: Guid, values: &[i32]) {
        self.write_guid(manager);
        let pos = self.chunk.words.len();
        self.chunk.managers.push(SEQUENCE_MARKER);
        self.chunk.managers.push(pos as i32);
        self.chunk.options.insert(ChunkOptions::MANAGERS);
        self.chunk.words.push(values.len() as u32);
        self.chunk.words.extend(values.iter().map(|&v| v as u32));
    }

    /// Hand a sub-chunk to this chunk and write its index into the payload.
    pub fn write_sub_chunk(&mut self, sub: Chunk) {
        let index = self.chunk.sub_chunks.len();
        self.chunk.sub_chunks.push(sub);
        self.chunk.options.insert(ChunkOptions::SUB_CHUNKS);
        self.chunk.words.push(index as u32);
    }

    /// Write a count followed by the indices of the given sub-chunks.
    pub fn write_sub_chunk_sequence(&mut self, subs: Vec<Chunk>) {
        self.chunk.words.push(subs.len() as u32);
        for sub in subs {
            self.write_sub_chunk(sub);
        }
    }

    /// Re-emit a section preserved by a previous read.
    pub fn write_preserved(&mut self, section: &PreservedSection) {
        self.write_identifier(section.tag);
        let base = self.chunk.words.len();
        self.chunk.words.extend_from_slice(&section.words);
        if !section.id_refs.is_empty() {
            push_refs(&mut self.chunk.ids, &section.id_refs, base);
            self.chunk.options.insert(ChunkOptions::IDS);
        }
        if !section.manager_refs.is_empty() {
            push_refs(&mut self.chunk.managers, &section.manager_refs, base);
            self.chunk.options.insert(ChunkOptions::MANAGERS);
        }
        for (offset, sub) in &section.sub_chunks {
            let index = self.chunk.sub_chunks.len();
            if let Some(word) = self.chunk.words.get_mut(base + offset) {
                *word = index as u32;
                self.chunk.sub_chunks.push(sub.clone());
                self.chunk.options.insert(ChunkOptions::SUB_CHUNKS);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Sequential and identifier-seeking reader over a chunk payload.
#[derive(Debug, Clone)]
pub struct ChunkReader<'c> {
    chunk: &'c Chunk,
    pos: usize,
    /// End of the section the cursor was last positioned in.
    section_end: usize,
    prev_identifier: Option<usize>,
    visited: Vec<usize>,
    /// `(identifier offset, sub-chunk index)` for every sub-chunk read.
    claimed_subs: Vec<(Option<usize>, usize)>,
    sequence_limit: usize,
}

impl<'c> ChunkReader<'c> {
    /// Reject sequences declaring more than `limit` entries.
    pub fn with_sequence_limit(mut self, limit: usize) -> Self {
        self.sequence_limit = limit;
        self
    }

    pub fn chunk(&self) -> &'c Chunk {
        self.chunk
    }

    /// Current read offset in words.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Words left between the cursor and the end of the payload.
    pub fn remaining(&self) -> usize {
        self.chunk.words.len().saturating_sub(self.pos)
    }

    // -- Identifier protocol --

    fn next_identifier(&self, at: usize) -> Option<usize> {
        let words = &self.chunk.words;
        let next = *words.get(at + 1)? as usize;
        if next == 0 {
            Some(0)
        } else if next >= at + 2 && next + 1 < words.len() {
            Some(next)
        } else {
            None
        }
    }

    fn find_identifier(&self, tag: u32) -> Option<usize> {
        let words = &self.chunk.words;
        if words.len() < 2 {
            return None;
        }
        let start = match self.prev_identifier {
            Some(p) => self.next_identifier(p).unwrap_or(0),
            None => 0,
        };
        let mut cur = start;
        for _ in 0..=words.len() / 2 {
            if words.get(cur) == Some(&tag) && cur + 1 < words.len() {
                return Some(cur);
            }
            let next = self.next_identifier(cur)?;
            if next == start {
                return None;
            }
            cur = next;
        }
        None
    }

    /// Position the cursor after the identifier `tag`. Returns `false` when
    /// the tag is absent; the cursor is then left where it was.
    pub fn seek_identifier(&mut self, tag: u32) -> bool {
        self.seek_identifier_with_size(tag).is_some()
    }

    /// Like [`seek_identifier`](Self::seek_identifier), returning the number
    /// of body words in the section.
    pub fn seek_identifier_with_size(&mut self, tag: u32) -> Option<usize> {
        let Some(at) = self.find_identifier(tag) else {
            log::trace!("identifier 0x{tag:08x} not present");
            return None;
        };
        self.pos = at + 2;
        self.prev_identifier = Some(at);
        if !self.visited.contains(&at) {
            self.visited.push(at);
        }
        let end = match self.next_identifier(at) {
            Some(next) if next > at => next,
            _ => self.chunk.words.len(),
        };
        self.section_end = end;
        Some(end.saturating_sub(at + 2))
    }

    /// Return the section last sought to the unvisited set, so it is kept
    /// verbatim by [`unvisited_sections`](Self::unvisited_sections).
    pub fn release_section(&mut self) {
        if let Some(at) = self.prev_identifier {
            self.visited.retain(|&v| v != at);
            self.claimed_subs.retain(|&(section, _)| section != Some(at));
        }
    }

    /// Walk the identifier chain from offset 0. Returns `None` when the
    /// payload does not form a well-formed chain.
    pub fn identifier_sections(&self) -> Option<Vec<IdentifierSection>> {
        let words = &self.chunk.words;
        let mut out = Vec::new();
        if words.is_empty() {
            return Some(out);
        }
        let mut cur = 0usize;
        loop {
            let tag = *words.get(cur)?;
            let link = *words.get(cur + 1)? as usize;
            if link == 0 {
                out.push(IdentifierSection {
                    tag,
                    offset: cur,
                    len: words.len() - cur - 2,
                });
                return Some(out);
            }
            if link < cur + 2 || link + 1 >= words.len() {
                return None;
            }
            out.push(IdentifierSection {
                tag,
                offset: cur,
                len: link - cur - 2,
            });
            cur = link;
        }
    }

    /// Sections never reached by a successful seek.
    ///
    /// Sub-chunks no visited section read are handed to the preserved
    /// sections: a body word naming such a sub-chunk, in ascending index
    /// order, is taken as its index word.
    pub fn unvisited_sections(&self) -> Vec<PreservedSection> {
        let words = &self.chunk.words;
        let Some(sections) = self.identifier_sections() else {
            log::warn!(
                "chunk payload of {} words has no well-formed identifier chain; nothing preserved",
                words.len()
            );
            return Vec::new();
        };
        let mut unclaimed: Vec<bool> = vec![true; self.chunk.sub_chunks.len()];
        for &(_, index) in &self.claimed_subs {
            if let Some(flag) = unclaimed.get_mut(index) {
                *flag = false;
            }
        }
        let mut out = Vec::new();
        for s in sections {
            if self.visited.contains(&s.offset) {
                continue;
            }
            let start = s.offset + 2;
            let Some(body) = words.get(start..start + s.len) else {
                continue;
            };
            let mut sub_chunks = Vec::new();
            let mut floor = 0usize;
            for (offset, &word) in body.iter().enumerate() {
                let index = word as usize;
                if index >= floor && unclaimed.get(index) == Some(&true) {
                    unclaimed[index] = false;
                    floor = index + 1;
                    sub_chunks.push((offset, self.chunk.sub_chunks[index].clone()));
                }
            }
            out.push(PreservedSection {
                tag: s.tag,
                words: body.to_vec(),
                id_refs: relative_refs(&self.chunk.ids, start, start + s.len),
                manager_refs: relative_refs(&self.chunk.managers, start, start + s.len),
                sub_chunks,
            });
        }
        out
    }

    // -- Primitives --

    /// Borrow the next `n` words.
    pub fn read_words(&mut self, n: usize) -> Result<&'c [u32], ChunkError> {
        let words = &self.chunk.words;
        if n > words.len().saturating_sub(self.pos) {
            return Err(ChunkError::Overrun {
                offset: self.pos,
                requested: n,
                len: words.len(),
            });
        }
        let out = &words[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ChunkError> {
        self.read_words(n).map(|_| ())
    }

    pub fn read_dword(&mut self) -> Result<u32, ChunkError> {
        Ok(self.read_words(1)?[0])
    }

    pub fn read_int(&mut self) -> Result<i32, ChunkError> {
        Ok(self.read_dword()? as i32)
    }

    pub fn read_byte(&mut self) -> Result<u8, ChunkError> {
        Ok(self.read_dword()? as u8)
    }

    pub fn read_word(&mut self) -> Result<u16, ChunkError> {
        Ok(self.read_dword()? as u16)
    }

    pub fn read_bool(&mut self) -> Result<bool, ChunkError> {
        Ok(self.read_dword()? != 0)
    }

    pub fn read_float(&mut self) -> Result<f32, ChunkError> {
        Ok(f32::from_bits(self.read_dword()?))
    }

    pub fn read_guid(&mut self) -> Result<Guid, ChunkError> {
        let w = self.read_words(2)?;
        Ok(Guid::new(w[0], w[1]))
    }

    pub fn read_object_id(&mut self) -> Result<ObjectId, ChunkError> {
        Ok(ObjectId(self.read_dword()?))
    }

    pub fn read_buffer(&mut self) -> Result<Vec<u8>, ChunkError> {
        let len = self.read_dword()? as usize;
        let words = self.read_words(len.div_ceil(4))?;
        let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        bytes.truncate(len);
        Ok(bytes)
    }

    /// Read a string written by [`ChunkWriter::write_string`]. Bytes that are
    /// not UTF-8 are replaced.
    pub fn read_string(&mut self) -> Result<Option<String>, ChunkError> {
        let mut bytes = self.read_buffer()?;
        if bytes.is_empty() {
            return Ok(None);
        }
        if let Some(nul) = bytes.iter().position(|&b| b == 0) {
            bytes.truncate(nul);
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn read_floats<const N: usize>(&mut self) -> Result<[f32; N], ChunkError> {
        let words = self.read_words(N)?;
        let mut out = [0.0f32; N];
        for (o, w) in out.iter_mut().zip(words) {
            *o = f32::from_bits(*w);
        }
        Ok(out)
    }

    pub fn read_vec2(&mut self) -> Result<Vec2, ChunkError> {
        Ok(Vec2::from_array(self.read_floats::<2>()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, ChunkError> {
        Ok(Vec3::from_array(self.read_floats::<3>()?))
    }

    pub fn read_vec4(&mut self) -> Result<Vec4, ChunkError> {
        Ok(Vec4::from_array(self.read_floats::<4>()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, ChunkError> {
        Ok(Quat::from_array(self.read_floats::<4>()?))
    }

    pub fn read_matrix(&mut self) -> Result<Mat4, ChunkError> {
        Ok(Mat4::from_cols_array(&self.read_floats::<16>()?))
    }

    pub fn read_color(&mut self) -> Result<Color, ChunkError> {
        Ok(Color::from_array(self.read_floats::<4>()?))
    }

    // -- Sequences --

    /// Read a sequence count, enforcing the sanity ceiling and the bound of
    /// the current section before anything is allocated.
    fn read_count(&mut self, entry_words: usize) -> Result<usize, ChunkError> {
        let count = self.read_dword()? as usize;
        if count > self.sequence_limit {
            return Err(ChunkError::SequenceTooLong {
                len: count,
                limit: self.sequence_limit,
            });
        }
        let available = self.section_end.saturating_sub(self.pos);
        if count.saturating_mul(entry_words) > available {
            return Err(ChunkError::BadCount { count, available });
        }
        Ok(count)
    }

    /// Read the count word of a sequence whose entries are at least one
    /// word each.
    pub fn read_sequence_len(&mut self) -> Result<usize, ChunkError> {
        self.read_count(1)
    }

    pub fn read_object_sequence(&mut self) -> Result<Vec<ObjectId>, ChunkError> {
        let count = self.read_count(1)?;
        Ok(self.read_words(count)?.iter().map(|&w| ObjectId(w)).collect())
    }

    pub fn read_int_sequence(&mut self) -> Result<Vec<i32>, ChunkError> {
        let count = self.read_count(1)?;
        Ok(self.read_words(count)?.iter().map(|&w| w as i32).collect())
    }

    /// Read `[guid][value]`. The caller must check the GUID before trusting
    /// the value's meaning.
    pub fn read_manager_int(&mut self) -> Result<(Guid, i32), ChunkError> {
        let guid = self.read_guid()?;
        Ok((guid, self.read_int()?))
    }

    /// Read `[guid][count][values...]`. The caller must check the GUID before
    /// trusting the values' meaning.
    pub fn read_manager_sequence(&mut self) -> Result<(Guid, Vec<i32>), ChunkError> {
        let guid = self.read_guid()?;
        Ok((guid, self.read_int_sequence()?))
    }

    pub fn read_sub_chunk(&mut self) -> Result<&'c Chunk, ChunkError> {
        let index = self.read_dword()?;
        let count = self.chunk.sub_chunks.len();
        let sub = self
            .chunk
            .sub_chunks
            .get(index as usize)
            .ok_or(ChunkError::NoSuchSubChunk { index, count })?;
        self.claimed_subs.push((self.prev_identifier, index as usize));
        Ok(sub)
    }

    pub fn read_sub_chunk_sequence(&mut self) -> Result<Vec<&'c Chunk>, ChunkError> {
        let count = self.read_count(1)?;
        (0..count).map(|_| self.read_sub_chunk()).collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::id::ClassId;

    const A: u32 = 0x0000_0A00;
    const B: u32 = 0x0000_0B00;
    const C: u32 = 0x0000_0C00;

    fn chunk_abc() -> Chunk {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_identifier(A);
        w.write_int(1);
        w.write_identifier(B);
        w.write_int(2);
        w.write_int(22);
        w.write_identifier(C);
        w.write_int(3);
        chunk
    }

    #[test]
    fn seek_in_any_order() {
        let chunk = chunk_abc();
        let mut r = chunk.reader();
        assert!(r.seek_identifier(C));
        assert_eq!(r.read_int().unwrap(), 3);
        assert!(r.seek_identifier(A));
        assert_eq!(r.read_int().unwrap(), 1);
        assert!(r.seek_identifier(B));
        assert_eq!(r.read_int().unwrap(), 2);
        assert_eq!(r.read_int().unwrap(), 22);
    }

    #[test]
    fn seek_same_tag_twice() {
        let chunk = chunk_abc();
        let mut r = chunk.reader();
        assert!(r.seek_identifier(B));
        assert!(r.seek_identifier(B));
        assert_eq!(r.read_int().unwrap(), 2);
    }

    #[test]
    fn missing_tag_is_not_an_error() {
        let chunk = chunk_abc();
        let mut r = chunk.reader();
        assert!(r.seek_identifier(B));
        let pos = r.position();
        assert!(!r.seek_identifier(0xDEAD));
        assert_eq!(r.position(), pos);
    }

    #[test]
    fn seek_on_empty_chunk() {
        let chunk = Chunk::new(ClassId(1), 0);
        assert!(!chunk.reader().seek_identifier(A));
    }

    #[test]
    fn section_sizes() {
        let chunk = chunk_abc();
        let mut r = chunk.reader();
        assert_eq!(r.seek_identifier_with_size(A), Some(1));
        assert_eq!(r.seek_identifier_with_size(B), Some(2));
        assert_eq!(r.seek_identifier_with_size(C), Some(1));
        let sections = r.identifier_sections().unwrap();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[1].tag, B);
    }

    #[test]
    fn corrupt_links_do_not_loop() {
        let mut chunk = chunk_abc();
        // Layout: [A,3,1, B,7,2,22, C,0,3]. Point B's link backwards.
        chunk.words[4] = 1;
        let mut r = chunk.reader();
        assert!(!r.seek_identifier(0xDEAD));
        assert!(r.identifier_sections().is_none());
    }

    #[test]
    fn reading_past_end_is_overrun() {
        let chunk = chunk_abc();
        let mut r = chunk.reader();
        assert!(r.seek_identifier(C));
        r.read_int().unwrap();
        let err = r.read_int().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overrun);
    }

    #[test]
    fn buffers_pad_to_dwords() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_buffer(&[1, 2, 3, 4, 5]);
        w.write_dword(0xFFFF_FFFF);
        assert_eq!(chunk.word_count(), 1 + 2 + 1);
        let mut r = chunk.reader();
        assert_eq!(r.read_buffer().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(r.read_dword().unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn strings_round_trip() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_string(Some("Camera01"));
        w.write_string(None);
        w.write_string(Some(""));
        let mut r = chunk.reader();
        assert_eq!(r.read_string().unwrap().as_deref(), Some("Camera01"));
        assert_eq!(r.read_string().unwrap(), None);
        assert_eq!(r.read_string().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn bytes_and_words_take_a_dword_each() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_byte(7);
        w.write_word(0xBEEF);
        w.write_float(1.5);
        assert_eq!(chunk.word_count(), 3);
        let mut r = chunk.reader();
        assert_eq!(r.read_byte().unwrap(), 7);
        assert_eq!(r.read_word().unwrap(), 0xBEEF);
        assert_eq!(r.read_float().unwrap(), 1.5);
    }

    #[test]
    fn math_aggregates_round_trip() {
        let m = Mat4::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
        ]);
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_vec2(Vec2::new(1.0, 2.0));
        w.write_vec3(Vec3::new(1.0, 2.0, 3.0));
        w.write_vec4(Vec4::new(1.0, 2.0, 3.0, 4.0));
        w.write_quat(Quat::from_xyzw(0.0, 0.0, 0.0, 1.0));
        w.write_matrix(m);
        w.write_color(Color::new(0.5, 0.25, 1.0, 1.0));
        assert_eq!(chunk.word_count(), 2 + 3 + 4 + 4 + 16 + 4);
        let mut r = chunk.reader();
        assert_eq!(r.read_vec2().unwrap(), Vec2::new(1.0, 2.0));
        assert_eq!(r.read_vec3().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(r.read_vec4().unwrap(), Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(r.read_quat().unwrap(), Quat::from_xyzw(0.0, 0.0, 0.0, 1.0));
        assert_eq!(r.read_matrix().unwrap(), m);
        assert_eq!(r.read_color().unwrap(), Color::new(0.5, 0.25, 1.0, 1.0));
    }

    #[test]
    fn object_sequences_are_recorded_in_id_list() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_object_id(ObjectId(4));
        w.write_object_sequence(&[ObjectId(5), ObjectId(6)]);
        assert!(chunk.options().contains(ChunkOptions::IDS));
        assert_eq!(
            chunk.object_ids(),
            vec![ObjectId(4), ObjectId(5), ObjectId(6)]
        );
        let mut r = chunk.reader();
        assert_eq!(r.read_object_id().unwrap(), ObjectId(4));
        assert_eq!(
            r.read_object_sequence().unwrap(),
            vec![ObjectId(5), ObjectId(6)]
        );
    }

    #[test]
    fn oversized_sequence_rejected() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_dword(1_000);
        let err = chunk
            .reader()
            .with_sequence_limit(16)
            .read_object_sequence()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = chunk.reader().read_object_sequence().unwrap_err();
        assert!(matches!(err, ChunkError::BadCount { count: 1_000, .. }));
    }

    #[test]
    fn sequence_count_bounded_by_section() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_identifier(A);
        w.write_dword(3);
        w.write_dword(7);
        w.write_identifier(B);
        w.write_dword(8);
        w.write_dword(9);
        let mut r = chunk.reader();
        assert!(r.seek_identifier(A));
        let err = r.read_object_sequence().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn manager_sequence_carries_guid() {
        let guid = Guid::new(1, 2);
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_manager_int(guid, -3);
        w.write_manager_sequence(guid, &[4, 5]);
        assert_eq!(chunk.manager_values(), vec![-3, 4, 5]);
        let mut r = chunk.reader();
        assert_eq!(r.read_manager_int().unwrap(), (guid, -3));
        assert_eq!(r.read_manager_sequence().unwrap(), (guid, vec![4, 5]));
    }

    #[test]
    fn sub_chunks_by_index() {
        let mut inner = Chunk::new(ClassId(2), 0);
        inner.start_write().write_dword(42);
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_identifier(A);
        w.write_sub_chunk(inner.clone());
        w.write_sub_chunk_sequence(vec![inner.clone(), inner]);
        let mut r = chunk.reader();
        assert!(r.seek_identifier(A));
        assert_eq!(r.read_sub_chunk().unwrap().words(), &[42]);
        assert_eq!(r.read_sub_chunk_sequence().unwrap().len(), 2);
    }

    #[test]
    fn bad_sub_chunk_index() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        chunk.start_write().write_dword(3);
        let err = chunk.reader().read_sub_chunk().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOffset);
    }

    #[test]
    fn unvisited_sections_are_preserved_and_rewritable() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_identifier(A);
        w.write_int(1);
        w.write_identifier(B);
        w.write_object_sequence(&[ObjectId(8), ObjectId(9)]);
        let mut r = chunk.reader();
        assert!(r.seek_identifier(A));
        let preserved = r.unvisited_sections();
        assert_eq!(preserved.len(), 1);
        assert_eq!(preserved[0].tag, B);
        assert_eq!(preserved[0].id_refs, vec![SlotRef::Sequence(0)]);

        let mut out = Chunk::new(ClassId(1), 0);
        let mut w = out.start_write();
        w.write_identifier(C);
        w.write_preserved(&preserved[0]);
        assert_eq!(out.object_ids(), vec![ObjectId(8), ObjectId(9)]);
        let mut r = out.reader();
        assert!(r.seek_identifier(B));
        assert_eq!(
            r.read_object_sequence().unwrap(),
            vec![ObjectId(8), ObjectId(9)]
        );
    }

    #[test]
    fn released_section_is_preserved() {
        let chunk = chunk_abc();
        let mut r = chunk.reader();
        assert!(r.seek_identifier(A));
        assert!(r.seek_identifier(B));
        r.release_section();
        let tags: Vec<u32> = r.unvisited_sections().iter().map(|s| s.tag).collect();
        assert_eq!(tags, vec![B, C]);
    }

    #[test]
    fn preserved_sections_carry_their_sub_chunks() {
        let mut inner = Chunk::new(ClassId(2), 0);
        inner.start_write().write_dword(42);
        let mut other = Chunk::new(ClassId(3), 0);
        other.start_write().write_dword(7);
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_identifier(A);
        w.write_sub_chunk(other.clone());
        w.write_identifier(B);
        w.write_int(0);
        w.write_sub_chunk(inner.clone());

        let mut r = chunk.reader();
        assert!(r.seek_identifier(A));
        assert_eq!(r.read_sub_chunk().unwrap(), &other);
        let preserved = r.unvisited_sections();
        assert_eq!(preserved.len(), 1);
        assert_eq!(preserved[0].sub_chunks, vec![(1, inner.clone())]);

        // Re-emitted after a section with two sub-chunks, the index moves.
        let mut out = Chunk::new(ClassId(1), 0);
        let mut w = out.start_write();
        w.write_identifier(C);
        w.write_sub_chunk(other.clone());
        w.write_sub_chunk(other);
        w.write_preserved(&preserved[0]);
        assert_eq!(out.sub_chunks().len(), 3);
        let mut r = out.reader();
        assert!(r.seek_identifier(B));
        assert_eq!(r.read_int().unwrap(), 0);
        assert_eq!(r.read_sub_chunk().unwrap(), &inner);
    }

    #[test]
    fn sub_chunks_read_by_a_released_section_are_preserved() {
        let mut inner = Chunk::new(ClassId(2), 0);
        inner.start_write().write_dword(42);
        let mut chunk = Chunk::new(ClassId(1), 0);
        let mut w = chunk.start_write();
        w.write_identifier(A);
        w.write_sub_chunk(inner.clone());
        let mut r = chunk.reader();
        assert!(r.seek_identifier(A));
        r.read_sub_chunk().unwrap();
        r.release_section();
        let preserved = r.unvisited_sections();
        assert_eq!(preserved[0].sub_chunks, vec![(0, inner)]);
    }

    fn raw(words: &[u32]) -> Chunk {
        let mut chunk = Chunk::new(ClassId(1), 0);
        chunk.start_write().write_raw_words(words);
        chunk
    }

    #[test]
    fn link_into_its_own_identifier_is_malformed() {
        let chunk = raw(&[A, 1, 5, 0]);
        let mut r = chunk.reader();
        assert_eq!(r.seek_identifier_with_size(A), Some(2));
        assert!(!r.seek_identifier(B));
        assert!(r.identifier_sections().is_none());
        assert!(r.unvisited_sections().is_empty());
    }

    #[test]
    fn backward_and_overlong_links_are_malformed() {
        // A -> B, then B links back into A's body.
        let backward = raw(&[A, 3, 0, B, 2, 0]);
        assert!(backward.reader().identifier_sections().is_none());
        assert!(!backward.reader().seek_identifier(C));

        let overlong = raw(&[A, 40, 0, 0]);
        assert!(overlong.reader().identifier_sections().is_none());
        assert_eq!(overlong.reader().seek_identifier_with_size(A), Some(2));
    }

    #[test]
    fn start_write_resets_lists() {
        let mut chunk = Chunk::new(ClassId(1), 0);
        chunk.start_write().write_object_id(ObjectId(1));
        assert!(chunk.options().contains(ChunkOptions::IDS));
        chunk.start_write().write_dword(1);
        assert!(!chunk.options().contains(ChunkOptions::IDS));
        assert!(chunk.id_list().is_empty());
    }
}
