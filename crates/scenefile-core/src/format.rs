//! The file container: a fixed header followed by two sections.
//!
//! ```text
//! [header: 64 bytes][header-1 section][data section]
//! ```
//!
//! Header part 0 (32 bytes): signature, CRC, file version, product version,
//! product build, write mode, header-1 packed size. Part 1 (32 bytes): data
//! packed size, data unpacked size, manager count, object count, highest
//! saved file ID, header-1 unpacked size, 8 reserved bytes.
//!
//! The CRC covers the header with its CRC field zeroed, then both sections
//! as stored. With [`WRITE_WHOLE_COMPRESSED`] both sections are zlib
//! streams; otherwise packed and unpacked sizes are equal.
//!
//! Header-1 holds the object directory and the plugin dependency list. The
//! data section holds one framed chunk per manager, then one per object;
//! a frame size of 0 means "no data".

use crate::chunk::{Chunk, ChunkError, CompressionInfo};
use crate::compression::{self, CompressionError};
use crate::error::ErrorKind;
use crate::id::{ClassId, Guid, ObjectId};
use crate::object::ObjectFlags;

pub const SIGNATURE: [u8; 8] = *b"Nemo Fi\0";
pub const HEADER_LEN: usize = 64;

/// Oldest file version this crate reads.
pub const MIN_FILE_VERSION: u32 = 5;
/// Version written by this crate and the newest one it reads.
pub const CURRENT_FILE_VERSION: u32 = 8;

pub const PRODUCT_VERSION: u32 = 0x0001_0000;
pub const PRODUCT_BUILD: u32 = 1;

/// Write-mode bit: both sections are compressed.
pub const WRITE_WHOLE_COMPRESSED: u32 = 0x0000_0008;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("not a scene file: bad signature")]
    InvalidSignature,
    #[error("file version {version} is outside {min}..={max}")]
    UnsupportedVersion { version: u32, min: u32, max: u32 },
    #[error("checksum mismatch: header says {expected:08x}, content hashes to {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("{section} truncated: needed {needed} bytes, {available} available")]
    Truncated {
        section: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{section} section")]
    Compression {
        section: &'static str,
        #[source]
        source: CompressionError,
    },
    #[error("corrupt file: {0}")]
    Corrupt(String),
}

impl FormatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormatError::InvalidSignature => ErrorKind::InvalidSignature,
            FormatError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            FormatError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            FormatError::Truncated { .. } => ErrorKind::UnexpectedEof,
            FormatError::Compression { source, .. } => source.kind(),
            FormatError::Corrupt(_) => ErrorKind::Corrupt,
        }
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub crc: u32,
    pub file_version: u32,
    pub product_version: u32,
    pub product_build: u32,
    pub write_mode: u32,
    pub header1_pack_size: u32,
    pub header1_unpack_size: u32,
    pub data_pack_size: u32,
    pub data_unpack_size: u32,
    pub manager_count: u32,
    pub object_count: u32,
    pub max_id_saved: u32,
}

impl FileHeader {
    pub fn is_compressed(&self) -> bool {
        self.write_mode & WRITE_WHOLE_COMPRESSED != 0
    }

    /// Parse and check the signature and version. Sizes are checked later
    /// against the actual file length.
    pub fn parse(bytes: &[u8]) -> Result<FileHeader, FormatError> {
        let mut r = ByteReader::new(bytes, "header");
        let signature = r.take(SIGNATURE.len())?;
        if signature != SIGNATURE {
            return Err(FormatError::InvalidSignature);
        }
        let mut h = FileHeader {
            crc: r.u32()?,
            file_version: r.u32()?,
            ..Default::default()
        };
        if !(MIN_FILE_VERSION..=CURRENT_FILE_VERSION).contains(&h.file_version) {
            return Err(FormatError::UnsupportedVersion {
                version: h.file_version,
                min: MIN_FILE_VERSION,
                max: CURRENT_FILE_VERSION,
            });
        }
        h.product_version = r.u32()?;
        h.product_build = r.u32()?;
        h.write_mode = r.u32()?;
        h.header1_pack_size = r.u32()?;
        h.data_pack_size = r.u32()?;
        h.data_unpack_size = r.u32()?;
        h.manager_count = r.u32()?;
        h.object_count = r.u32()?;
        h.max_id_saved = r.u32()?;
        h.header1_unpack_size = r.u32()?;
        r.take(8)?;
        Ok(h)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&SIGNATURE);
        for v in [
            self.crc,
            self.file_version,
            self.product_version,
            self.product_build,
            self.write_mode,
            self.header1_pack_size,
            self.data_pack_size,
            self.data_unpack_size,
            self.manager_count,
            self.object_count,
            self.max_id_saved,
            self.header1_unpack_size,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..out.len()].copy_from_slice(&out);
        bytes
    }

    /// CRC-32 of this header with a zeroed CRC field followed by the stored
    /// sections.
    pub fn checksum(&self, header1: &[u8], data: &[u8]) -> u32 {
        let zeroed = FileHeader { crc: 0, ..*self };
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&zeroed.to_bytes());
        hasher.update(header1);
        hasher.update(data);
        hasher.finalize()
    }
}

/// The two sections as stored, borrowed from the file bytes.
#[derive(Debug, Clone, Copy)]
pub struct RawSections<'a> {
    pub header1: &'a [u8],
    pub data: &'a [u8],
}

/// Locate both sections after the header and verify the checksum.
pub fn split_sections<'a>(
    bytes: &'a [u8],
    header: &FileHeader,
) -> Result<RawSections<'a>, FormatError> {
    let mut r = ByteReader::new(bytes, "file");
    r.take(HEADER_LEN)?;
    let header1 = ByteReader::sized(&mut r, header.header1_pack_size, "header-1 section")?;
    let data = ByteReader::sized(&mut r, header.data_pack_size, "data section")?;
    if r.remaining() != 0 {
        log::warn!("{} trailing bytes after data section ignored", r.remaining());
    }
    let actual = header.checksum(header1, data);
    if actual != header.crc {
        return Err(FormatError::ChecksumMismatch {
            expected: header.crc,
            actual,
        });
    }
    Ok(RawSections { header1, data })
}

/// Inflate a stored section to its unpacked form.
pub fn unpack_section(
    raw: &[u8],
    unpack_size: u32,
    compressed: bool,
    section: &'static str,
) -> Result<Vec<u8>, FormatError> {
    if compressed {
        return compression::unpack(raw, unpack_size as usize)
            .map_err(|source| FormatError::Compression { section, source });
    }
    if raw.len() != unpack_size as usize {
        return Err(FormatError::Corrupt(format!(
            "{section} stored uncompressed is {} bytes, header says {unpack_size}",
            raw.len()
        )));
    }
    Ok(raw.to_vec())
}

// ---------------------------------------------------------------------------
// Header-1: object directory and dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub file_id: ObjectId,
    pub class_id: ClassId,
    pub flags: ObjectFlags,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginDependency {
    pub category: u32,
    pub guid: Guid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header1 {
    pub objects: Vec<DirectoryEntry>,
    pub plugins: Vec<PluginDependency>,
}

impl Header1 {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::default();
        w.u32(self.objects.len() as u32);
        for e in &self.objects {
            w.u32(e.file_id.0);
            w.u32(e.class_id.0);
            w.u32(e.flags.bits());
            w.string(e.name.as_deref());
        }
        w.u32(self.plugins.len() as u32);
        for p in &self.plugins {
            w.u32(p.category);
            w.u32(p.guid.d1);
            w.u32(p.guid.d2);
        }
        w.out
    }

    pub fn decode(bytes: &[u8]) -> Result<Header1, FormatError> {
        let mut r = ByteReader::new(bytes, "header-1 section");
        let count = r.count(16)?;
        let mut objects = Vec::with_capacity(count);
        for _ in 0..count {
            objects.push(DirectoryEntry {
                file_id: ObjectId(r.u32()?),
                class_id: ClassId(r.u32()?),
                flags: ObjectFlags::from_bits(r.u32()?),
                name: r.string()?,
            });
        }
        let count = r.count(12)?;
        let mut plugins = Vec::with_capacity(count);
        for _ in 0..count {
            plugins.push(PluginDependency {
                category: r.u32()?,
                guid: Guid::new(r.u32()?, r.u32()?),
            });
        }
        Ok(Header1 { objects, plugins })
    }
}

// ---------------------------------------------------------------------------
// Data section
// ---------------------------------------------------------------------------

/// A framed chunk as found in the data section.
#[derive(Debug)]
pub enum Payload {
    None,
    Chunk(Chunk),
    /// The frame was intact but its content did not decode.
    Malformed(ChunkError),
}

impl Payload {
    fn from_frame(bytes: &[u8], info: CompressionInfo) -> Payload {
        if bytes.is_empty() {
            return Payload::None;
        }
        match Chunk::from_bytes(bytes) {
            Ok(mut chunk) => {
                chunk.set_compression(info);
                Payload::Chunk(chunk)
            }
            Err(e) => Payload::Malformed(e),
        }
    }
}

#[derive(Debug)]
pub struct ManagerData {
    pub guid: Guid,
    pub payload: Payload,
}

#[derive(Debug)]
pub struct ObjectData {
    pub file_id: ObjectId,
    pub payload: Payload,
}

#[derive(Debug, Default)]
pub struct DataSection {
    pub managers: Vec<ManagerData>,
    pub objects: Vec<ObjectData>,
}

impl DataSection {
    /// Decode `manager_count` manager frames then `object_count` object
    /// frames. A frame that overruns the section is fatal; a frame whose
    /// chunk does not decode is reported through [`Payload::Malformed`].
    pub fn decode(
        bytes: &[u8],
        manager_count: u32,
        object_count: u32,
        info: CompressionInfo,
    ) -> Result<DataSection, FormatError> {
        let mut r = ByteReader::new(bytes, "data section");
        let mut section = DataSection::default();
        let managers = r.bounded(manager_count, 12)?;
        section.managers.reserve(managers);
        for _ in 0..managers {
            let guid = Guid::new(r.u32()?, r.u32()?);
            let frame = r.frame()?;
            section.managers.push(ManagerData {
                guid,
                payload: Payload::from_frame(frame, info),
            });
        }
        let objects = r.bounded(object_count, 8)?;
        section.objects.reserve(objects);
        for _ in 0..objects {
            let file_id = ObjectId(r.u32()?);
            let frame = r.frame()?;
            section.objects.push(ObjectData {
                file_id,
                payload: Payload::from_frame(frame, info),
            });
        }
        if r.remaining() != 0 {
            return Err(FormatError::Corrupt(format!(
                "{} unread bytes at the end of the data section",
                r.remaining()
            )));
        }
        Ok(section)
    }
}

/// One manager's chunk, ready to write.
#[derive(Debug, Clone)]
pub struct ManagerFrame<'a> {
    pub guid: Guid,
    pub chunk: Option<&'a Chunk>,
}

/// One object's chunk, ready to write.
#[derive(Debug, Clone)]
pub struct ObjectFrame<'a> {
    pub file_id: ObjectId,
    pub chunk: Option<&'a Chunk>,
}

pub fn encode_data(managers: &[ManagerFrame<'_>], objects: &[ObjectFrame<'_>]) -> Vec<u8> {
    let mut w = ByteWriter::default();
    for m in managers {
        w.u32(m.guid.d1);
        w.u32(m.guid.d2);
        w.frame(m.chunk);
    }
    for o in objects {
        w.u32(o.file_id.0);
        w.frame(o.chunk);
    }
    w.out
}

// ---------------------------------------------------------------------------
// Whole file
// ---------------------------------------------------------------------------

/// Parameters of [`write_file`] not derived from the content.
#[derive(Debug, Clone, Copy)]
pub struct WriteParams {
    pub file_version: u32,
    pub compress: bool,
    pub compression_level: u32,
    pub max_id_saved: u32,
}

/// Assemble a complete file. Counts, sizes and the CRC are filled in here.
pub fn write_file(
    header1: &Header1,
    managers: &[ManagerFrame<'_>],
    objects: &[ObjectFrame<'_>],
    params: &WriteParams,
) -> Result<Vec<u8>, FormatError> {
    let h1 = header1.encode();
    let data = encode_data(managers, objects);
    let mut header = FileHeader {
        file_version: params.file_version,
        product_version: PRODUCT_VERSION,
        product_build: PRODUCT_BUILD,
        header1_unpack_size: h1.len() as u32,
        data_unpack_size: data.len() as u32,
        manager_count: managers.len() as u32,
        object_count: objects.len() as u32,
        max_id_saved: params.max_id_saved,
        ..Default::default()
    };
    let (h1, data) = if params.compress {
        header.write_mode |= WRITE_WHOLE_COMPRESSED;
        let pack = |bytes: &[u8], section| {
            compression::pack(bytes, params.compression_level)
                .map(|p| p.data)
                .map_err(|source| FormatError::Compression { section, source })
        };
        (pack(&h1, "header-1")?, pack(&data, "data")?)
    } else {
        (h1, data)
    };
    header.header1_pack_size = h1.len() as u32;
    header.data_pack_size = data.len() as u32;
    header.crc = header.checksum(&h1, &data);

    let mut out = Vec::with_capacity(HEADER_LEN + h1.len() + data.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&h1);
    out.extend_from_slice(&data);
    Ok(out)
}

/// A fully decoded file.
#[derive(Debug)]
pub struct SceneFile {
    pub header: FileHeader,
    pub header1: Header1,
    pub data: DataSection,
}

/// Decode a whole file in one call.
pub fn read_file(bytes: &[u8]) -> Result<SceneFile, FormatError> {
    let header = FileHeader::parse(bytes)?;
    let raw = split_sections(bytes, &header)?;
    let compressed = header.is_compressed();
    let h1 = unpack_section(
        raw.header1,
        header.header1_unpack_size,
        compressed,
        "header-1",
    )?;
    let header1 = Header1::decode(&h1)?;
    let data = unpack_section(raw.data, header.data_unpack_size, compressed, "data")?;
    let info = CompressionInfo {
        unpacked_size: data.len(),
        packed_size: raw.data.len(),
        compressed,
    };
    let data = DataSection::decode(&data, header.manager_count, header.object_count, info)?;
    Ok(SceneFile {
        header,
        header1,
        data,
    })
}

// ---------------------------------------------------------------------------
// Byte helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ByteWriter {
    out: Vec<u8>,
}

impl ByteWriter {
    fn u32(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    /// `[len incl. NUL][bytes][NUL][padding]`; 0 for none.
    fn string(&mut self, s: Option<&str>) {
        let Some(s) = s else {
            self.u32(0);
            return;
        };
        self.u32(s.len() as u32 + 1);
        self.out.extend_from_slice(s.as_bytes());
        self.out.push(0);
        while self.out.len() % 4 != 0 {
            self.out.push(0);
        }
    }

    fn frame(&mut self, chunk: Option<&Chunk>) {
        match chunk {
            Some(chunk) => {
                self.u32((chunk.serialized_len() / 4) as u32);
                chunk.write_bytes(&mut self.out);
            }
            None => self.u32(0),
        }
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8], section: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            section,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if n > self.remaining() {
            return Err(FormatError::Truncated {
                section: self.section,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn sized(
        outer: &mut ByteReader<'a>,
        len: u32,
        section: &'static str,
    ) -> Result<&'a [u8], FormatError> {
        outer.take(len as usize).map_err(|e| match e {
            FormatError::Truncated {
                needed, available, ..
            } => FormatError::Truncated {
                section,
                needed,
                available,
            },
            other => other,
        })
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A declared count, rejected when even the smallest entries could not
    /// fit in what remains.
    fn count(&mut self, min_entry: usize) -> Result<usize, FormatError> {
        let n = self.u32()?;
        self.bounded(n, min_entry)
    }

    fn bounded(&self, n: u32, min_entry: usize) -> Result<usize, FormatError> {
        let n = n as usize;
        if n.saturating_mul(min_entry) > self.remaining() {
            return Err(FormatError::Corrupt(format!(
                "{} declares {n} entries but only {} bytes remain",
                self.section,
                self.remaining()
            )));
        }
        Ok(n)
    }

    fn string(&mut self) -> Result<Option<String>, FormatError> {
        let len = self.u32()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let padded = len.next_multiple_of(4);
        let bytes = self.take(padded)?;
        let text = &bytes[..len - 1];
        Ok(Some(String::from_utf8_lossy(text).into_owned()))
    }

    fn frame(&mut self) -> Result<&'a [u8], FormatError> {
        let words = self.u32()? as usize;
        self.take(words.saturating_mul(4))
    }
}
