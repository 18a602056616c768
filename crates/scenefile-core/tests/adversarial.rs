//! Adversarial input tests for the scenefile loader.
//!
//! Truncated, corrupted and hostile input must come back as errors, never
//! as panics.

use scenefile_core::builtin::{GROUP_MEMBERS, OBJECT_HIDDEN};
use scenefile_core::chunk::{Chunk, ChunkError};
use scenefile_core::error::ErrorKind;
use scenefile_core::format::{
    CURRENT_FILE_VERSION, DirectoryEntry, HEADER_LEN, Header1, ObjectFrame, WriteParams,
    read_file, write_file,
};
use scenefile_core::id::*;
use scenefile_core::load::{LoadOptions, load_bytes};
use scenefile_core::object::ObjectFlags;
use scenefile_core::test_utils::*;

fn sample_file() -> Vec<u8> {
    let mut session = session();
    let ids = add_scene(&mut session);
    save(&mut session, &ids)
}

/// Every prefix of a valid file fails cleanly.
#[test]
fn truncated_files() {
    let bytes = sample_file();
    for len in 0..bytes.len() {
        let mut session = session();
        let result = load_bytes(&mut session, &bytes[..len], &LoadOptions::default());
        assert!(result.is_err(), "prefix of {len} bytes loaded");
    }
}

/// A flipped byte anywhere after the header is caught by the checksum.
#[test]
fn corrupted_bytes_fail_the_checksum() {
    let bytes = sample_file();
    for at in (HEADER_LEN..bytes.len()).step_by(7) {
        let mut corrupt = bytes.clone();
        corrupt[at] ^= 0x5a;
        let mut session = session();
        let err = load_bytes(&mut session, &corrupt, &LoadOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch, "byte {at}");
    }
}

#[test]
fn garbage_is_not_a_scene_file() {
    let mut session = session();
    let garbage: Vec<u8> = (0..512u32).map(|i| (i * 31 % 251) as u8).collect();
    let err = load_bytes(&mut session, &garbage, &LoadOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSignature);
    assert!(session.repository().is_empty());
}

#[test]
fn header_only_file() {
    let bytes = sample_file();
    assert!(read_file(&bytes[..HEADER_LEN]).is_err());
}

/// A chunk claiming far more payload than it carries.
#[test]
fn chunk_with_huge_count() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x0007_0100u32.to_le_bytes());
    bytes.extend_from_slice(&u32::MAX.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 16]);
    let err = Chunk::from_bytes(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overrun);
}

/// An ID-list entry pointing past the payload.
#[test]
fn id_list_out_of_range() {
    let mut chunk = raw_chunk(&[1, 2]);
    {
        let mut w = chunk.start_write();
        w.write_object_id(ObjectId(5));
    }
    let mut bytes = chunk.to_bytes();
    // The single ID-list entry is the last word.
    let last = bytes.len() - 4;
    bytes[last..].copy_from_slice(&100u32.to_le_bytes());
    assert!(Chunk::from_bytes(&bytes).is_err());
}

/// Sub-chunks nested past the depth limit.
#[test]
fn deeply_nested_sub_chunks() {
    let mut chunk = raw_chunk(&[0]);
    for _ in 0..200 {
        let mut outer = raw_chunk(&[]);
        {
            let mut w = outer.start_write();
            w.write_sub_chunk(chunk);
        }
        chunk = outer;
    }
    let err = Chunk::from_bytes(&chunk.to_bytes()).unwrap_err();
    assert!(matches!(err, ChunkError::SubChunk { .. }));
    let mut cur = &err;
    while let ChunkError::SubChunk { source, .. } = cur {
        cur = source;
    }
    assert!(matches!(cur, ChunkError::TooDeep(_)));
}

/// Sequences larger than the configured limit are rejected before any
/// allocation.
#[test]
fn sequence_limit() {
    let mut chunk = raw_chunk(&[]);
    {
        let mut w = chunk.start_write();
        w.write_object_sequence(&vec![ObjectId(1); 64]);
    }
    let mut r = chunk.reader().with_sequence_limit(16);
    assert!(r.read_object_sequence().is_err());
    let mut r = chunk.reader();
    assert_eq!(r.read_object_sequence().unwrap().len(), 64);
}

/// A one-group file whose body is `words` verbatim.
fn group_with_body(words: &[u32]) -> Vec<u8> {
    let mut chunk = Chunk::new(ClassId::GROUP, 0);
    chunk.start_write().write_raw_words(words);
    let header1 = Header1 {
        objects: vec![DirectoryEntry {
            file_id: ObjectId(0),
            class_id: ClassId::GROUP,
            flags: ObjectFlags::NONE,
            name: Some("hostile".into()),
        }],
        plugins: Vec::new(),
    };
    let frames = [ObjectFrame {
        file_id: ObjectId(0),
        chunk: Some(&chunk),
    }];
    let params = WriteParams {
        file_version: CURRENT_FILE_VERSION,
        compress: false,
        compression_level: 0,
        max_id_saved: 0,
    };
    write_file(&header1, &[], &frames, &params).unwrap()
}

/// Identifier links into the identifier itself, backwards, or past the end.
/// The object still loads; the broken sections read as absent or skipped.
#[test]
fn malformed_identifier_links() {
    let bodies: [&[u32]; 6] = [
        &[GROUP_MEMBERS, 1, 5, 0],
        &[OBJECT_HIDDEN, 1, GROUP_MEMBERS, 0, 0],
        &[OBJECT_HIDDEN, 3, 0, GROUP_MEMBERS, 2, 0],
        &[OBJECT_HIDDEN, 4, 0, GROUP_MEMBERS, 4, 1, 7],
        &[GROUP_MEMBERS, 999, 1, 0],
        &[GROUP_MEMBERS],
    ];
    for body in bodies {
        let bytes = group_with_body(body);
        let mut session = session();
        let report = load_bytes(&mut session, &bytes, &LoadOptions::default()).unwrap();
        assert_eq!(report.loaded, 1, "{body:?}");
        assert_eq!(session.repository().len(), 1);
    }
}
