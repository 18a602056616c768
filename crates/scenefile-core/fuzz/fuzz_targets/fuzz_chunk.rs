#![no_main]
use libfuzzer_sys::fuzz_target;
use scenefile_core::builtin::{GROUP_MEMBERS, OBJECT_HIDDEN};
use scenefile_core::chunk::Chunk;
use scenefile_core::pipeline::ObjectPipeline;
use scenefile_core::test_utils::registry;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a chunk. Must not panic -- returning Err is fine.
    if let Ok(chunk) = Chunk::from_bytes(data) {
        let _ = chunk.object_ids();
        let mut r = chunk.reader();
        let _ = r.identifier_sections();
        if r.seek_identifier(GROUP_MEMBERS) {
            let _ = r.read_object_sequence();
        }
        if r.seek_identifier_with_size(OBJECT_HIDDEN).is_some() {
            let _ = r.read_sub_chunk();
        }
        let _ = r.unvisited_sections();
        assert_eq!(chunk.to_bytes().len(), chunk.serialized_len());

        // Interpreted as an object of its own class tag.
        let registry = registry();
        let pipeline = ObjectPipeline::new(&registry);
        if let Ok(state) = pipeline.deserialize(chunk.class_id(), &chunk) {
            let _ = pipeline.serialize(chunk.class_id(), &state);
        }
    }
});
