//! Loading several files concurrently from disk.

use scenefile_core::error::ErrorKind;
use scenefile_core::id::ObjectId;
use scenefile_core::load::LoadOptions;
use scenefile_core::parallel::load_many;
use scenefile_core::test_utils::*;
use std::fs;
use std::sync::Arc;

#[test]
fn files_load_in_input_order() {
    let dir = std::env::temp_dir().join(format!("scenefile_batch_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();

    let mut paths = Vec::new();
    for n in 1..=4u32 {
        let names: Vec<String> = (0..n).map(|i| format!("g{n}_{i}")).collect();
        let entries: Vec<(u32, &str, &[u32])> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as u32, name.as_str(), &[][..]))
            .collect();
        let path = dir.join(format!("scene{n}.nmo"));
        fs::write(&path, group_file(&entries)).unwrap();
        paths.push(path);
    }
    paths.insert(2, dir.join("missing.nmo"));

    let registry = Arc::new(registry());
    let results = load_many(&registry, &paths, &LoadOptions::default());
    assert_eq!(results.len(), 5);

    let err = results[2].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);

    let sizes: Vec<usize> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|(session, report)| {
            assert_eq!(report.loaded, session.repository().len());
            session.repository().len()
        })
        .collect();
    assert_eq!(sizes, vec![1, 2, 3, 4]);

    let (session, report) = results[4].as_ref().unwrap();
    let last = report.runtime_id(ObjectId(3)).unwrap();
    assert_eq!(session.object(last).unwrap().name.as_deref(), Some("g4_3"));

    let _ = fs::remove_dir_all(&dir);
}
