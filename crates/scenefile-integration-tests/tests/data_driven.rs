//! Sessions built from a data directory: declared types and configured
//! load/save options.

use scenefile_core::format::read_file;
use scenefile_core::load::load_bytes;
use scenefile_core::save::save_to_bytes;
use scenefile_core::test_utils::add_group;
use scenefile_data::{DataLoadError, load_scene_data};
use std::fs;
use std::path::PathBuf;

fn data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "scenefile_integration_{name}_{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A type introduced at file version 5 is invisible to older files.
#[test]
fn widget_exists_from_version_five() {
    let dir = data_dir("widget");
    fs::write(
        dir.join("types.ron"),
        r#"[
            (name: "Widget", since: 5, shape: Struct(fields: [
                (name: "width", type: "Int"),
                (name: "height", type: "Int"),
            ])),
        ]"#,
    )
    .unwrap();

    let data = load_scene_data(&dir).unwrap();
    assert_eq!(data.declared.len(), 1);
    assert!(data.registry.find_for_version("Widget", 3).is_none());
    let widget = data.registry.find_for_version("Widget", 5).unwrap();
    assert_eq!(widget.fields.len(), 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn configured_options_drive_save_and_load() {
    let dir = data_dir("options");
    fs::write(
        dir.join("session.toml"),
        r#"
plugins = ["0x50c0,0x1d"]

[load]
check_duplicates = true
duplicate_policy = "UseExisting"

[save]
compress = false
"#,
    )
    .unwrap();

    let data = load_scene_data(&dir).unwrap();
    let mut session = data.session().unwrap();
    assert!(session.has_plugin("0x50c0,0x1d".parse().unwrap()));

    let a = add_group(&mut session, "a", &[]);
    let bytes = save_to_bytes(&mut session, &[a], &data.config.save).unwrap();
    assert!(!read_file(&bytes).unwrap().header.is_compressed());

    let report = load_bytes(&mut session, &bytes, &data.config.load).unwrap();
    assert_eq!(report.reused, 1);
    assert_eq!(report.runtime_id(scenefile_core::id::ObjectId(0)), Some(a));
    assert_eq!(session.repository().len(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn broken_types_file_stops_the_session() {
    let dir = data_dir("broken");
    fs::write(dir.join("types.json"), r#"[{"name": "X"}]"#).unwrap();

    let err = load_scene_data(&dir).unwrap_err();
    assert!(matches!(err, DataLoadError::Parse { .. }));

    let _ = fs::remove_dir_all(&dir);
}
