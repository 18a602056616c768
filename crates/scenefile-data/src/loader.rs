//! Reads data files and turns them into a schema registry and session
//! configuration.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by [`crate::types`] and
//! [`crate::session_config`].

use crate::session_config::{SessionConfig, load_session_config};
use crate::types::load_types;
use scenefile_core::error::{ErrorKind, io_kind};
use scenefile_core::id::ParseGuidError;
use scenefile_core::registry::{RegistryError, SchemaRegistry, SchemaRegistryBuilder, SchemaTypeId};
use scenefile_core::session::Session;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {}", dir.display())]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {}", file.display())]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {} and {}", a.display(), b.display())]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {}: {detail}", file.display())]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {}", file.display())]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {}", file.display())]
    DuplicateName { file: PathBuf, name: String },

    #[error("bad guid in {}", file.display())]
    InvalidGuid {
        file: PathBuf,
        #[source]
        source: ParseGuidError,
    },

    /// The resolved types were rejected by the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DataLoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataLoadError::MissingRequired { .. } => ErrorKind::FileNotFound,
            DataLoadError::UnsupportedFormat { .. }
            | DataLoadError::ConflictingFormats { .. }
            | DataLoadError::InvalidGuid { .. } => ErrorKind::InvalidArgument,
            DataLoadError::Parse { .. } => ErrorKind::Corrupt,
            DataLoadError::UnresolvedRef { .. } => ErrorKind::NotFound,
            DataLoadError::DuplicateName { .. } => ErrorKind::AlreadyExists,
            DataLoadError::Registry(e) => e.kind(),
            DataLoadError::Io(e) => io_kind(e, false),
        }
    }
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if !candidate.exists() {
            continue;
        }
        if let Some(existing) = &found {
            return Err(DataLoadError::ConflictingFormats {
                a: existing.clone(),
                b: candidate,
            });
        }
        found = Some(candidate);
    }
    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    log::debug!("reading {} as {format:?}", path.display());
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. For TOML files, extracts the array at the
/// given `toml_key` from a top-level table. For RON and JSON, deserializes
/// directly as `Vec<T>`.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    if detect_format(path)? != Format::Toml {
        return deserialize_file(path);
    }
    let content = std::fs::read_to_string(path)?;
    let table: toml::Value = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
    let array = table
        .get(toml_key)
        .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?
        .clone();
    array
        .try_into()
        .map_err(|e: toml::de::Error| parse_error(path, e))
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

// ===========================================================================
// Scene data
// ===========================================================================

/// Everything a data directory contributes to a session.
#[derive(Debug)]
pub struct SceneData {
    pub registry: Arc<SchemaRegistry>,
    pub config: SessionConfig,
    /// Types declared by the directory's `types` file, in file order.
    pub declared: Vec<SchemaTypeId>,
}

impl SceneData {
    /// A session over the registry with the configured plugins available.
    pub fn session(&self) -> Result<Session, ParseGuidError> {
        let mut session = Session::new(Arc::clone(&self.registry));
        self.config.apply(&mut session)?;
        Ok(session)
    }
}

/// Load the builtin registry extended by `dir/types.*`, and the session
/// configuration from `dir/session.*`. Both files are optional.
pub fn load_scene_data(dir: &Path) -> Result<SceneData, DataLoadError> {
    let mut builder = SchemaRegistryBuilder::with_builtins()?;
    let declared = load_types(dir, &mut builder)?;
    let registry = Arc::new(builder.build()?);
    let config = load_session_config(dir)?;
    log::info!(
        "loaded {} schema types ({} declared) and {} plugins from {}",
        registry.len(),
        declared.len(),
        config.plugins.len(),
        dir.display()
    );
    Ok(SceneData {
        registry,
        config,
        declared,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    pub(crate) fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "scenefile_data_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Clean up a test directory.
    pub(crate) fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    // -----------------------------------------------------------------------
    // detect_format
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("types.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("types.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("types.json")).unwrap(), Format::Json);
    }

    #[test]
    fn detect_format_unsupported() {
        for name in ["types.yaml", "types"] {
            let result = detect_format(Path::new(name));
            assert!(matches!(result, Err(DataLoadError::UnsupportedFormat { .. })));
        }
    }

    // -----------------------------------------------------------------------
    // find_data_file
    // -----------------------------------------------------------------------

    #[test]
    fn find_data_file_found() {
        let dir = make_test_dir("find");
        fs::write(dir.join("types.toml"), "").unwrap();

        let result = find_data_file(&dir, "types").unwrap();
        assert_eq!(result, Some(dir.join("types.toml")));

        cleanup(&dir);
    }

    #[test]
    fn find_data_file_missing() {
        let dir = make_test_dir("find_missing");
        assert_eq!(find_data_file(&dir, "types").unwrap(), None);

        let result = require_data_file(&dir, "types");
        let err = result.unwrap_err();
        assert!(matches!(err, DataLoadError::MissingRequired { .. }));
        assert_eq!(err.kind(), ErrorKind::FileNotFound);

        cleanup(&dir);
    }

    #[test]
    fn find_data_file_conflict() {
        let dir = make_test_dir("find_conflict");
        fs::write(dir.join("types.ron"), "[]").unwrap();
        fs::write(dir.join("types.json"), "[]").unwrap();

        let result = find_data_file(&dir, "types");
        assert!(matches!(result, Err(DataLoadError::ConflictingFormats { .. })));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // deserialize_list
    // -----------------------------------------------------------------------

    #[derive(Debug, serde::Deserialize)]
    struct Named {
        name: String,
    }

    #[test]
    fn deserialize_list_all_formats() {
        let dir = make_test_dir("list");
        let files = [
            ("a.ron", r#"[(name: "x"), (name: "y")]"#),
            ("b.json", r#"[{"name": "x"}, {"name": "y"}]"#),
            ("c.toml", "[[items]]\nname = \"x\"\n\n[[items]]\nname = \"y\"\n"),
        ];
        for (file, content) in files {
            let path = dir.join(file);
            fs::write(&path, content).unwrap();
            let items: Vec<Named> = deserialize_list(&path, "items").unwrap();
            assert_eq!(items.len(), 2, "{file}");
            assert_eq!(items[1].name, "y");
        }

        cleanup(&dir);
    }

    #[test]
    fn deserialize_list_toml_missing_key() {
        let dir = make_test_dir("list_toml_missing");
        let path = dir.join("items.toml");
        fs::write(&path, r#"foo = "bar""#).unwrap();

        let result: Result<Vec<Named>, _> = deserialize_list(&path, "items");
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    #[test]
    fn deserialize_file_parse_error() {
        let dir = make_test_dir("deser_parse_err");
        let path = dir.join("bad.ron");
        fs::write(&path, "this is not valid RON {{{").unwrap();

        let err = deserialize_file::<Vec<Named>>(&path).unwrap_err();
        assert!(matches!(err, DataLoadError::Parse { .. }));
        assert_eq!(err.kind(), ErrorKind::Corrupt);

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // resolve_name / check_duplicate
    // -----------------------------------------------------------------------

    #[test]
    fn resolve_name_missing() {
        let map: HashMap<String, u32> = HashMap::new();

        let result = resolve_name(&map, "Vec9", Path::new("types.ron"), "type");
        assert!(matches!(
            result,
            Err(DataLoadError::UnresolvedRef {
                ref name,
                expected_kind: "type",
                ..
            }) if name == "Vec9"
        ));
    }

    #[test]
    fn check_duplicate_has_dup() {
        let mut map = HashMap::new();
        map.insert("Pair".to_string(), 1u32);
        assert!(check_duplicate(&map, "Other", Path::new("types.ron")).is_ok());
        let result = check_duplicate(&map, "Pair", Path::new("types.ron"));
        assert!(matches!(
            result,
            Err(DataLoadError::DuplicateName { ref name, .. }) if name == "Pair"
        ));
    }

    // -----------------------------------------------------------------------
    // load_scene_data
    // -----------------------------------------------------------------------

    #[test]
    fn empty_directory_gives_builtins_and_defaults() {
        let dir = make_test_dir("scene_empty");

        let data = load_scene_data(&dir).unwrap();
        assert!(data.declared.is_empty());
        assert!(data.registry.find_by_name("Int").is_some());
        assert_eq!(data.config, SessionConfig::default());

        cleanup(&dir);
    }

    #[test]
    fn scene_data_builds_a_session() {
        let dir = make_test_dir("scene_full");
        fs::write(
            dir.join("types.ron"),
            r#"[
                (
                    name: "SoundLevel",
                    shape: Struct(fields: [(name: "volume", type: "Float")]),
                    class: Some((class: "Sound", tag: 9437184)),
                    plugin: Some("0x50c0,0x1d"),
                ),
            ]"#,
        )
        .unwrap();
        fs::write(
            dir.join("session.json"),
            r#"{"plugins": ["0x50c0,0x1d"], "save": {"compress": false}}"#,
        )
        .unwrap();

        let data = load_scene_data(&dir).unwrap();
        assert_eq!(data.declared.len(), 1);
        assert!(!data.config.save.compress);
        let session = data.session().unwrap();
        assert!(session.has_plugin("0x50c0,0x1d".parse().unwrap()));
        let level = session.registry().find_by_name("SoundLevel").unwrap();
        assert_eq!(level.section_tag, Some(0x0090_0000));

        cleanup(&dir);
    }

    #[test]
    fn registry_errors_pass_through() {
        let dir = make_test_dir("scene_registry_err");
        fs::write(
            dir.join("types.json"),
            r#"[
                {"name": "A", "shape": {"Struct": {"fields": []}},
                 "class": {"class": "Sound", "tag": 1}},
                {"name": "B", "shape": {"Struct": {"fields": []}},
                 "class": {"class": "Sound", "tag": 2}}
            ]"#,
        )
        .unwrap();

        let err = load_scene_data(&dir).unwrap_err();
        assert!(matches!(err, DataLoadError::Registry(RegistryError::ClassTaken { .. })));
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        cleanup(&dir);
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let data_err: DataLoadError = io_err.into();
        assert!(matches!(data_err, DataLoadError::Io(_)));
        assert_eq!(data_err.kind(), ErrorKind::FileNotFound);
    }
}
