//! Load/save options and available plugins, read from `session.{ron,toml,json}`.

use crate::loader::{DataLoadError, deserialize_file, find_data_file};
use scenefile_core::id::{Guid, ParseGuidError};
use scenefile_core::load::LoadOptions;
use scenefile_core::save::SaveOptions;
use scenefile_core::session::Session;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options applied to every load and save of a session. Missing keys take
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub load: LoadOptions,
    pub save: SaveOptions,
    /// Plugins the session provides, as `0x1234abcd,0x0000ffff`.
    pub plugins: Vec<String>,
}

impl SessionConfig {
    pub fn plugin_guids(&self) -> Result<Vec<Guid>, ParseGuidError> {
        self.plugins.iter().map(|p| p.parse()).collect()
    }

    /// Make the configured plugins available in `session`.
    pub fn apply(&self, session: &mut Session) -> Result<(), ParseGuidError> {
        for guid in self.plugin_guids()? {
            session.add_plugin(guid);
        }
        Ok(())
    }
}

/// Read `dir/session.*`, or the defaults when there is none. Plugin GUIDs
/// are checked here so a bad one is reported against the file.
pub fn load_session_config(dir: &Path) -> Result<SessionConfig, DataLoadError> {
    let Some(path) = find_data_file(dir, "session")? else {
        log::debug!("no session file in {}, using defaults", dir.display());
        return Ok(SessionConfig::default());
    };
    let config: SessionConfig = deserialize_file(&path)?;
    config
        .plugin_guids()
        .map_err(|source| DataLoadError::InvalidGuid {
            file: path.clone(),
            source,
        })?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::{cleanup, make_test_dir};
    use scenefile_core::session::DuplicatePolicy;
    use std::fs;

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = make_test_dir("config_toml");
        fs::write(
            dir.join("session.toml"),
            r#"
plugins = ["0x10,0x20"]

[load]
check_duplicates = true
duplicate_policy = "Rename"

[save]
compression_level = 9
"#,
        )
        .unwrap();

        let config = load_session_config(&dir).unwrap();
        assert!(config.load.check_duplicates);
        assert_eq!(config.load.duplicate_policy, DuplicatePolicy::Rename);
        assert!(config.load.check_dependencies);
        assert_eq!(config.save.compression_level, 9);
        assert_eq!(config.save, SaveOptions {
            compression_level: 9,
            ..SaveOptions::default()
        });
        assert_eq!(config.plugin_guids().unwrap(), vec![Guid::new(0x10, 0x20)]);

        cleanup(&dir);
    }

    #[test]
    fn ron_config() {
        let dir = make_test_dir("config_ron");
        fs::write(
            dir.join("session.ron"),
            r#"(load: (as_dynamic: true), plugins: [])"#,
        )
        .unwrap();

        let config = load_session_config(&dir).unwrap();
        assert!(config.load.as_dynamic);
        assert_eq!(config.save, SaveOptions::default());

        cleanup(&dir);
    }

    #[test]
    fn conflicting_config_files() {
        let dir = make_test_dir("config_conflict");
        fs::write(dir.join("session.ron"), "()").unwrap();
        fs::write(dir.join("session.toml"), "").unwrap();

        let result = load_session_config(&dir);
        assert!(matches!(result, Err(DataLoadError::ConflictingFormats { .. })));

        cleanup(&dir);
    }

    #[test]
    fn bad_plugin_is_reported_against_the_file() {
        let dir = make_test_dir("config_bad_guid");
        fs::write(dir.join("session.json"), r#"{"plugins": ["nope"]}"#).unwrap();

        let err = load_session_config(&dir).unwrap_err();
        assert!(matches!(
            err,
            DataLoadError::InvalidGuid { ref file, .. } if file.ends_with("session.json")
        ));

        cleanup(&dir);
    }

    #[test]
    fn apply_adds_plugins() {
        let config = SessionConfig {
            plugins: vec!["0x1,0x2".into()],
            ..SessionConfig::default()
        };
        let mut session = scenefile_core::test_utils::session();
        config.apply(&mut session).unwrap();
        assert!(session.has_plugin(Guid::new(1, 2)));
    }
}
