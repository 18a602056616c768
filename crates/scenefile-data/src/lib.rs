pub mod loader;
pub mod schema;
pub mod session_config;
pub mod types;

pub use loader::{DataLoadError, SceneData, load_scene_data};
pub use session_config::SessionConfig;
