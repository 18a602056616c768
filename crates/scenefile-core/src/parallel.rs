//! Loading independent files concurrently.
//!
//! Each file gets its own [`Session`]; the sessions share one read-only
//! schema registry. Results come back in input order.

use crate::load::{LoadError, LoadOptions, LoadReport, load, load_bytes};
use crate::registry::SchemaRegistry;
use crate::session::Session;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

pub type BatchResult = Result<(Session, LoadReport), LoadError>;

/// Load every file in `paths` into a fresh session of its own.
pub fn load_many<P>(
    registry: &Arc<SchemaRegistry>,
    paths: &[P],
    options: &LoadOptions,
) -> Vec<BatchResult>
where
    P: AsRef<Path> + Sync,
{
    paths
        .par_iter()
        .map(|path| {
            let mut session = Session::new(Arc::clone(registry));
            let report = load(&mut session, path, options)?;
            Ok((session, report))
        })
        .collect()
}

/// Load every in-memory file in `files` into a fresh session of its own.
pub fn load_many_bytes(
    registry: &Arc<SchemaRegistry>,
    files: &[Vec<u8>],
    options: &LoadOptions,
) -> Vec<BatchResult> {
    files
        .par_iter()
        .map(|bytes| {
            let mut session = Session::new(Arc::clone(registry));
            let report = load_bytes(&mut session, bytes, options)?;
            Ok((session, report))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn results_keep_input_order() {
        let mut source = test_utils::session();
        let (a, _) = test_utils::add_cycle(&mut source);
        let two = test_utils::save(&mut source, &[a]);
        let single = test_utils::add_group(&mut source, "single", &[]);
        let one = test_utils::save(&mut source, &[single]);

        let registry = Arc::new(test_utils::registry());
        let files = [two, vec![0u8; 8], one];
        let results = load_many_bytes(&registry, &files, &LoadOptions::default());
        assert_eq!(results.len(), 3);
        let (_, first) = results[0].as_ref().unwrap();
        assert_eq!(first.mapping.len(), 2);
        assert!(results[1].is_err());
        let (session, third) = results[2].as_ref().unwrap();
        assert_eq!(third.loaded, 1);
        assert_eq!(session.repository().len(), 1);
    }
}
