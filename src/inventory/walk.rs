//! Build output walker
//!
//! Produces the local inventory for a build output directory. Standard
//! ignore-file filters are disabled: the build directory is deployed
//! verbatim, and unwanted files are handled by exclusion globs at plan
//! time instead.

use std::path::Path;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;

use crate::error::{CaravelError, CaravelResult};
use crate::inventory::{hash_file, LocalEntry, RelPath};

/// Walk a build output directory into a sorted local inventory
///
/// Every regular file is hashed. Entries come back sorted by relative
/// path so planning on the same tree is reproducible.
pub fn walk_build_dir(root: &Path) -> CaravelResult<Vec<LocalEntry>> {
    if !root.is_dir() {
        return Err(CaravelError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("build output directory not found: {}", root.display()),
        )));
    }

    let mut entries = Vec::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    for result in walker {
        let entry = result.map_err(|e| {
            CaravelError::Io(std::io::Error::other(format!(
                "error walking {}: {e}",
                root.display()
            )))
        })?;

        let file_type = match entry.file_type() {
            Some(t) => t,
            None => continue,
        };
        if !file_type.is_file() {
            continue;
        }

        let absolute = entry.path().to_path_buf();
        let relative = absolute
            .strip_prefix(root)
            .map_err(|_| CaravelError::InvalidPath {
                path: absolute.display().to_string(),
            })?;
        let path = RelPath::new(relative)?;

        let metadata = entry.metadata().map_err(|e| {
            CaravelError::Io(std::io::Error::other(format!(
                "could not stat {}: {e}",
                absolute.display()
            )))
        })?;
        let modified: Option<DateTime<Utc>> =
            metadata.modified().ok().map(DateTime::<Utc>::from);

        let hash = hash_file(&absolute)?;

        entries.push(LocalEntry {
            path,
            size: metadata.len(),
            modified,
            hash,
            source: absolute,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}
