//! Locate dependency repositories on disk by manifest id.
//!
//! The search starts at a repository and expands outwards, always visiting
//! the most promising directory next: the one sharing the longest prefix
//! with the start, then directories under code-like folders, then those
//! under the home directory, then the shallowest.

use anyhow::Result;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::repository::IGNORE_AS_DEPENDENCY;

const CODE_DIR_NAMES: &[&str] = &[
    "code",
    "coding",
    "development",
    "develop",
    "dev",
    "source",
    "src",
];

const SKIPPED_DIR_NAMES: &[&str] = &["generated", "__pycache__", "node_modules", "target"];

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Levels below each search root that are examined
    pub search_depth: usize,
    /// Stop after examining this many directories
    pub max_num_searches: Option<usize>,
    /// When non-empty, only directories under one of these are examined
    pub required_ancestor_dirs: Vec<PathBuf>,
    /// Used to favor directories under the user's home
    pub home_dir: Option<PathBuf>,
}

/// A repository found during the search
#[derive(Debug, Clone)]
pub struct FoundRepository {
    pub root: PathBuf,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SearchKey {
    common_prefix: Reverse<usize>,
    outside_code_dir: bool,
    outside_home: bool,
    depth: usize,
    lowercase: String,
    path: PathBuf,
}

pub struct Discovery {
    options: SearchOptions,
}

impl Discovery {
    pub fn new(options: SearchOptions) -> Self {
        Self { options }
    }

    /// Search `roots` in order for repositories whose id is in `wanted`.
    /// The first location found for an id wins.
    pub fn find(
        &self,
        roots: &[PathBuf],
        wanted: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, FoundRepository>> {
        let mut found = BTreeMap::new();
        let mut visited = HashSet::new();
        let mut searches = 0usize;

        for root in roots {
            if found.len() == wanted.len() {
                break;
            }

            let root_depth = root.components().count();
            let max_depth = root_depth + self.options.search_depth;
            let mut queue = BTreeSet::new();
            queue.insert(self.key(root, root));

            while let Some(key) = queue.pop_first() {
                if found.len() == wanted.len() {
                    break;
                }
                if let Some(limit) = self.options.max_num_searches {
                    if searches >= limit {
                        tracing::debug!("stopping after {} directories", searches);
                        return Ok(found);
                    }
                }

                let dir = key.path;
                if !visited.insert(dir.clone()) {
                    continue;
                }
                searches += 1;

                if dir.join(IGNORE_AS_DEPENDENCY).exists() {
                    continue;
                }

                self.inspect(&dir, wanted, &mut found);

                if let Some(parent) = dir.parent() {
                    if self.allowed(parent) && !visited.contains(parent) {
                        queue.insert(self.key(parent, root));
                    }
                }

                if dir.components().count() >= max_depth {
                    continue;
                }

                let Ok(entries) = fs::read_dir(&dir) else {
                    tracing::debug!("unable to read {:?}", dir);
                    continue;
                };
                for entry in entries.filter_map(|entry| entry.ok()) {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if skip_name(&name) {
                        continue;
                    }
                    let path = entry.path();
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    if is_dir && self.allowed(&path) && !visited.contains(&path) {
                        queue.insert(self.key(&path, root));
                    }
                }
            }
        }

        Ok(found)
    }

    fn inspect(
        &self,
        dir: &Path,
        wanted: &BTreeSet<String>,
        found: &mut BTreeMap<String, FoundRepository>,
    ) {
        if !dir.join(MANIFEST_FILE).is_file() {
            return;
        }

        match Manifest::load_from_repository(dir) {
            Ok(manifest) => {
                if wanted.contains(&manifest.id) && !found.contains_key(&manifest.id) {
                    tracing::info!("found '{}' at {:?}", manifest.name, dir);
                    found.insert(
                        manifest.id.clone(),
                        FoundRepository {
                            root: dir.to_path_buf(),
                            manifest,
                        },
                    );
                }
            }
            Err(err) => tracing::warn!("ignoring {:?}: {:#}", dir, err),
        }
    }

    fn allowed(&self, path: &Path) -> bool {
        self.options.required_ancestor_dirs.is_empty()
            || self
                .options
                .required_ancestor_dirs
                .iter()
                .any(|ancestor| path.starts_with(ancestor))
    }

    fn key(&self, path: &Path, root: &Path) -> SearchKey {
        let common_prefix = path
            .components()
            .zip(root.components())
            .take_while(|(a, b)| a == b)
            .count();

        let outside_code_dir = !path.components().any(|component| {
            let name = component.as_os_str().to_string_lossy().to_lowercase();
            CODE_DIR_NAMES.contains(&name.as_str())
        });

        let outside_home = match &self.options.home_dir {
            Some(home) => !path.starts_with(home),
            None => true,
        };

        SearchKey {
            common_prefix: Reverse(common_prefix),
            outside_code_dir,
            outside_home,
            depth: path.components().count(),
            lowercase: path.to_string_lossy().to_lowercase(),
            path: path.to_path_buf(),
        }
    }
}

fn skip_name(name: &str) -> bool {
    name.starts_with('.')
        || name.starts_with('$')
        || SKIPPED_DIR_NAMES.contains(&name.to_lowercase().as_str())
}
