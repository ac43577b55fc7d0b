//! Hand-off of generated fragments to the wrapper scripts through uniquely
//! named temporary files.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::environment::Fragment;

const MAX_ATTEMPTS: usize = 64;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A hex token unique to this process and moment.
///
/// Not suitable for anything security related.
pub fn unique_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(counter.to_le_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

/// Write `fragment` to a new file in `dir`, never reusing an existing name
pub fn write_fragment(dir: &Path, fragment: &Fragment) -> Result<PathBuf> {
    let contents = fragment.render();

    for _ in 0..MAX_ATTEMPTS {
        let path = dir.join(format!(
            "devenv-{}.{}",
            unique_token(),
            fragment.shell.fragment_extension()
        ));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!("{:?} exists; trying another name", path);
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to create {:?}", path));
            }
        };

        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to write {:?}", path))?;
        return Ok(path);
    }

    bail!(
        "Unable to find an unused file name in {:?} after {} attempts",
        dir,
        MAX_ATTEMPTS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Mutation, Shell};
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_unique_tokens() {
        let tokens: HashSet<String> = (0..1000).map(|_| unique_token()).collect();
        assert_eq!(tokens.len(), 1000);
        assert!(tokens.iter().all(|token| token.len() == 32));
    }

    #[test]
    fn test_write_fragment() {
        let temp = TempDir::new().unwrap();
        let fragment = Fragment::new(Shell::Zsh, vec![Mutation::set("A", "1")]);

        let first = write_fragment(temp.path(), &fragment).unwrap();
        let second = write_fragment(temp.path(), &fragment).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "sh");
        assert!(fs::read_to_string(&first).unwrap().contains("export A='1'"));
    }
}
