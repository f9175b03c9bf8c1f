use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("could not read canister ids file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse canister ids file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Entry {
    Networks { local: Option<String> },
    Other(#[allow(dead_code)] serde::de::IgnoredAny),
}

/// Canister names mapped to their local canister ids, as written by the
/// build tooling:
///
/// ```json
/// { "ledger": { "local": "ryjl3-tyaaa-aaaaa-aaaba-cai", "ic": "..." } }
/// ```
///
/// Names without a `local` id are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanisterIds {
    by_name: BTreeMap<String, String>,
}

impl CanisterIds {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| LookupError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::from_json(&contents).map_err(|source| LookupError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub(crate) fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, Entry> = serde_json::from_str(contents)?;

        let by_name = entries
            .into_iter()
            .filter_map(|(name, entry)| match entry {
                Entry::Networks { local: Some(id) } => Some((name, id)),
                _ => None,
            })
            .collect();

        Ok(Self { by_name })
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}
