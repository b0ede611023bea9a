use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "DOCRAG_DATA_DIR";

/// On-disk home of one docrag installation: `config.redb` and `index.redb`.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the data directory and make sure it exists.
    ///
    /// `--data-dir` wins, then `DOCRAG_DATA_DIR`, then the XDG data home
    /// (`~/.local/share/docrag/`).
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve_with(explicit, |key| std::env::var(key).ok())
    }

    /// Same as [`Self::resolve`] with an injectable environment lookup.
    /// A blank `DOCRAG_DATA_DIR` counts as unset.
    pub fn resolve_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let from_env = env(DATA_DIR_ENV_VAR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let root = match (explicit, from_env) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => path,
            (None, None) => xdg::BaseDirectories::with_prefix("docrag")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config("no XDG data home for docrag".into())
                })?,
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        tracing::debug!(root = %root.display(), "using data directory");

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persisted settings.
    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Documents, chunks with their vectors, and the vocabulary blob.
    pub fn index_db(&self) -> PathBuf {
        self.root.join("index.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_pointing_at(path: &Path) -> impl Fn(&str) -> Option<String> {
        let value = path.to_string_lossy().into_owned();
        move |key| (key == DATA_DIR_ENV_VAR).then(|| value.clone())
    }

    #[test]
    fn explicit_path_lays_out_both_databases() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve_with(Some(tmp.path()), |_| None).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.config_db(), tmp.path().join("config.redb"));
        assert_eq!(dir.index_db(), tmp.path().join("index.redb"));
    }

    #[test]
    fn env_var_is_used_without_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("from-env");

        let dir = DataDir::resolve_with(None, env_pointing_at(&target)).unwrap();
        assert_eq!(dir.root(), target);
        assert!(target.is_dir());
    }

    #[test]
    fn flag_beats_env_var() {
        let tmp = tempfile::tempdir().unwrap();
        let flag = tmp.path().join("flag");
        let env = tmp.path().join("env");

        let dir = DataDir::resolve_with(Some(&flag), env_pointing_at(&env)).unwrap();
        assert_eq!(dir.root(), flag);
        assert!(!env.exists());
    }

    #[test]
    fn nested_path_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve_with(Some(&nested), |_| None).unwrap();

        assert!(dir.root().is_dir());
    }
}
