//! In-memory repository and resource backends.
//!
//! Used by tests and the CLI demo. Real backends (git, object storage,
//! cluster APIs) implement the same ports outside this crate.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{RepositoryError, ResourceError};
use crate::ports::{
    ExportedResource, FileEntry, ManagedResource, RepoGetter, Repository, RepositoryRef,
    RepositoryResources,
};

pub const DEFAULT_BRANCH: &str = "main";

/// Stable content hash (SipHash with fixed keys), hex encoded.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// One write or delete, as recorded by `InMemoryRepository`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub git_ref: String,
    pub path: String,
    pub message: String,
    pub deleted: bool,
}

#[derive(Debug, Default)]
struct RepoState {
    // ref -> path -> content
    branches: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    commits: Vec<Commit>,
    failing: BTreeSet<String>,
}

#[derive(Debug)]
pub struct InMemoryRepository {
    target: RepositoryRef,
    state: Mutex<RepoState>,
}

impl InMemoryRepository {
    pub fn new(target: RepositoryRef) -> Self {
        let mut state = RepoState::default();
        state.branches.insert(DEFAULT_BRANCH.to_string(), BTreeMap::new());
        Self {
            target,
            state: Mutex::new(state),
        }
    }

    /// Seed a file on the default branch without recording a commit.
    pub async fn seed(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().await;
        state
            .branches
            .entry(DEFAULT_BRANCH.to_string())
            .or_default()
            .insert(path.into(), data.into());
    }

    /// Make every operation touching `path` fail with a backend error.
    pub async fn fail_on(&self, path: impl Into<String>) {
        self.state.lock().await.failing.insert(path.into());
    }

    pub async fn commits(&self) -> Vec<Commit> {
        self.state.lock().await.commits.clone()
    }

    pub async fn file(&self, path: &str, git_ref: Option<&str>) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .branches
            .get(git_ref.unwrap_or(DEFAULT_BRANCH))
            .and_then(|files| files.get(path))
            .cloned()
    }

    fn backend_error(&self, message: impl Into<String>) -> RepositoryError {
        RepositoryError::Backend {
            repository: self.target.name.clone(),
            message: message.into(),
        }
    }

    fn check_path(&self, state: &RepoState, path: &str) -> Result<(), RepositoryError> {
        if state.failing.contains(path) {
            return Err(self.backend_error(format!("injected failure for {path}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn target(&self) -> &RepositoryRef {
        &self.target
    }

    async fn list(&self, git_ref: Option<&str>) -> Result<Vec<FileEntry>, RepositoryError> {
        let state = self.state.lock().await;
        let git_ref = git_ref.unwrap_or(DEFAULT_BRANCH);
        let files = state
            .branches
            .get(git_ref)
            .ok_or_else(|| self.backend_error(format!("unknown ref {git_ref}")))?;
        Ok(files
            .iter()
            .map(|(path, data)| FileEntry {
                path: path.clone(),
                hash: content_hash(data),
            })
            .collect())
    }

    async fn read(&self, path: &str, git_ref: Option<&str>) -> Result<Vec<u8>, RepositoryError> {
        let state = self.state.lock().await;
        self.check_path(&state, path)?;
        state
            .branches
            .get(git_ref.unwrap_or(DEFAULT_BRANCH))
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| RepositoryError::FileNotFound {
                repository: self.target.name.clone(),
                path: path.to_string(),
            })
    }

    async fn write(
        &self,
        path: &str,
        git_ref: Option<&str>,
        data: &[u8],
        message: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        self.check_path(&state, path)?;
        let git_ref = git_ref.unwrap_or(DEFAULT_BRANCH).to_string();

        // 新しいブランチはデフォルトブランチから分岐する
        if !state.branches.contains_key(&git_ref) {
            let base = state
                .branches
                .get(DEFAULT_BRANCH)
                .cloned()
                .unwrap_or_default();
            state.branches.insert(git_ref.clone(), base);
        }
        if let Some(files) = state.branches.get_mut(&git_ref) {
            files.insert(path.to_string(), data.to_vec());
        }
        state.commits.push(Commit {
            git_ref,
            path: path.to_string(),
            message: message.to_string(),
            deleted: false,
        });
        Ok(())
    }

    async fn delete(
        &self,
        path: &str,
        git_ref: Option<&str>,
        message: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        self.check_path(&state, path)?;
        let git_ref = git_ref.unwrap_or(DEFAULT_BRANCH).to_string();
        let removed = state
            .branches
            .get_mut(&git_ref)
            .and_then(|files| files.remove(path));
        if removed.is_none() {
            return Err(RepositoryError::FileNotFound {
                repository: self.target.name.clone(),
                path: path.to_string(),
            });
        }
        state.commits.push(Commit {
            git_ref,
            path: path.to_string(),
            message: message.to_string(),
            deleted: true,
        });
        Ok(())
    }
}

/// Fixed set of repositories, looked up by reference.
#[derive(Default)]
pub struct StaticRepoGetter {
    repos: HashMap<RepositoryRef, Arc<dyn Repository>>,
}

impl StaticRepoGetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, repo: Arc<dyn Repository>) -> Self {
        self.repos.insert(repo.target().clone(), repo);
        self
    }
}

#[async_trait]
impl RepoGetter for StaticRepoGetter {
    async fn as_repository(
        &self,
        target: &RepositoryRef,
    ) -> Result<Arc<dyn Repository>, RepositoryError> {
        self.repos
            .get(target)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(target.to_string()))
    }
}

#[derive(Debug, Clone)]
struct StoredResource {
    data: Vec<u8>,
    hash: String,
    // 管理元のリポジトリ名。None は手動で作られたリソース
    managed_by: Option<String>,
}

/// Resources keyed by (namespace, path). Files must be JSON to apply.
#[derive(Debug, Default)]
pub struct InMemoryResources {
    objects: Mutex<BTreeMap<(String, String), StoredResource>>,
}

impl InMemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource no repository manages yet.
    pub async fn insert_unmanaged(
        &self,
        namespace: impl Into<String>,
        path: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) {
        let data = data.into();
        self.objects.lock().await.insert(
            (namespace.into(), path.into()),
            StoredResource {
                hash: content_hash(&data),
                data,
                managed_by: None,
            },
        );
    }

    pub async fn get(&self, namespace: &str, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(&(namespace.to_string(), path.to_string()))
            .map(|r| r.data.clone())
    }

    pub async fn paths(&self, namespace: &str) -> Vec<String> {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

#[async_trait]
impl RepositoryResources for InMemoryResources {
    async fn list_managed(
        &self,
        target: &RepositoryRef,
    ) -> Result<Vec<ManagedResource>, ResourceError> {
        Ok(self
            .objects
            .lock()
            .await
            .iter()
            .filter(|((ns, _), r)| {
                *ns == target.namespace && r.managed_by.as_deref() == Some(target.name.as_str())
            })
            .map(|((_, path), r)| ManagedResource {
                path: path.clone(),
                hash: r.hash.clone(),
            })
            .collect())
    }

    async fn apply(
        &self,
        target: &RepositoryRef,
        path: &str,
        data: &[u8],
        hash: &str,
    ) -> Result<(), ResourceError> {
        serde_json::from_slice::<serde_json::Value>(data).map_err(|e| ResourceError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        self.objects.lock().await.insert(
            (target.namespace.clone(), path.to_string()),
            StoredResource {
                data: data.to_vec(),
                hash: hash.to_string(),
                managed_by: Some(target.name.clone()),
            },
        );
        Ok(())
    }

    async fn remove(&self, target: &RepositoryRef, path: &str) -> Result<(), ResourceError> {
        let mut objects = self.objects.lock().await;
        let key = (target.namespace.clone(), path.to_string());
        if objects
            .get(&key)
            .is_some_and(|r| r.managed_by.as_deref() == Some(target.name.as_str()))
        {
            objects.remove(&key);
        }
        Ok(())
    }

    async fn export(&self, namespace: &str) -> Result<Vec<ExportedResource>, ResourceError> {
        Ok(self
            .objects
            .lock()
            .await
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, path), r)| ExportedResource {
                path: path.clone(),
                data: r.data.clone(),
            })
            .collect())
    }
}
