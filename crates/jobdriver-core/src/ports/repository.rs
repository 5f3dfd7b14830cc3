//! Repository ports - 外部のリポジトリ実装（git, local, object storage）
//!
//! Only the surface the workers need: list / read / write / delete files at
//! an optional ref. Content backends live outside this crate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{JobRecord, RepositoryError};

/// Where a job points: repository `name` in `namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub namespace: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl From<&JobRecord> for RepositoryRef {
    fn from(job: &JobRecord) -> Self {
        Self::new(job.key.namespace.clone(), job.spec.repository.clone())
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A file in a repository tree. `hash` changes whenever content does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub hash: String,
}

#[async_trait]
pub trait Repository: Send + Sync {
    fn target(&self) -> &RepositoryRef;

    async fn list(&self, git_ref: Option<&str>) -> Result<Vec<FileEntry>, RepositoryError>;

    async fn read(&self, path: &str, git_ref: Option<&str>) -> Result<Vec<u8>, RepositoryError>;

    async fn write(
        &self,
        path: &str,
        git_ref: Option<&str>,
        data: &[u8],
        message: &str,
    ) -> Result<(), RepositoryError>;

    async fn delete(
        &self,
        path: &str,
        git_ref: Option<&str>,
        message: &str,
    ) -> Result<(), RepositoryError>;
}

/// Resolves a job's target into a repository handle.
#[async_trait]
pub trait RepoGetter: Send + Sync {
    async fn as_repository(
        &self,
        target: &RepositoryRef,
    ) -> Result<Arc<dyn Repository>, RepositoryError>;
}
