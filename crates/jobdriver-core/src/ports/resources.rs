//! RepositoryResources port - ファイル ⇔ リソースの変換パイプライン
//!
//! Parsing, validation and admission of the files a repository contains are
//! external. Workers only see the resources already managed for a
//! repository and apply/remove them one file at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::RepositoryRef;
use crate::domain::ResourceError;

/// A resource created from a repository file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub path: String,

    /// Hash of the file the resource was last applied from.
    pub hash: String,
}

/// A resource serialized for writing into a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedResource {
    pub path: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait RepositoryResources: Send + Sync {
    async fn list_managed(
        &self,
        target: &RepositoryRef,
    ) -> Result<Vec<ManagedResource>, ResourceError>;

    /// Create or update the resource backed by `path`.
    async fn apply(
        &self,
        target: &RepositoryRef,
        path: &str,
        data: &[u8],
        hash: &str,
    ) -> Result<(), ResourceError>;

    async fn remove(&self, target: &RepositoryRef, path: &str) -> Result<(), ResourceError>;

    /// Every resource of `namespace`, including unmanaged ones.
    async fn export(&self, namespace: &str) -> Result<Vec<ExportedResource>, ResourceError>;
}
