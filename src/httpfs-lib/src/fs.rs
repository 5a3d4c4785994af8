use crate::{
    DirEntryKind, Directory, HttpFsConfig, HttpFsError, HttpFsResult, RemoteFile, RemoteOrigin,
};
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use std::sync::Arc;

/// A node handed out by lookups.
#[derive(Clone)]
pub enum FsNode {
    Directory(Arc<Directory>),
    File(Arc<RemoteFile>),
}

impl FsNode {
    pub fn kind(&self) -> DirEntryKind {
        match self {
            FsNode::Directory(_) => DirEntryKind::Directory,
            FsNode::File(_) => DirEntryKind::File,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FsNode::Directory(dir) => dir.name(),
            FsNode::File(file) => file.name(),
        }
    }

    pub fn fullpath(&self) -> String {
        match self {
            FsNode::Directory(dir) => dir.fullpath(),
            FsNode::File(file) => file.fullpath(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            FsNode::Directory(_) => 0,
            FsNode::File(file) => file.size(),
        }
    }

    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        match self {
            FsNode::Directory(dir) => dir.mtime(),
            FsNode::File(file) => file.mtime(),
        }
    }

    pub fn as_directory(&self) -> Option<&Arc<Directory>> {
        match self {
            FsNode::Directory(dir) => Some(dir),
            FsNode::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<RemoteFile>> {
        match self {
            FsNode::Directory(_) => None,
            FsNode::File(file) => Some(file),
        }
    }

    /// Reads from a file node; directory reads are rejected.
    pub async fn read(&self, offset: u64, len: u32) -> HttpFsResult<Vec<u8>> {
        match self {
            FsNode::File(file) => file.read(offset, len).await,
            FsNode::Directory(dir) => Err(HttpFsError::IsDirectory(format!(
                "read on directory {}",
                dir.fullpath()
            ))),
        }
    }
}

impl std::fmt::Debug for FsNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsNode::Directory(dir) => write!(f, "Directory({:?})", dir.fullpath()),
            FsNode::File(file) => write!(f, "File({:?}, size={})", file.fullpath(), file.size()),
        }
    }
}

/// Composition root: owns the shared origin and the root directory.
pub struct HttpFs {
    origin: Arc<RemoteOrigin>,
    root: Arc<Directory>,
}

impl HttpFs {
    pub fn new(config: &HttpFsConfig) -> HttpFsResult<Self> {
        let origin = Arc::new(RemoteOrigin::new(config)?);
        info!("httpfs origin {}", origin.base_url());
        let root = Directory::new_root(origin.clone());
        Ok(Self { origin, root })
    }

    pub fn root(&self) -> &Arc<Directory> {
        &self.root
    }

    pub fn origin(&self) -> &Arc<RemoteOrigin> {
        &self.origin
    }

    pub fn new_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.origin.new_request(method, path)
    }

    /// Walks `/`-separated, unencoded names from the root, one lookup per
    /// segment.
    pub async fn resolve(&self, path: &str) -> HttpFsResult<FsNode> {
        let mut current = FsNode::Directory(self.root.clone());
        for name in path.split('/').filter(|s| !s.is_empty()) {
            let dir = current.as_directory().cloned().ok_or_else(|| {
                HttpFsError::NotFound(format!("{} is not a directory", current.fullpath()))
            })?;
            current = dir.lookup(name).await?;
        }
        Ok(current)
    }
}
