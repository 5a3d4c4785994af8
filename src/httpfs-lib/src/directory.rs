use crate::{
    parse_listing, DirectoryEntry, DirEntryKind, FsNode, HttpFsError, HttpFsResult,
    ListingFormat, Node, RemoteFile, RemoteOrigin,
};
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Names the desktop shells probe for on every mounted volume.
pub const IGNORED_NAMES: [&str; 5] = [
    "Backups.backupdb",
    "mach_kernel",
    ".DS_Store",
    ".hidden",
    "._.",
];
/// AppleDouble sidecar files.
pub const SIDECAR_PREFIX: &str = "._";

pub fn is_ignored_name(name: &str) -> bool {
    IGNORED_NAMES.contains(&name) || name.starts_with(SIDECAR_PREFIX)
}

#[derive(Default)]
struct ListingCache {
    // None until populated; a populated directory may hold zero entries.
    entries: Option<HashMap<String, DirectoryEntry>>,
    epoch: u64,
}

/// A remote directory with a lazily filled, wholesale replaced entry cache.
pub struct Directory {
    node: Node,
    mtime: Option<DateTime<Utc>>,
    cache: Mutex<ListingCache>,
}

impl Directory {
    pub fn new_root(origin: Arc<RemoteOrigin>) -> Arc<Self> {
        Arc::new(Self {
            node: Node::new(None, origin, ""),
            mtime: None,
            cache: Mutex::new(ListingCache::default()),
        })
    }

    pub fn new_child(
        parent: &Arc<Directory>,
        name: impl Into<String>,
        mtime: Option<DateTime<Utc>>,
    ) -> Arc<Self> {
        let origin = parent.node.origin().clone();
        Arc::new(Self {
            node: Node::new(Some(parent.clone()), origin, name),
            mtime,
            cache: Mutex::new(ListingCache::default()),
        })
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn fullpath(&self) -> String {
        self.node.fullpath()
    }

    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        self.mtime
    }

    pub async fn is_populated(&self) -> bool {
        self.cache.lock().await.entries.is_some()
    }

    fn listing_path(&self) -> String {
        if self.node.is_root() {
            String::new()
        } else {
            format!("{}/", self.fullpath())
        }
    }

    /// Fills the entry cache with one GET unless it is already filled.
    /// Callers are serialized on the cache lock, so concurrent callers of an
    /// empty directory share a single request.
    pub async fn populate(self: &Arc<Self>) -> HttpFsResult<()> {
        self.with_entries(|_| ()).await
    }

    async fn with_entries<T, F>(self: &Arc<Self>, f: F) -> HttpFsResult<T>
    where
        F: FnOnce(&HashMap<String, DirectoryEntry>) -> T,
    {
        let mut cache = self.cache.lock().await;
        if cache.entries.is_none() {
            if let Some((entries, format)) = self.fetch_listing().await? {
                cache.epoch += 1;
                cache.entries = Some(entries);
                if format == ListingFormat::Html {
                    self.schedule_expiry(cache.epoch);
                }
            }
        }
        let empty = HashMap::new();
        Ok(f(cache.entries.as_ref().unwrap_or(&empty)))
    }

    /// `Ok(None)` when the body could not be decoded; the failure is logged
    /// and the cache stays empty.
    async fn fetch_listing(
        &self,
    ) -> HttpFsResult<Option<(HashMap<String, DirectoryEntry>, ListingFormat)>> {
        let origin = self.node.origin();
        let path = self.listing_path();
        let mut req = origin.new_request(Method::GET, &path);
        if origin.accept_json() {
            req = req.header(ACCEPT, "application/json");
        }
        let resp = req.send().await.map_err(|e| {
            warn!("list {} failed: {}", path, e);
            HttpFsError::NotFound(format!("list {} failed: {}", path, e))
        })?;
        info!("{} {} {}", self.fullpath(), resp.url(), resp.status());

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(HttpFsError::from_http_status(status, path));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let format = ListingFormat::from_content_type(&content_type).map_err(|e| {
            error!("list {}: {}", path, e);
            e
        })?;

        let body = resp.bytes().await.map_err(|e| {
            warn!("read listing body of {} failed: {}", path, e);
            HttpFsError::NotFound(format!("read listing body of {} failed: {}", path, e))
        })?;
        let parsed = match parse_listing(format, &body) {
            Ok(v) => v,
            Err(err) => {
                warn!("parse listing of {} failed: {}", path, err);
                return Ok(None);
            }
        };

        let entries: HashMap<String, DirectoryEntry> = parsed
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        Ok(Some((entries, format)))
    }

    fn schedule_expiry(self: &Arc<Self>, epoch: u64) {
        let ttl = self.node.origin().listing_cache_ttl();
        let dir = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(dir) = dir.upgrade() {
                dir.expire(epoch).await;
            }
        });
    }

    async fn expire(&self, epoch: u64) {
        let mut cache = self.cache.lock().await;
        if cache.epoch != epoch {
            return;
        }
        if let Some(entries) = cache.entries.take() {
            debug!(
                "directory.reset({}): {} children",
                self.fullpath(),
                entries.len()
            );
        }
    }

    /// Drops the cached entries; the next access fetches the listing again.
    pub async fn reset(&self) {
        let mut cache = self.cache.lock().await;
        let size = cache.entries.take().map(|e| e.len()).unwrap_or(0);
        debug!("directory.reset({}): {} children", self.fullpath(), size);
    }

    /// Current entries, in no particular order.
    pub async fn list(self: &Arc<Self>) -> HttpFsResult<Vec<DirectoryEntry>> {
        self.with_entries(|entries| entries.values().cloned().collect())
            .await
    }

    /// Builds a fresh child node for `name`. A file child is probed with HEAD.
    pub async fn lookup(self: &Arc<Self>, name: &str) -> HttpFsResult<FsNode> {
        if is_ignored_name(name) {
            return Err(HttpFsError::NotFound(format!(
                "{} is ignored in {}",
                name,
                self.fullpath()
            )));
        }
        debug!("directory.lookup(name={}, path={})", name, self.fullpath());

        let entry = self
            .with_entries(|entries| entries.get(name).cloned())
            .await?
            .ok_or_else(|| {
                HttpFsError::NotFound(format!("{} not found in {}", name, self.fullpath()))
            })?;

        match entry.kind {
            DirEntryKind::Directory => Ok(FsNode::Directory(Directory::new_child(
                self,
                entry.name,
                entry.mod_time,
            ))),
            DirEntryKind::File => {
                let file = RemoteFile::open(self, &entry.name, entry.mod_time).await?;
                Ok(FsNode::File(file))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignored_names() {
        assert!(is_ignored_name(".DS_Store"));
        assert!(is_ignored_name("mach_kernel"));
        assert!(is_ignored_name("._readme.txt"));
        assert!(is_ignored_name("._."));
        assert!(!is_ignored_name("readme.txt"));
        assert!(!is_ignored_name(".bashrc"));
    }
}
