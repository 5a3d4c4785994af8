use crate::{Directory, HttpFsError, HttpFsResult, Node};
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One contiguous window of remote bytes, `data[0]` being remote offset `start`.
#[derive(Default)]
struct ReadBuffer {
    start: u64,
    data: Vec<u8>,
}

impl ReadBuffer {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn covers(&self, offset: u64, end: u64) -> bool {
        self.start <= offset && end <= self.end()
    }

    /// Bytes of `[offset, end)` held by the buffer, possibly fewer than asked.
    fn copy_range(&self, offset: u64, end: u64) -> Vec<u8> {
        if offset < self.start || offset >= self.end() {
            return Vec::new();
        }
        let from = (offset - self.start) as usize;
        let to = (end.min(self.end()) - self.start) as usize;
        self.data[from..to].to_vec()
    }
}

/// A remote file served through a read-ahead buffer refilled with range
/// requests.
pub struct RemoteFile {
    node: Node,
    size: u64,
    mtime: Option<DateTime<Utc>>,
    buffer: Mutex<ReadBuffer>,
}

impl RemoteFile {
    /// Probes the file with HEAD. A missing or unparsable `Content-Length`
    /// leaves the size at zero.
    pub async fn open(
        parent: &Arc<Directory>,
        name: &str,
        mtime: Option<DateTime<Utc>>,
    ) -> HttpFsResult<Arc<Self>> {
        let origin = parent.node().origin().clone();
        let node = Node::new(Some(parent.clone()), origin, name);
        let path = node.fullpath();

        let resp = node
            .origin()
            .new_request(Method::HEAD, &path)
            .send()
            .await
            .map_err(|e| {
                warn!("head {} failed: {}", path, e);
                HttpFsError::NotFound(format!("head {} failed: {}", path, e))
            })?;
        if resp.status() != StatusCode::OK {
            return Err(HttpFsError::from_http_status(resp.status(), path));
        }
        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        debug!("file.open(path={}, size={})", path, size);

        Ok(Self::with_node(node, size, mtime))
    }

    /// Rebuilds a file whose size is already known, without probing the
    /// origin. The read buffer starts empty.
    pub fn from_metadata(
        parent: &Arc<Directory>,
        name: &str,
        size: u64,
        mtime: Option<DateTime<Utc>>,
    ) -> Arc<Self> {
        let origin = parent.node().origin().clone();
        Self::with_node(Node::new(Some(parent.clone()), origin, name), size, mtime)
    }

    fn with_node(node: Node, size: u64, mtime: Option<DateTime<Utc>>) -> Arc<Self> {
        Arc::new(Self {
            node,
            size,
            mtime,
            buffer: Mutex::new(ReadBuffer::default()),
        })
    }

    pub fn parent(&self) -> Option<&Arc<Directory>> {
        self.node.parent()
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

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        self.mtime
    }

    /// Reads `[offset, offset + len)`. A buffer hit does no I/O; a miss
    /// replaces the buffer with one ranged GET of `len * prefetch_multiplier`
    /// bytes starting at `offset`. Reads on the same file are serialized.
    pub async fn read(&self, offset: u64, len: u32) -> HttpFsResult<Vec<u8>> {
        let mut end = offset.saturating_add(len as u64);
        if self.size > 0 {
            if offset >= self.size {
                return Ok(Vec::new());
            }
            end = end.min(self.size);
        }
        if end <= offset {
            return Ok(Vec::new());
        }

        let mut buffer = self.buffer.lock().await;
        if buffer.covers(offset, end) {
            return Ok(buffer.copy_range(offset, end));
        }

        let path = self.fullpath();
        let window = (len as u64).saturating_mul(self.node.origin().prefetch_multiplier());
        let range_end = offset.saturating_add(window) - 1;
        debug!(
            "file.read(file={}, start={}, end={}, fetch_end={})",
            path,
            offset,
            end - 1,
            range_end
        );

        let resp = self
            .node
            .origin()
            .new_request(Method::GET, &path)
            .header(RANGE, format!("bytes={}-{}", offset, range_end))
            .send()
            .await
            .map_err(|e| {
                warn!("range get {} failed: {}", path, e);
                HttpFsError::IoError(format!("range get {} failed: {}", path, e))
            })?;

        let start = match resp.status() {
            StatusCode::PARTIAL_CONTENT => resp
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_start)
                .unwrap_or(offset),
            // the server ignored Range and sent the whole body
            StatusCode::OK => 0,
            status => {
                warn!("{} {}", path, status);
                return Err(HttpFsError::IoError(format!(
                    "range get {}: HTTP {}",
                    path, status
                )));
            }
        };
        let data = resp.bytes().await.map_err(|e| {
            HttpFsError::IoError(format!("read body of {} failed: {}", path, e))
        })?;

        *buffer = ReadBuffer {
            start,
            data: data.to_vec(),
        };
        Ok(buffer.copy_range(offset, end))
    }
}

/// First offset of a `Content-Range: bytes <first>-<last>/<total>` value.
fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (first, _) = range.split_once('-')?;
    first.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_buffer_bounds() {
        let buffer = ReadBuffer {
            start: 100,
            data: (0u8..50).collect(),
        };
        assert!(buffer.covers(100, 150));
        assert!(buffer.covers(120, 130));
        assert!(!buffer.covers(99, 110));
        assert!(!buffer.covers(140, 151));
        assert_eq!(buffer.copy_range(110, 113), vec![10, 11, 12]);
        assert_eq!(buffer.copy_range(145, 160), vec![45, 46, 47, 48, 49]);
        assert!(buffer.copy_range(150, 160).is_empty());
        assert!(buffer.copy_range(10, 20).is_empty());
    }

    #[test]
    fn test_empty_buffer_covers_nothing() {
        let buffer = ReadBuffer::default();
        assert!(!buffer.covers(0, 1));
    }

    #[test]
    fn test_parse_content_range_start() {
        assert_eq!(parse_content_range_start("bytes 100-199/1000"), Some(100));
        assert_eq!(parse_content_range_start("bytes 0-0/*"), Some(0));
        assert_eq!(parse_content_range_start("items 1-2/3"), None);
        assert_eq!(parse_content_range_start("bytes */1000"), None);
    }
}
