use crate::{Directory, RemoteOrigin};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;

/// Query-escape set: everything except `A-Za-z0-9-_.~`. Space becomes `%20`.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Addressing part shared by directories and files.
///
/// `parent` points up the tree only; a directory never holds its children,
/// so the chain is acyclic and ends at the root.
pub struct Node {
    parent: Option<Arc<Directory>>,
    origin: Arc<RemoteOrigin>,
    name: String,
}

impl Node {
    pub(crate) fn new(
        parent: Option<Arc<Directory>>,
        origin: Arc<RemoteOrigin>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            parent,
            origin,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Directory>> {
        self.parent.as_ref()
    }

    pub fn origin(&self) -> &Arc<RemoteOrigin> {
        &self.origin
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Remote path of this node, relative to the origin base URL.
    pub fn fullpath(&self) -> String {
        node_fullpath(Some(self))
    }
}

/// `/`-joined, percent-encoded segments from the root down to `node`.
/// The root and a missing node both yield the empty path.
pub fn node_fullpath(node: Option<&Node>) -> String {
    let mut segments = Vec::new();
    let mut cursor = node;
    while let Some(n) = cursor {
        if !n.name.is_empty() {
            segments.push(encode_segment(&n.name));
        }
        cursor = n.parent.as_deref().map(|dir| dir.node());
    }
    segments.reverse();
    segments.join("/")
}

pub fn encode_segment(name: &str) -> String {
    utf8_percent_encode(name, PATH_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpFsConfig;

    fn origin() -> Arc<RemoteOrigin> {
        Arc::new(RemoteOrigin::new(&HttpFsConfig::default()).unwrap())
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("b c"), "b%20c");
        assert_eq!(encode_segment("a+b&c"), "a%2Bb%26c");
        assert_eq!(encode_segment("v1.2-rc_3~x"), "v1.2-rc_3~x");
        assert_eq!(encode_segment("ü"), "%C3%BC");
    }

    #[test]
    fn test_fullpath_three_levels() {
        let origin = origin();
        let root = Directory::new_root(origin);
        let a = Directory::new_child(&root, "a", None);
        let b = Directory::new_child(&a, "b c", None);
        let d = Directory::new_child(&b, "d", None);
        assert_eq!(root.fullpath(), "");
        assert_eq!(a.fullpath(), "a");
        assert_eq!(d.fullpath(), "a/b%20c/d");
    }

    #[test]
    fn test_fullpath_of_missing_node() {
        assert_eq!(node_fullpath(None), "");
    }
}
