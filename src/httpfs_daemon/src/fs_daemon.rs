use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use chrono::{DateTime, Utc};
use httpfs_lib::{
    DirEntryKind, Directory, FsNode, HttpFs, HttpFsConfig, HttpFsError, HttpFsResult,
    RemoteFile,
};
use libc::{EBADF, EINVAL, EIO, EISDIR, ENOENT, ENOTDIR, EPERM, EROFS};
use log::{debug, error, info};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INODE: u64 = 1;
const DIR_PERM: u16 = 0o500;
const FILE_PERM: u16 = 0o400;
/// Slack on top of the HTTP timeout before an operation is abandoned.
const OP_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct FsDaemonRunOptions {
    pub mountpoint: PathBuf,
    pub config: HttpFsConfig,
    pub identity: MountIdentity,
}

/// Owner reported for every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl MountIdentity {
    pub fn current() -> Self {
        Self {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

/// What a file inode remembers between calls. A live `RemoteFile`, and with
/// it a read buffer, exists only while a handle is open.
#[derive(Clone)]
struct FileMeta {
    parent: Arc<Directory>,
    name: String,
    size: u64,
    mtime: Option<DateTime<Utc>>,
}

impl FileMeta {
    fn from_file(file: &RemoteFile) -> Option<Self> {
        Some(Self {
            parent: file.parent()?.clone(),
            name: file.name().to_string(),
            size: file.size(),
            mtime: file.mtime(),
        })
    }

    fn open(&self) -> Arc<RemoteFile> {
        RemoteFile::from_metadata(&self.parent, &self.name, self.size, self.mtime)
    }
}

#[derive(Clone)]
enum InodeNode {
    Directory(Arc<Directory>),
    File(FileMeta),
}

impl InodeNode {
    fn from_fs_node(node: FsNode) -> Result<Self, i32> {
        match node {
            FsNode::Directory(dir) => Ok(InodeNode::Directory(dir)),
            FsNode::File(file) => FileMeta::from_file(&file)
                .map(InodeNode::File)
                .ok_or(EIO),
        }
    }

    fn kind(&self) -> DirEntryKind {
        match self {
            InodeNode::Directory(_) => DirEntryKind::Directory,
            InodeNode::File(_) => DirEntryKind::File,
        }
    }

    fn size(&self) -> u64 {
        match self {
            InodeNode::Directory(_) => 0,
            InodeNode::File(meta) => meta.size,
        }
    }

    fn mtime(&self) -> Option<DateTime<Utc>> {
        match self {
            InodeNode::Directory(dir) => dir.mtime(),
            InodeNode::File(meta) => meta.mtime,
        }
    }
}

/// Stable inode numbers for remote paths, plus what was last learned about
/// each of them.
struct InodeTable {
    next_inode: AtomicU64,
    inode_to_path: RwLock<HashMap<u64, String>>,
    path_to_inode: RwLock<HashMap<String, u64>>,
    nodes: RwLock<HashMap<u64, InodeNode>>,
}

impl InodeTable {
    fn new(root: Arc<Directory>) -> Self {
        let mut inode_to_path = HashMap::new();
        let mut path_to_inode = HashMap::new();
        let mut nodes = HashMap::new();
        inode_to_path.insert(ROOT_INODE, "/".to_string());
        path_to_inode.insert("/".to_string(), ROOT_INODE);
        nodes.insert(ROOT_INODE, InodeNode::Directory(root));
        Self {
            next_inode: AtomicU64::new(ROOT_INODE + 1),
            inode_to_path: RwLock::new(inode_to_path),
            path_to_inode: RwLock::new(path_to_inode),
            nodes: RwLock::new(nodes),
        }
    }

    fn get_path(&self, inode: u64) -> Option<String> {
        self.inode_to_path.read().ok()?.get(&inode).cloned()
    }

    fn get_node(&self, inode: u64) -> Option<InodeNode> {
        self.nodes.read().ok()?.get(&inode).cloned()
    }

    fn remember_node(&self, inode: u64, node: InodeNode) {
        if let Ok(mut map) = self.nodes.write() {
            map.insert(inode, node);
        }
    }

    fn get_or_create(&self, path: &str) -> u64 {
        if let Ok(map) = self.path_to_inode.read() {
            if let Some(inode) = map.get(path) {
                return *inode;
            }
        }
        let mut path_to_inode = match self.path_to_inode.write() {
            Ok(v) => v,
            Err(_) => return self.next_inode.fetch_add(1, Ordering::SeqCst),
        };
        if let Some(inode) = path_to_inode.get(path) {
            return *inode;
        }
        let inode = self.next_inode.fetch_add(1, Ordering::SeqCst);
        path_to_inode.insert(path.to_string(), inode);
        if let Ok(mut map) = self.inode_to_path.write() {
            map.insert(inode, path.to_string());
        }
        inode
    }
}

/// Open files, keyed by handle. Each handle owns its own `RemoteFile`, so a
/// read buffer lives from open until release.
struct HandleTable {
    next_fh: AtomicU64,
    handles: Mutex<HashMap<u64, Arc<RemoteFile>>>,
}

impl HandleTable {
    fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, file: Arc<RemoteFile>) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut map) = self.handles.lock() {
            map.insert(fh, file);
        }
        fh
    }

    fn get(&self, fh: u64) -> Option<Arc<RemoteFile>> {
        self.handles.lock().ok()?.get(&fh).cloned()
    }

    fn remove(&self, fh: u64) -> Option<Arc<RemoteFile>> {
        self.handles.lock().ok()?.remove(&fh)
    }
}

pub struct FsDaemon {
    runtime: Runtime,
    fs: HttpFs,
    identity: MountIdentity,
    op_timeout: Duration,
    inode_table: InodeTable,
    handle_table: HandleTable,
}

impl FsDaemon {
    pub fn new(runtime: Runtime, fs: HttpFs, identity: MountIdentity, op_timeout: Duration) -> Self {
        let inode_table = InodeTable::new(fs.root().clone());
        Self {
            runtime,
            fs,
            identity,
            op_timeout,
            inode_table,
            handle_table: HandleTable::new(),
        }
    }

    /// Drives one core operation to completion. An operation that outlives
    /// `op_timeout` is dropped, which releases any node lock it held.
    fn run<T, F>(&self, fut: F) -> Result<T, i32>
    where
        F: Future<Output = HttpFsResult<T>>,
    {
        let op_timeout = self.op_timeout;
        self.runtime
            .block_on(async move {
                match tokio::time::timeout(op_timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(HttpFsError::Interrupted(format!(
                        "operation exceeded {:?}",
                        op_timeout
                    ))),
                }
            })
            .map_err(map_httpfs_err)
    }

    fn path_from_parent(&self, parent: u64, name: &str) -> Option<String> {
        let parent_path = self.inode_table.get_path(parent)?;
        if parent_path == "/" {
            Some(format!("/{}", name))
        } else {
            Some(format!("{}/{}", parent_path, name))
        }
    }

    /// Node for `ino`; inodes handed out by readdir but never looked up are
    /// resolved from their path.
    fn node_of(&self, ino: u64) -> Result<InodeNode, i32> {
        if let Some(node) = self.inode_table.get_node(ino) {
            return Ok(node);
        }
        let path = self.inode_table.get_path(ino).ok_or(ENOENT)?;
        let node = InodeNode::from_fs_node(self.run(self.fs.resolve(&path))?)?;
        self.inode_table.remember_node(ino, node.clone());
        Ok(node)
    }

    fn directory_of(&self, ino: u64) -> Result<Arc<Directory>, i32> {
        match self.node_of(ino)? {
            InodeNode::Directory(dir) => Ok(dir),
            InodeNode::File(_) => Err(ENOTDIR),
        }
    }

    pub(crate) fn lookup_entry(&self, parent: u64, name: &str) -> Result<(u64, FileAttr), i32> {
        let path = self.path_from_parent(parent, name).ok_or(ENOENT)?;
        let dir = self.directory_of(parent)?;
        let node = InodeNode::from_fs_node(self.run(dir.lookup(name))?)?;
        let inode = self.inode_table.get_or_create(&path);
        let attr = self.build_attr(inode, &node);
        self.inode_table.remember_node(inode, node);
        Ok((inode, attr))
    }

    pub(crate) fn getattr_entry(&self, ino: u64) -> Result<(u64, FileAttr), i32> {
        let node = self.node_of(ino)?;
        Ok((ino, self.build_attr(ino, &node)))
    }

    pub(crate) fn readdir_entries(
        &self,
        ino: u64,
        offset: i64,
    ) -> Result<Vec<(u64, FileType, String, i64)>, i32> {
        let path = self.inode_table.get_path(ino).ok_or(ENOENT)?;
        let dir = self.directory_of(ino)?;
        let mut entries = self.run(dir.list())?;
        // listings are unordered; offsets need a stable order
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = Vec::new();
        let mut idx: i64 = offset;
        if offset == 0 {
            out.push((ino, FileType::Directory, ".".to_string(), 1));
            out.push((ino, FileType::Directory, "..".to_string(), 2));
            idx = 2;
        }

        for entry in entries.into_iter().skip((idx - 2).max(0) as usize) {
            let child_path = if path == "/" {
                format!("/{}", entry.name)
            } else {
                format!("{}/{}", path, entry.name)
            };
            let inode = self.inode_table.get_or_create(&child_path);
            idx += 1;
            out.push((inode, file_type_of(entry.kind), entry.name, idx));
        }
        Ok(out)
    }

    fn build_attr(&self, inode: u64, node: &InodeNode) -> FileAttr {
        let kind = node.kind();
        let size = node.size();
        let mtime = node.mtime().map(SystemTime::from).unwrap_or(SystemTime::UNIX_EPOCH);
        let perm = match kind {
            DirEntryKind::Directory => DIR_PERM,
            DirEntryKind::File => FILE_PERM,
        };
        FileAttr {
            ino: inode,
            size,
            blocks: size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: file_type_of(kind),
            perm,
            nlink: 1,
            uid: self.identity.uid,
            gid: self.identity.gid,
            rdev: 0,
            flags: 0,
            blksize: 4096,
        }
    }

    pub(crate) fn open_file(&self, ino: u64, flags: i32) -> Result<u64, i32> {
        let accmode = flags & libc::O_ACCMODE;
        if accmode == libc::O_WRONLY || accmode == libc::O_RDWR {
            return Err(EROFS);
        }
        match self.node_of(ino)? {
            InodeNode::File(meta) => Ok(self.handle_table.insert(meta.open())),
            InodeNode::Directory(_) => Err(EISDIR),
        }
    }

    pub(crate) fn read_handle(&self, ino: u64, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>, i32> {
        if offset < 0 {
            return Err(EINVAL);
        }
        // without a handle the read goes through a throwaway file
        let node = match self.handle_table.get(fh) {
            Some(file) => FsNode::File(file),
            None => match self.node_of(ino)? {
                InodeNode::File(meta) => FsNode::File(meta.open()),
                InodeNode::Directory(dir) => FsNode::Directory(dir),
            },
        };
        debug!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);
        self.run(node.read(offset as u64, size))
    }

    pub(crate) fn release_handle(&self, fh: u64) -> Result<(), i32> {
        match self.handle_table.remove(fh) {
            Some(_) => Ok(()),
            None => Err(EBADF),
        }
    }

    #[cfg(test)]
    pub(crate) fn handle_file(&self, fh: u64) -> Option<Arc<RemoteFile>> {
        self.handle_table.get(fh)
    }
}

fn file_type_of(kind: DirEntryKind) -> FileType {
    match kind {
        DirEntryKind::Directory => FileType::Directory,
        DirEntryKind::File => FileType::RegularFile,
    }
}

impl Filesystem for FsDaemon {
    fn lookup(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &std::ffi::OsStr,
        reply: ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(v) => v,
            None => {
                reply.error(EINVAL);
                return;
            }
        };
        match self.lookup_entry(parent, name) {
            Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
            Err(code) => reply.error(code),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.getattr_entry(ino) {
            Ok((_ino, attr)) => reply.attr(&TTL, &attr),
            Err(code) => reply.error(code),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        match self.readdir_entries(ino, offset) {
            Ok(entries) => {
                for (inode, file_type, name, next_offset) in entries {
                    if reply.add(inode, next_offset, file_type, name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(code) => reply.error(code),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_file(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(code) => reply.error(code),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_handle(ino, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(code) => reply.error(code),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(code) => reply.error(code),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        reply.statfs(0, 0, 0, 0, 0, 512, 255, 0);
    }

    fn access(&mut self, _req: &Request<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }
}

fn map_httpfs_err(err: HttpFsError) -> i32 {
    match err {
        HttpFsError::NotFound(_) => ENOENT,
        HttpFsError::PermissionDenied(_) => EPERM,
        HttpFsError::IoError(_) => EIO,
        HttpFsError::IsDirectory(_) => EIO,
        HttpFsError::Interrupted(_) => EIO,
        HttpFsError::InvalidData(_) => EIO,
        HttpFsError::Internal(_) => EIO,
        HttpFsError::InvalidParam(_) => EINVAL,
        HttpFsError::UnsupportedListing(msg) => {
            // a server/config mismatch no retry can fix
            error!("unsupported directory response: {}, stopping", msg);
            std::process::exit(1);
        }
    }
}

pub fn read_json_config<T: DeserializeOwned>(path: &Path) -> HttpFsResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| HttpFsError::IoError(format!("read {} failed: {}", path.display(), e)))?;
    serde_json::from_str::<T>(&content)
        .map_err(|e| HttpFsError::InvalidParam(format!("parse {} failed: {}", path.display(), e)))
}

pub fn run_fs_daemon(options: FsDaemonRunOptions) -> HttpFsResult<()> {
    let runtime = Runtime::new().map_err(|e| HttpFsError::Internal(e.to_string()))?;
    let fs = HttpFs::new(&options.config)?;

    std::fs::create_dir_all(&options.mountpoint).map_err(|e| {
        HttpFsError::IoError(format!(
            "create mountpoint {} failed: {}",
            options.mountpoint.display(),
            e
        ))
    })?;

    let op_timeout = options.config.request_timeout + OP_TIMEOUT_MARGIN;
    let filesystem = FsDaemon::new(runtime, fs, options.identity, op_timeout);
    let mount_options = vec![
        MountOption::FSName("httpfs".to_string()),
        MountOption::RO,
        MountOption::DefaultPermissions,
    ];
    #[cfg(not(target_os = "macos"))]
    let mut mount_options = mount_options;
    #[cfg(not(target_os = "macos"))]
    mount_options.push(MountOption::AutoUnmount);
    info!(
        "mounting {} at {:?}, json={}",
        options.config.base_url, options.mountpoint, options.config.accept_json
    );
    match fuser::spawn_mount2(filesystem, &options.mountpoint, &mount_options) {
        Ok(session) => {
            println!("httpfs mounted at {:?}", options.mountpoint);
            session.join();
            Ok(())
        }
        Err(err) => Err(HttpFsError::IoError(format!("mount failed: {}", err))),
    }
}
