// SPDX-License-Identifier: MPL-2.0

//! The in-memory filesystem behind the VFS server.
//!
//! Nodes are reference counted; hard links are just extra directory
//! entries sharing one node. Directory link counts follow the convention
//! `nlink == 1 + number of child subdirectories` (the self `.` plus one
//! per child's `..`).

use core::sync::atomic::{AtomicU64, Ordering};

use crate::ipc::wire::StatInfo;
use crate::prelude::*;
use crate::time;

/// Longest accepted file name, in bytes.
pub const NAME_MAX: usize = 255;

/// How many symlinks one resolution may traverse.
pub const SYMLINK_MAX_DEPTH: usize = 8;

/// The inode number of the root directory.
pub const ROOT_INO: u64 = 1;

/* File-type bits in the mode word. */
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

/// What a node is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    File,
    Dir,
    Symlink,
}

/// A volatile filesystem whose data and metadata exist only in memory.
pub struct RamFs {
    root: Arc<RamNode>,
    inode_allocator: AtomicU64,
}

/// One filesystem node.
#[derive(Debug)]
pub struct RamNode {
    ino: u64,
    typ: NodeType,
    node: SpinLock<Node>,
}

#[derive(Debug)]
struct Node {
    inner: Inner,
    meta: Metadata,
}

#[derive(Clone, Copy, Debug)]
struct Metadata {
    mode: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    size: u64,
    atime: u64,
    mtime: u64,
    ctime: u64,
}

impl Metadata {
    fn new(mode: u32, uid: u32, gid: u32, nlink: u32) -> Self {
        let now = time::now_secs();
        Metadata {
            mode,
            nlink,
            uid,
            gid,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

#[derive(Debug)]
enum Inner {
    File(Vec<u8>),
    Dir(DirEntries),
    Symlink(String),
}

#[derive(Debug)]
struct DirEntries {
    children: BTreeMap<String, Arc<RamNode>>,
    parent: Weak<RamNode>,
}

impl Inner {
    fn as_dir(&self) -> Option<&DirEntries> {
        match self {
            Inner::Dir(dir) => Some(dir),
            _ => None,
        }
    }

    fn as_dir_mut(&mut self) -> Option<&mut DirEntries> {
        match self {
            Inner::Dir(dir) => Some(dir),
            _ => None,
        }
    }

    fn as_file(&self) -> Option<&Vec<u8>> {
        match self {
            Inner::File(data) => Some(data),
            _ => None,
        }
    }

    fn as_file_mut(&mut self) -> Option<&mut Vec<u8>> {
        match self {
            Inner::File(data) => Some(data),
            _ => None,
        }
    }
}

impl RamNode {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn typ(&self) -> NodeType {
        self.typ
    }

    pub fn is_dir(&self) -> bool {
        self.typ == NodeType::Dir
    }

    /// Owner, group and permission bits.
    pub fn ownership(&self) -> (u32, u32, u32) {
        let node = self.node.lock();
        (node.meta.uid, node.meta.gid, node.meta.mode)
    }

    pub fn set_mode(&self, mode: u32) {
        let mut node = self.node.lock();
        node.meta.mode = mode & 0o7777;
        node.meta.ctime = time::now_secs();
    }

    pub fn set_owner(&self, uid: u32, gid: u32) {
        let mut node = self.node.lock();
        node.meta.uid = uid;
        node.meta.gid = gid;
        node.meta.ctime = time::now_secs();
    }

    pub fn nlink(&self) -> u32 {
        self.node.lock().meta.nlink
    }

    pub fn size(&self) -> u64 {
        let node = self.node.lock();
        match &node.inner {
            Inner::Dir(dir) => dir.children.len() as u64,
            _ => node.meta.size,
        }
    }

    /// The parent directory; the root is its own parent.
    pub fn parent(&self) -> Option<Arc<RamNode>> {
        self.node.lock().inner.as_dir().and_then(|d| d.parent.upgrade())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<RamNode>> {
        let node = self.node.lock();
        let dir = node.inner.as_dir().ok_or_else(|| Error::new(Errno::ENOTDIR))?;
        dir.children
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(Errno::ENOENT))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node
            .lock()
            .inner
            .as_dir()
            .is_some_and(|dir| dir.children.contains_key(name))
    }

    pub fn is_empty_dir(&self) -> bool {
        self.node
            .lock()
            .inner
            .as_dir()
            .is_some_and(|dir| dir.children.is_empty())
    }

    /// The symlink target, without following it.
    pub fn link_target(&self) -> Result<String> {
        let node = self.node.lock();
        match &node.inner {
            Inner::Symlink(target) => Ok(target.clone()),
            _ => Err(Error::new(Errno::EINVAL)),
        }
    }

    /// Copies out up to `buf.len()` bytes from `offset`. Returns the
    /// number read; zero at or past end of file.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut node = self.node.lock();
        node.meta.atime = time::now_secs();
        let data = node.inner.as_file().ok_or_else(|| Error::new(Errno::EISDIR))?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    /// Writes `data` at `offset`, growing the file (zero filled) as
    /// needed.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut node = self.node.lock();
        let now = time::now_secs();
        let file = node
            .inner
            .as_file_mut()
            .ok_or_else(|| Error::new(Errno::EISDIR))?;
        let offset = offset as usize;
        let end = offset + data.len();
        if end > file.len() {
            file.resize(end, 0);
        }
        file[offset..end].copy_from_slice(data);
        let new_size = file.len() as u64;
        node.meta.size = new_size;
        node.meta.mtime = now;
        Ok(data.len())
    }

    /// Grows (zero filled) or shrinks the file to `length` bytes.
    pub fn truncate(&self, length: u64) -> Result<()> {
        let mut node = self.node.lock();
        let now = time::now_secs();
        let file = node
            .inner
            .as_file_mut()
            .ok_or_else(|| Error::new(Errno::EISDIR))?;
        file.resize(length as usize, 0);
        node.meta.size = length;
        node.meta.mtime = now;
        Ok(())
    }

    /// Metadata in the wire shape.
    pub fn stat(&self) -> StatInfo {
        let node = self.node.lock();
        let type_bits = match self.typ {
            NodeType::File => S_IFREG,
            NodeType::Dir => S_IFDIR,
            NodeType::Symlink => S_IFLNK,
        };
        let size = match &node.inner {
            Inner::Dir(dir) => dir.children.len() as u64,
            _ => node.meta.size,
        };
        StatInfo {
            ino: self.ino,
            size,
            atime: node.meta.atime,
            mtime: node.meta.mtime,
            ctime: node.meta.ctime,
            mode: type_bits | (node.meta.mode & 0o7777),
            nlink: node.meta.nlink,
            uid: node.meta.uid,
            gid: node.meta.gid,
        }
    }
}

fn valid_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return_errno_with_message!(Errno::EINVAL, "reserved file name");
    }
    if name.len() > NAME_MAX {
        return_errno!(Errno::ENAMETOOLONG);
    }
    if name.contains('/') {
        return_errno_with_message!(Errno::EINVAL, "file name with a slash");
    }
    Ok(())
}

impl RamFs {
    pub fn new() -> Self {
        let root = Arc::new_cyclic(|weak_root: &Weak<RamNode>| RamNode {
            ino: ROOT_INO,
            typ: NodeType::Dir,
            node: SpinLock::new(Node {
                inner: Inner::Dir(DirEntries {
                    children: BTreeMap::new(),
                    parent: weak_root.clone(),
                }),
                meta: Metadata::new(0o755, 0, 0, 1),
            }),
        });
        RamFs {
            root,
            inode_allocator: AtomicU64::new(ROOT_INO + 1),
        }
    }

    pub fn root(&self) -> &Arc<RamNode> {
        &self.root
    }

    fn alloc_ino(&self) -> u64 {
        self.inode_allocator.fetch_add(1, Ordering::SeqCst)
    }

    /// Resolves `path` starting from `base` (ignored for absolute
    /// paths). `follow_last` decides whether a symlink in the final
    /// component is chased.
    pub fn resolve(
        &self,
        base: &Arc<RamNode>,
        path: &str,
        follow_last: bool,
    ) -> Result<Arc<RamNode>> {
        let mut depth = 0;
        self.resolve_inner(base, path, follow_last, &mut depth)
    }

    fn resolve_inner(
        &self,
        base: &Arc<RamNode>,
        path: &str,
        follow_last: bool,
        depth: &mut usize,
    ) -> Result<Arc<RamNode>> {
        let mut cur = if path.starts_with('/') {
            self.root.clone()
        } else {
            base.clone()
        };
        let components: Vec<&str> = path
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        for (i, comp) in components.iter().enumerate() {
            if !cur.is_dir() {
                return_errno!(Errno::ENOTDIR);
            }
            if *comp == ".." {
                cur = cur.parent().unwrap_or_else(|| self.root.clone());
                continue;
            }
            let child = cur.lookup(comp)?;
            let last = i + 1 == components.len();
            if child.typ() == NodeType::Symlink && (!last || follow_last) {
                *depth += 1;
                if *depth > SYMLINK_MAX_DEPTH {
                    return_errno_with_message!(Errno::ELOOP, "too many symlinks");
                }
                let target = child.link_target()?;
                cur = self.resolve_inner(&cur, &target, true, depth)?;
            } else {
                cur = child;
            }
        }
        Ok(cur)
    }

    /// Resolves everything but the last component. Returns the parent
    /// directory and the final name.
    pub fn resolve_parent(
        &self,
        base: &Arc<RamNode>,
        path: &str,
    ) -> Result<(Arc<RamNode>, String)> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            // The root has no parent entry to manipulate.
            return_errno_with_message!(Errno::EINVAL, "the root is not a directory entry");
        }
        let (dir_part, name) = match trimmed.rfind('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
            None => ("", trimmed),
        };
        valid_name(name)?;
        let parent = if dir_part.is_empty() {
            if path.starts_with('/') {
                self.root.clone()
            } else {
                base.clone()
            }
        } else {
            self.resolve(base, dir_part, true)?
        };
        if !parent.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        Ok((parent, name.to_string()))
    }

    fn new_node(&self, typ: NodeType, inner: Inner, mode: u32, uid: u32, gid: u32) -> Arc<RamNode> {
        let nlink = 1;
        Arc::new(RamNode {
            ino: self.alloc_ino(),
            typ,
            node: SpinLock::new(Node {
                inner,
                meta: Metadata::new(mode & 0o7777, uid, gid, nlink),
            }),
        })
    }

    /// Creates a regular file under `parent`.
    pub fn create_file(
        &self,
        parent: &Arc<RamNode>,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Arc<RamNode>> {
        valid_name(name)?;
        if parent.contains(name) {
            return_errno!(Errno::EEXIST);
        }
        let child = self.new_node(NodeType::File, Inner::File(Vec::new()), mode, uid, gid);
        self.attach(parent, name, child.clone());
        Ok(child)
    }

    /// Creates a directory under `parent`, bumping the parent's link
    /// count for the child's `..`.
    pub fn create_dir(
        &self,
        parent: &Arc<RamNode>,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<Arc<RamNode>> {
        valid_name(name)?;
        if parent.contains(name) {
            return_errno!(Errno::EEXIST);
        }
        let child = self.new_node(
            NodeType::Dir,
            Inner::Dir(DirEntries {
                children: BTreeMap::new(),
                parent: Arc::downgrade(parent),
            }),
            mode,
            uid,
            gid,
        );
        self.attach(parent, name, child.clone());
        parent.node.lock().meta.nlink += 1;
        Ok(child)
    }

    /// Creates a symlink to `target` under `parent`.
    pub fn create_symlink(
        &self,
        parent: &Arc<RamNode>,
        name: &str,
        target: &str,
        uid: u32,
        gid: u32,
    ) -> Result<Arc<RamNode>> {
        valid_name(name)?;
        if parent.contains(name) {
            return_errno!(Errno::EEXIST);
        }
        let child = self.new_node(
            NodeType::Symlink,
            Inner::Symlink(target.to_string()),
            0o777,
            uid,
            gid,
        );
        child.node.lock().meta.size = target.len() as u64;
        self.attach(parent, name, child.clone());
        Ok(child)
    }

    /// Adds a hard link `name` in `parent` to an existing file node.
    pub fn link(&self, parent: &Arc<RamNode>, name: &str, node: &Arc<RamNode>) -> Result<()> {
        valid_name(name)?;
        if node.is_dir() {
            return_errno_with_message!(Errno::EISDIR, "hard links to directories");
        }
        if parent.contains(name) {
            return_errno!(Errno::EEXIST);
        }
        node.node.lock().meta.nlink += 1;
        self.attach(parent, name, node.clone());
        Ok(())
    }

    /// Removes a non-directory entry; the node dies with its last link.
    pub fn unlink(&self, parent: &Arc<RamNode>, name: &str) -> Result<()> {
        let victim = parent.lookup(name)?;
        if victim.is_dir() {
            return_errno!(Errno::EISDIR);
        }
        self.detach(parent, name);
        victim.node.lock().meta.nlink -= 1;
        Ok(())
    }

    /// Removes an empty directory, dropping the parent's `..` link.
    pub fn rmdir(&self, parent: &Arc<RamNode>, name: &str) -> Result<()> {
        let victim = parent.lookup(name)?;
        if !victim.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        if !victim.is_empty_dir() {
            return_errno!(Errno::ENOTEMPTY);
        }
        self.detach(parent, name);
        victim.node.lock().meta.nlink -= 1;
        parent.node.lock().meta.nlink -= 1;
        Ok(())
    }

    /// Re-homes `old_name` in `old_parent` to `new_name` in
    /// `new_parent`. An existing target file is replaced; an existing
    /// target directory must be empty.
    pub fn rename(
        &self,
        old_parent: &Arc<RamNode>,
        old_name: &str,
        new_parent: &Arc<RamNode>,
        new_name: &str,
    ) -> Result<()> {
        valid_name(new_name)?;
        if !new_parent.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        let moving = old_parent.lookup(old_name)?;
        if let Ok(existing) = new_parent.lookup(new_name) {
            if Arc::ptr_eq(&existing, &moving) {
                return Ok(());
            }
            if existing.is_dir() {
                if !moving.is_dir() {
                    return_errno!(Errno::EISDIR);
                }
                self.rmdir(new_parent, new_name)?;
            } else {
                if moving.is_dir() {
                    return_errno!(Errno::ENOTDIR);
                }
                self.unlink(new_parent, new_name)?;
            }
        }
        self.detach(old_parent, old_name);
        self.attach(new_parent, new_name, moving.clone());
        if moving.is_dir() && !Arc::ptr_eq(old_parent, new_parent) {
            // The directory's `..` follows it.
            old_parent.node.lock().meta.nlink -= 1;
            new_parent.node.lock().meta.nlink += 1;
            if let Some(dir) = moving.node.lock().inner.as_dir_mut() {
                dir.parent = Arc::downgrade(new_parent);
            }
        }
        Ok(())
    }

    fn attach(&self, parent: &Arc<RamNode>, name: &str, child: Arc<RamNode>) {
        let mut node = parent.node.lock();
        let dir = node.inner.as_dir_mut().expect("attach to a non-directory");
        let prev = dir.children.insert(name.to_string(), child);
        debug_assert!(prev.is_none());
        node.meta.mtime = time::now_secs();
    }

    fn detach(&self, parent: &Arc<RamNode>, name: &str) {
        let mut node = parent.node.lock();
        let dir = node.inner.as_dir_mut().expect("detach from a non-directory");
        dir.children.remove(name);
        node.meta.mtime = time::now_secs();
    }

    /// Reconstructs an absolute path by walking parent links. Used by
    /// GETCWD.
    pub fn path_of(&self, node: &Arc<RamNode>) -> String {
        if Arc::ptr_eq(node, &self.root) {
            return "/".to_string();
        }
        let mut segments: Vec<String> = Vec::new();
        let mut cur = node.clone();
        while !Arc::ptr_eq(&cur, &self.root) {
            let Some(parent) = cur.parent() else { break };
            let guard = parent.node.lock();
            if let Some(dir) = guard.inner.as_dir() {
                if let Some((name, _)) = dir
                    .children
                    .iter()
                    .find(|(_, child)| Arc::ptr_eq(child, &cur))
                {
                    segments.push(name.clone());
                }
            }
            drop(guard);
            cur = parent;
        }
        let mut path = String::new();
        for segment in segments.iter().rev() {
            path.push('/');
            path.push_str(segment);
        }
        path
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fs() -> RamFs {
        RamFs::new()
    }

    #[test]
    fn directory_lifecycle_counts_links() {
        let fs = fs();
        let root = fs.root().clone();
        assert_eq!(root.nlink(), 1);
        let d = fs.create_dir(&root, "d", 0o755, 0, 0).unwrap();
        assert_eq!(root.nlink(), 2);
        fs.create_dir(&d, "e", 0o755, 0, 0).unwrap();
        assert_eq!(d.nlink(), 2);

        assert_eq!(
            fs.rmdir(&root, "d").unwrap_err().error(),
            Errno::ENOTEMPTY
        );
        fs.rmdir(&d, "e").unwrap();
        assert_eq!(d.nlink(), 1);
        fs.rmdir(&root, "d").unwrap();
        assert_eq!(root.nlink(), 1);
        assert_eq!(
            fs.resolve(&root, "/d", true).unwrap_err().error(),
            Errno::ENOENT
        );
    }

    #[test]
    fn files_grow_and_read_back() {
        let fs = fs();
        let root = fs.root().clone();
        let f = fs.create_file(&root, "a.txt", 0o644, 0, 0).unwrap();
        assert_eq!(f.write_at(0, b"hello").unwrap(), 5);
        assert_eq!(f.size(), 5);
        let mut buf = [0u8; 8];
        assert_eq!(f.read_at(0, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        // Reads at or past the end return zero bytes.
        assert_eq!(f.read_at(5, &mut buf).unwrap(), 0);
        assert_eq!(f.read_at(100, &mut buf).unwrap(), 0);
        // Sparse writes zero-fill the gap.
        f.write_at(8, b"x").unwrap();
        assert_eq!(f.size(), 9);
        let mut buf = [0xffu8; 4];
        f.read_at(5, &mut buf).unwrap();
        assert_eq!(&buf, &[0, 0, 0, b'x']);
    }

    #[test]
    fn hard_links_share_the_node() {
        let fs = fs();
        let root = fs.root().clone();
        let f = fs.create_file(&root, "a", 0o644, 0, 0).unwrap();
        fs.link(&root, "b", &f).unwrap();
        assert_eq!(f.nlink(), 2);
        let b = fs.resolve(&root, "/b", true).unwrap();
        assert_eq!(b.ino(), f.ino());
        fs.unlink(&root, "a").unwrap();
        assert_eq!(f.nlink(), 1);
        fs.unlink(&root, "b").unwrap();
        assert_eq!(f.nlink(), 0);
        // No entry references the node anymore.
        assert!(fs.resolve(&root, "/b", true).is_err());
    }

    #[test]
    fn hard_links_to_directories_are_refused() {
        let fs = fs();
        let root = fs.root().clone();
        let d = fs.create_dir(&root, "d", 0o755, 0, 0).unwrap();
        assert_eq!(
            fs.link(&root, "d2", &d).unwrap_err().error(),
            Errno::EISDIR
        );
    }

    #[test]
    fn dot_and_dotdot_resolve() {
        let fs = fs();
        let root = fs.root().clone();
        let d = fs.create_dir(&root, "d", 0o755, 0, 0).unwrap();
        let e = fs.create_dir(&d, "e", 0o755, 0, 0).unwrap();
        let via_dots = fs.resolve(&root, "/d/e/../e/./../../d/e", true).unwrap();
        assert_eq!(via_dots.ino(), e.ino());
        // `..` at the root stays at the root.
        let r = fs.resolve(&root, "/../..", true).unwrap();
        assert_eq!(r.ino(), ROOT_INO);
    }

    #[test]
    fn symlinks_follow_with_bounded_depth() {
        let fs = fs();
        let root = fs.root().clone();
        fs.create_dir(&root, "d", 0o755, 0, 0).unwrap();
        let f = fs.create_file(&root, "target", 0o644, 0, 0).unwrap();
        fs.create_symlink(&root, "s", "/target", 0, 0).unwrap();
        assert_eq!(fs.resolve(&root, "/s", true).unwrap().ino(), f.ino());
        // Unfollowed, the link itself comes back.
        assert_eq!(
            fs.resolve(&root, "/s", false).unwrap().typ(),
            NodeType::Symlink
        );
        // A cycle trips the depth limit.
        fs.create_symlink(&root, "l1", "/l2", 0, 0).unwrap();
        fs.create_symlink(&root, "l2", "/l1", 0, 0).unwrap();
        assert_eq!(
            fs.resolve(&root, "/l1", true).unwrap_err().error(),
            Errno::ELOOP
        );
    }

    #[test]
    fn rename_replaces_files_and_moves_directories() {
        let fs = fs();
        let root = fs.root().clone();
        let a = fs.create_dir(&root, "a", 0o755, 0, 0).unwrap();
        let b = fs.create_dir(&root, "b", 0o755, 0, 0).unwrap();
        let f = fs.create_file(&a, "f", 0o644, 0, 0).unwrap();
        f.write_at(0, b"data").unwrap();
        let g = fs.create_file(&b, "g", 0o644, 0, 0).unwrap();

        fs.rename(&a, "f", &b, "g").unwrap();
        assert!(a.lookup("f").is_err());
        let moved = b.lookup("g").unwrap();
        assert_eq!(moved.ino(), f.ino());
        assert_eq!(g.nlink(), 0);

        // Moving a directory updates `..` and both parents' counts.
        let sub = fs.create_dir(&a, "sub", 0o755, 0, 0).unwrap();
        assert_eq!(a.nlink(), 2);
        fs.rename(&a, "sub", &b, "sub").unwrap();
        assert_eq!(a.nlink(), 1);
        assert_eq!(b.nlink(), 2);
        assert_eq!(fs.resolve(&root, "/b/sub/..", true).unwrap().ino(), b.ino());
        let _ = sub;
    }

    #[test]
    fn path_reconstruction() {
        let fs = fs();
        let root = fs.root().clone();
        let d = fs.create_dir(&root, "home", 0o755, 0, 0).unwrap();
        let u = fs.create_dir(&d, "user", 0o755, 0, 0).unwrap();
        assert_eq!(fs.path_of(&u), "/home/user");
        assert_eq!(fs.path_of(&root), "/");
    }

    #[test]
    fn reserved_names_are_rejected() {
        let fs = fs();
        let root = fs.root().clone();
        assert!(fs.create_file(&root, ".", 0o644, 0, 0).is_err());
        assert!(fs.create_file(&root, "..", 0o644, 0, 0).is_err());
        assert!(fs.create_file(&root, "a/b", 0o644, 0, 0).is_err());
        let long = "x".repeat(NAME_MAX + 1);
        assert_eq!(
            fs.create_file(&root, &long, 0o644, 0, 0).unwrap_err().error(),
            Errno::ENAMETOOLONG
        );
    }
}
