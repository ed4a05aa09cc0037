// SPDX-License-Identifier: MPL-2.0

//! The VFS server (PID 2).
//!
//! Owns the ramfs tree, every file-descriptor table in the system and
//! each process's working directory. Requests arrive as messages in the
//! 100-199 range; the caller is always `msg.source`, which the kernel
//! stamped. The PM announces forks, credential changes and exits through
//! the trusted 113-115 control messages.

pub mod ramfs;

use hashbrown::HashMap;

use self::ramfs::{NodeType, RamFs, RamNode};
use crate::ipc::wire::*;
use crate::ipc::{msg, Message};
use crate::prelude::*;
use crate::process::{Pid, PM_PID};

/// Per-process limit on open descriptors.
pub const OPEN_MAX: usize = 32;

/// Descriptors 0-2 are reserved for the standard streams; fresh ones
/// start here.
const FIRST_FREE_FD: usize = 3;

struct FileDesc {
    node: Arc<RamNode>,
    offset: u64,
    flags: i32,
}

impl FileDesc {
    fn readable(&self) -> bool {
        matches!(self.flags & O_ACCMODE, O_RDONLY | O_RDWR)
    }

    fn writable(&self) -> bool {
        matches!(self.flags & O_ACCMODE, O_WRONLY | O_RDWR)
    }
}

#[derive(Default)]
struct FdTable {
    slots: Vec<Option<FileDesc>>,
}

impl FdTable {
    fn new() -> Self {
        FdTable { slots: Vec::new() }
    }

    fn get(&self, fd: i32) -> Result<&FileDesc> {
        usize::try_from(fd)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| Error::new(Errno::EBADF))
    }

    fn get_mut(&mut self, fd: i32) -> Result<&mut FileDesc> {
        usize::try_from(fd)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::new(Errno::EBADF))
    }

    /// Installs `desc` at the lowest free slot from 3 upward.
    fn install(&mut self, desc: FileDesc) -> Result<i32> {
        if self.slots.len() < FIRST_FREE_FD {
            self.slots.resize_with(FIRST_FREE_FD, || None);
        }
        for (i, slot) in self.slots.iter_mut().enumerate().skip(FIRST_FREE_FD) {
            if slot.is_none() {
                *slot = Some(desc);
                return Ok(i as i32);
            }
        }
        if self.slots.len() >= OPEN_MAX {
            return_errno!(Errno::EMFILE);
        }
        self.slots.push(Some(desc));
        Ok((self.slots.len() - 1) as i32)
    }

    fn install_at(&mut self, fd: usize, desc: FileDesc) -> Result<()> {
        if fd >= OPEN_MAX {
            return_errno!(Errno::EMFILE);
        }
        if self.slots.len() <= fd {
            self.slots.resize_with(fd + 1, || None);
        }
        self.slots[fd] = Some(desc);
        Ok(())
    }

    fn close(&mut self, fd: i32) -> Result<()> {
        let slot = usize::try_from(fd)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| Error::new(Errno::EBADF))?;
        if slot.take().is_none() {
            return_errno!(Errno::EBADF);
        }
        Ok(())
    }

    fn duplicate(&self) -> FdTable {
        FdTable {
            slots: self
                .slots
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|d| FileDesc {
                        node: d.node.clone(),
                        offset: d.offset,
                        flags: d.flags,
                    })
                })
                .collect(),
        }
    }
}

/// The server state machine.
pub struct VfsServer {
    fs: RamFs,
    tables: HashMap<Pid, FdTable>,
    cwds: HashMap<Pid, Arc<RamNode>>,
    creds: HashMap<Pid, (u32, u32)>,
}

impl VfsServer {
    /// A fresh server with the boot directories in place.
    pub fn new() -> Self {
        let fs = RamFs::new();
        let root = fs.root().clone();
        for dir in ["dev", "tmp", "etc"] {
            fs.create_dir(&root, dir, 0o755, 0, 0)
                .expect("boot directory creation cannot collide");
        }
        VfsServer {
            fs,
            tables: HashMap::new(),
            cwds: HashMap::new(),
            creds: HashMap::new(),
        }
    }

    /// Handles one request; `None` means no reply goes back (replies to
    /// us, and trusted notices, are consumed silently).
    pub fn handle(&mut self, msg: &Message) -> Option<Message> {
        if msg::is_reply(msg.mtype) {
            return None;
        }
        let caller = msg.source;
        match msg.mtype {
            msg::VFS_INHERIT => {
                if caller == PM_PID {
                    if let Ok(req) = msg.decode::<InheritRequest>() {
                        self.inherit(req);
                    }
                }
                None
            }
            msg::VFS_SETCREDS => {
                if caller == PM_PID {
                    if let Ok(req) = msg.decode::<SetCredsRequest>() {
                        self.creds.insert(req.pid, (req.uid, req.gid));
                    }
                }
                None
            }
            msg::VFS_RELEASE => {
                if caller == PM_PID {
                    if let Ok(req) = msg.decode::<ReleaseRequest>() {
                        self.release(req.pid);
                    }
                }
                None
            }
            _ => Some(self.dispatch(caller, msg)),
        }
    }

    fn dispatch(&mut self, caller: Pid, msg: &Message) -> Message {
        match msg.mtype {
            msg::VFS_OPEN => self.reply_value(msg, |s, m| {
                let req: OpenRequest = m.decode()?;
                s.do_open(caller, req).map(i64::from)
            }),
            msg::VFS_CLOSE => self.reply_value(msg, |s, m| {
                let req: CloseRequest = m.decode()?;
                s.do_close(caller, req).map(|_| 0)
            }),
            msg::VFS_READ => {
                let resp = msg
                    .decode::<ReadRequest>()
                    .and_then(|req| self.do_read(caller, req));
                match resp {
                    Ok(resp) => Message::with_payload(msg::VFS_REPLY, &resp),
                    Err(e) => Message::with_payload(msg::VFS_REPLY, &ReadResponse::err(e.error())),
                }
            }
            msg::VFS_WRITE => self.reply_value(msg, |s, m| {
                let req: WriteRequest = m.decode()?;
                s.do_write(caller, req)
            }),
            msg::VFS_LSEEK => self.reply_value(msg, |s, m| {
                let req: LseekRequest = m.decode()?;
                s.do_lseek(caller, req)
            }),
            msg::VFS_STAT => {
                let resp = msg
                    .decode::<PathRequest>()
                    .and_then(|req| self.do_stat(caller, req));
                match resp {
                    Ok(stat) => Message::with_payload(msg::VFS_REPLY, &StatResponse::ok(stat)),
                    Err(e) => Message::with_payload(msg::VFS_REPLY, &StatResponse::err(e.error())),
                }
            }
            msg::VFS_FSTAT => {
                let resp = msg
                    .decode::<FdRequest>()
                    .and_then(|req| self.do_fstat(caller, req));
                match resp {
                    Ok(stat) => Message::with_payload(msg::VFS_REPLY, &StatResponse::ok(stat)),
                    Err(e) => Message::with_payload(msg::VFS_REPLY, &StatResponse::err(e.error())),
                }
            }
            msg::VFS_ACCESS => self.reply_value(msg, |s, m| {
                let req: AccessRequest = m.decode()?;
                s.do_access(caller, req).map(|_| 0)
            }),
            msg::VFS_DUP => self.reply_value(msg, |s, m| {
                let req: FdRequest = m.decode()?;
                s.do_dup(caller, req.fd).map(i64::from)
            }),
            msg::VFS_DUP2 => self.reply_value(msg, |s, m| {
                let req: Dup2Request = m.decode()?;
                s.do_dup2(caller, req).map(i64::from)
            }),
            msg::VFS_MKDIR => self.reply_value(msg, |s, m| {
                let req: MkdirRequest = m.decode()?;
                s.do_mkdir(caller, req).map(|_| 0)
            }),
            msg::VFS_RMDIR => self.reply_value(msg, |s, m| {
                let req: PathRequest = m.decode()?;
                s.do_rmdir(caller, req).map(|_| 0)
            }),
            msg::VFS_UNLINK => self.reply_value(msg, |s, m| {
                let req: PathRequest = m.decode()?;
                s.do_unlink(caller, req).map(|_| 0)
            }),
            msg::VFS_RENAME => self.reply_value(msg, |s, m| {
                let req: TwoPathRequest = m.decode()?;
                s.do_rename(caller, req).map(|_| 0)
            }),
            msg::VFS_LINK => self.reply_value(msg, |s, m| {
                let req: TwoPathRequest = m.decode()?;
                s.do_link(caller, req).map(|_| 0)
            }),
            msg::VFS_SYMLINK => self.reply_value(msg, |s, m| {
                let req: TwoPathRequest = m.decode()?;
                s.do_symlink(caller, req).map(|_| 0)
            }),
            msg::VFS_READLINK => {
                let resp = msg
                    .decode::<PathRequest>()
                    .and_then(|req| self.do_readlink(caller, req));
                match resp {
                    Ok(target) => match PathResponse::ok(&target) {
                        Ok(resp) => Message::with_payload(msg::VFS_REPLY, &resp),
                        Err(e) => {
                            Message::with_payload(msg::VFS_REPLY, &PathResponse::err(e.error()))
                        }
                    },
                    Err(e) => Message::with_payload(msg::VFS_REPLY, &PathResponse::err(e.error())),
                }
            }
            msg::VFS_TRUNCATE => self.reply_value(msg, |s, m| {
                let req: TruncateRequest = m.decode()?;
                s.do_truncate(caller, req).map(|_| 0)
            }),
            msg::VFS_FTRUNCATE => self.reply_value(msg, |s, m| {
                let req: FtruncateRequest = m.decode()?;
                s.do_ftruncate(caller, req).map(|_| 0)
            }),
            msg::VFS_CHDIR => self.reply_value(msg, |s, m| {
                let req: PathRequest = m.decode()?;
                s.do_chdir(caller, req).map(|_| 0)
            }),
            msg::VFS_GETCWD => {
                let cwd = self.cwd(caller);
                let path = self.fs.path_of(&cwd);
                match PathResponse::ok(&path) {
                    Ok(resp) => Message::with_payload(msg::VFS_REPLY, &resp),
                    Err(e) => Message::with_payload(msg::VFS_REPLY, &PathResponse::err(e.error())),
                }
            }
            msg::VFS_CHMOD => self.reply_value(msg, |s, m| {
                let req: ChmodRequest = m.decode()?;
                s.do_chmod(caller, req).map(|_| 0)
            }),
            msg::VFS_CHOWN => self.reply_value(msg, |s, m| {
                let req: ChownRequest = m.decode()?;
                s.do_chown(caller, req).map(|_| 0)
            }),
            // Declared but not implemented: say so rather than invent
            // semantics.
            msg::VFS_IOCTL | msg::VFS_FCNTL => {
                Message::with_payload(msg::VFS_ERROR, &GenericResponse::err(Errno::ENOSYS))
            }
            _ => Message::with_payload(msg::VFS_ERROR, &GenericResponse::err(Errno::ENOSYS)),
        }
    }

    fn reply_value(
        &mut self,
        msg: &Message,
        f: impl FnOnce(&mut Self, &Message) -> Result<i64>,
    ) -> Message {
        match f(self, msg) {
            Ok(value) => Message::with_payload(msg::VFS_REPLY, &GenericResponse::ok(value)),
            Err(e) => Message::with_payload(msg::VFS_REPLY, &GenericResponse::err(e.error())),
        }
    }

    /* ---- per-process state ---- */

    fn cwd(&self, pid: Pid) -> Arc<RamNode> {
        self.cwds
            .get(&pid)
            .cloned()
            .unwrap_or_else(|| self.fs.root().clone())
    }

    fn caller_creds(&self, pid: Pid) -> (u32, u32) {
        self.creds.get(&pid).copied().unwrap_or((0, 0))
    }

    fn table(&mut self, pid: Pid) -> &mut FdTable {
        self.tables.entry(pid).or_insert_with(FdTable::new)
    }

    fn inherit(&mut self, req: InheritRequest) {
        let table = self
            .tables
            .get(&req.parent)
            .map(|t| t.duplicate())
            .unwrap_or_default();
        self.tables.insert(req.child, table);
        let cwd = self.cwd(req.parent);
        self.cwds.insert(req.child, cwd);
        self.creds.insert(req.child, (req.uid, req.gid));
    }

    fn release(&mut self, pid: Pid) {
        self.tables.remove(&pid);
        self.cwds.remove(&pid);
        self.creds.remove(&pid);
    }

    #[cfg(test)]
    pub(crate) fn has_state_for(&self, pid: Pid) -> bool {
        self.tables.contains_key(&pid)
            || self.cwds.contains_key(&pid)
            || self.creds.contains_key(&pid)
    }

    /// Classic owner/group/other permission check.
    fn check_access(&self, pid: Pid, node: &Arc<RamNode>, read: bool, write: bool, exec: bool) -> Result<()> {
        let (uid, gid) = self.caller_creds(pid);
        if uid == 0 {
            return Ok(());
        }
        let (owner, group, mode) = node.ownership();
        let shift = if uid == owner {
            6
        } else if gid == group {
            3
        } else {
            0
        };
        let bits = (mode >> shift) & 0o7;
        if read && bits & 0o4 == 0 {
            return_errno!(Errno::EACCES);
        }
        if write && bits & 0o2 == 0 {
            return_errno!(Errno::EACCES);
        }
        if exec && bits & 0o1 == 0 {
            return_errno!(Errno::EACCES);
        }
        Ok(())
    }

    /* ---- operations ---- */

    fn do_open(&mut self, caller: Pid, req: OpenRequest) -> Result<i32> {
        let path = req.path.as_str()?;
        let base = self.cwd(caller);
        let (uid, gid) = self.caller_creds(caller);
        let wants_write = matches!(req.flags & O_ACCMODE, O_WRONLY | O_RDWR);

        let node = match self.fs.resolve(&base, path, true) {
            Ok(node) => {
                if req.flags & O_CREAT != 0 && req.flags & O_EXCL != 0 {
                    return_errno!(Errno::EEXIST);
                }
                node
            }
            Err(e) if e.error() == Errno::ENOENT && req.flags & O_CREAT != 0 => {
                let (parent, name) = self.fs.resolve_parent(&base, path)?;
                self.check_access(caller, &parent, false, true, false)?;
                self.fs.create_file(&parent, &name, req.mode, uid, gid)?
            }
            Err(e) => return Err(e),
        };

        if node.is_dir() && wants_write {
            return_errno!(Errno::EISDIR);
        }
        self.check_access(
            caller,
            &node,
            matches!(req.flags & O_ACCMODE, O_RDONLY | O_RDWR),
            wants_write,
            false,
        )?;
        if req.flags & O_TRUNC != 0 && node.typ() == NodeType::File && wants_write {
            node.truncate(0)?;
        }

        self.table(caller).install(FileDesc {
            node,
            offset: 0,
            flags: req.flags,
        })
    }

    fn do_close(&mut self, caller: Pid, req: CloseRequest) -> Result<()> {
        let owner = if req.on_behalf_of == -1 {
            caller
        } else {
            // Only the PM closes descriptors on another's behalf.
            if caller != PM_PID {
                return_errno!(Errno::EPERM);
            }
            req.on_behalf_of
        };
        self.table(owner).close(req.fd)
    }

    fn do_read(&mut self, caller: Pid, req: ReadRequest) -> Result<ReadResponse> {
        let count = req.count as usize;
        if count > INLINE_DATA_MAX {
            return_errno_with_message!(Errno::EINVAL, "transfer too large for the inline path");
        }
        let table = self.table(caller);
        let desc = table.get_mut(req.fd)?;
        if !desc.readable() {
            return_errno!(Errno::EBADF);
        }
        if desc.node.is_dir() {
            return_errno!(Errno::EISDIR);
        }
        let mut buf = [0u8; INLINE_DATA_MAX];
        let (offset, advance) = match req.offset {
            -1 => (desc.offset, true),
            off if off >= 0 => (off as u64, false),
            _ => return_errno!(Errno::EINVAL),
        };
        let n = desc.node.read_at(offset, &mut buf[..count])?;
        if advance {
            desc.offset += n as u64;
        }
        Ok(ReadResponse::ok(&buf[..n]))
    }

    fn do_write(&mut self, caller: Pid, req: WriteRequest) -> Result<i64> {
        let count = req.count as usize;
        if count > INLINE_DATA_MAX {
            return_errno_with_message!(Errno::EINVAL, "transfer too large for the inline path");
        }
        let table = self.table(caller);
        let desc = table.get_mut(req.fd)?;
        if !desc.writable() {
            return_errno!(Errno::EBADF);
        }
        if desc.node.is_dir() {
            return_errno!(Errno::EISDIR);
        }
        let append = desc.flags & O_APPEND != 0;
        let (offset, advance) = match req.offset {
            _ if append => (desc.node.size(), true),
            -1 => (desc.offset, true),
            off if off >= 0 => (off as u64, false),
            _ => return_errno!(Errno::EINVAL),
        };
        let n = desc.node.write_at(offset, &req.data[..count])?;
        if advance {
            desc.offset = offset + n as u64;
        }
        Ok(n as i64)
    }

    fn do_lseek(&mut self, caller: Pid, req: LseekRequest) -> Result<i64> {
        let table = self.table(caller);
        let desc = table.get_mut(req.fd)?;
        let base = match req.whence {
            SEEK_SET => 0,
            SEEK_CUR => desc.offset as i64,
            SEEK_END => desc.node.size() as i64,
            _ => return_errno!(Errno::EINVAL),
        };
        let target = base
            .checked_add(req.offset)
            .ok_or_else(|| Error::new(Errno::EINVAL))?;
        if target < 0 {
            return_errno!(Errno::EINVAL);
        }
        desc.offset = target as u64;
        Ok(target)
    }

    fn do_stat(&mut self, caller: Pid, req: PathRequest) -> Result<StatInfo> {
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.path.as_str()?, true)?;
        Ok(node.stat())
    }

    fn do_fstat(&mut self, caller: Pid, req: FdRequest) -> Result<StatInfo> {
        let desc = self.table(caller).get(req.fd)?;
        Ok(desc.node.stat())
    }

    fn do_access(&mut self, caller: Pid, req: AccessRequest) -> Result<()> {
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.path.as_str()?, true)?;
        self.check_access(
            caller,
            &node,
            req.mode & R_OK != 0,
            req.mode & W_OK != 0,
            req.mode & X_OK != 0,
        )
    }

    fn do_dup(&mut self, caller: Pid, fd: i32) -> Result<i32> {
        let table = self.table(caller);
        let desc = table.get(fd)?;
        let copy = FileDesc {
            node: desc.node.clone(),
            offset: desc.offset,
            flags: desc.flags,
        };
        table.install(copy)
    }

    fn do_dup2(&mut self, caller: Pid, req: Dup2Request) -> Result<i32> {
        if req.newfd < 0 || req.newfd as usize >= OPEN_MAX {
            return_errno!(Errno::EINVAL);
        }
        let table = self.table(caller);
        let desc = table.get(req.fd)?;
        let copy = FileDesc {
            node: desc.node.clone(),
            offset: desc.offset,
            flags: desc.flags,
        };
        if req.fd == req.newfd {
            return Ok(req.fd);
        }
        table.install_at(req.newfd as usize, copy)?;
        Ok(req.newfd)
    }

    fn do_mkdir(&mut self, caller: Pid, req: MkdirRequest) -> Result<()> {
        let base = self.cwd(caller);
        let (uid, gid) = self.caller_creds(caller);
        let (parent, name) = self.fs.resolve_parent(&base, req.path.as_str()?)?;
        self.check_access(caller, &parent, false, true, false)?;
        self.fs.create_dir(&parent, &name, req.mode, uid, gid)?;
        Ok(())
    }

    fn do_rmdir(&mut self, caller: Pid, req: PathRequest) -> Result<()> {
        let base = self.cwd(caller);
        let (parent, name) = self.fs.resolve_parent(&base, req.path.as_str()?)?;
        self.check_access(caller, &parent, false, true, false)?;
        self.fs.rmdir(&parent, &name)
    }

    fn do_unlink(&mut self, caller: Pid, req: PathRequest) -> Result<()> {
        let base = self.cwd(caller);
        let (parent, name) = self.fs.resolve_parent(&base, req.path.as_str()?)?;
        self.check_access(caller, &parent, false, true, false)?;
        self.fs.unlink(&parent, &name)
    }

    fn do_rename(&mut self, caller: Pid, req: TwoPathRequest) -> Result<()> {
        let base = self.cwd(caller);
        let (old_parent, old_name) = self.fs.resolve_parent(&base, req.old.as_str()?)?;
        let (new_parent, new_name) = self.fs.resolve_parent(&base, req.new.as_str()?)?;
        self.check_access(caller, &old_parent, false, true, false)?;
        self.check_access(caller, &new_parent, false, true, false)?;
        self.fs.rename(&old_parent, &old_name, &new_parent, &new_name)
    }

    fn do_link(&mut self, caller: Pid, req: TwoPathRequest) -> Result<()> {
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.old.as_str()?, false)?;
        let (parent, name) = self.fs.resolve_parent(&base, req.new.as_str()?)?;
        self.check_access(caller, &parent, false, true, false)?;
        self.fs.link(&parent, &name, &node)
    }

    fn do_symlink(&mut self, caller: Pid, req: TwoPathRequest) -> Result<()> {
        let base = self.cwd(caller);
        let (uid, gid) = self.caller_creds(caller);
        let (parent, name) = self.fs.resolve_parent(&base, req.new.as_str()?)?;
        self.check_access(caller, &parent, false, true, false)?;
        self.fs
            .create_symlink(&parent, &name, req.old.as_str()?, uid, gid)?;
        Ok(())
    }

    fn do_readlink(&mut self, caller: Pid, req: PathRequest) -> Result<String> {
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.path.as_str()?, false)?;
        node.link_target()
    }

    fn do_truncate(&mut self, caller: Pid, req: TruncateRequest) -> Result<()> {
        if req.length < 0 {
            return_errno!(Errno::EINVAL);
        }
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.path.as_str()?, true)?;
        self.check_access(caller, &node, false, true, false)?;
        node.truncate(req.length as u64)
    }

    fn do_ftruncate(&mut self, caller: Pid, req: FtruncateRequest) -> Result<()> {
        if req.length < 0 {
            return_errno!(Errno::EINVAL);
        }
        let desc = self.table(caller).get(req.fd)?;
        if !desc.writable() {
            return_errno!(Errno::EBADF);
        }
        desc.node.truncate(req.length as u64)
    }

    fn do_chdir(&mut self, caller: Pid, req: PathRequest) -> Result<()> {
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.path.as_str()?, true)?;
        if !node.is_dir() {
            return_errno!(Errno::ENOTDIR);
        }
        self.check_access(caller, &node, false, false, true)?;
        self.cwds.insert(caller, node);
        Ok(())
    }

    fn do_chmod(&mut self, caller: Pid, req: ChmodRequest) -> Result<()> {
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.path.as_str()?, true)?;
        let (uid, _) = self.caller_creds(caller);
        let (owner, _, _) = node.ownership();
        if uid != 0 && uid != owner {
            return_errno!(Errno::EPERM);
        }
        node.set_mode(req.mode);
        Ok(())
    }

    fn do_chown(&mut self, caller: Pid, req: ChownRequest) -> Result<()> {
        let base = self.cwd(caller);
        let node = self.fs.resolve(&base, req.path.as_str()?, true)?;
        let (uid, _) = self.caller_creds(caller);
        let (owner, _, _) = node.ownership();
        if uid != 0 && uid != owner {
            return_errno!(Errno::EPERM);
        }
        node.set_owner(req.uid, req.gid);
        Ok(())
    }
}

impl Default for VfsServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn server() -> VfsServer {
        VfsServer::new()
    }

    fn request<T: zerocopy::IntoBytes + zerocopy::Immutable>(
        source: Pid,
        mtype: i32,
        body: &T,
    ) -> Message {
        let mut m = Message::with_payload(mtype, body);
        m.source = source;
        m
    }

    fn value_of(reply: &Message) -> i64 {
        let resp: GenericResponse = reply.decode().unwrap();
        assert_eq!(reply.mtype, msg::VFS_REPLY);
        resp.value
    }

    fn errno_of(reply: &Message) -> Option<Errno> {
        let resp: GenericResponse = reply.decode().unwrap();
        Errno::from_wire(resp.error)
    }

    fn open(srv: &mut VfsServer, pid: Pid, path: &str, flags: i32, mode: u32) -> Message {
        let req = OpenRequest {
            flags,
            mode,
            path: InlinePath::new(path).unwrap(),
        };
        srv.handle(&request(pid, msg::VFS_OPEN, &req)).unwrap()
    }

    #[test]
    fn create_write_seek_read_round_trip() {
        let mut srv = server();
        let reply = open(&mut srv, 10, "/tmp/a.txt", O_CREAT | O_RDWR, 0o644);
        let fd = value_of(&reply) as i32;
        assert!(fd >= 3);

        let write = WriteRequest::new(fd, -1, b"hello").unwrap();
        let reply = srv.handle(&request(10, msg::VFS_WRITE, &write)).unwrap();
        assert_eq!(value_of(&reply), 5);

        let seek = LseekRequest {
            offset: 0,
            fd,
            whence: SEEK_SET,
        };
        let reply = srv.handle(&request(10, msg::VFS_LSEEK, &seek)).unwrap();
        assert_eq!(value_of(&reply), 0);

        let read = ReadRequest {
            offset: -1,
            count: 5,
            fd,
        };
        let reply = srv.handle(&request(10, msg::VFS_READ, &read)).unwrap();
        let resp: ReadResponse = reply.decode().unwrap();
        assert_eq!(resp.bytes_read, 5);
        assert_eq!(&resp.data[..5], b"hello");

        let stat = PathRequest {
            path: InlinePath::new("/tmp/a.txt").unwrap(),
        };
        let reply = srv.handle(&request(10, msg::VFS_STAT, &stat)).unwrap();
        let resp: StatResponse = reply.decode().unwrap();
        assert_eq!(resp.error, 0);
        assert_eq!(resp.stat.size, 5);

        let close = CloseRequest {
            fd,
            on_behalf_of: -1,
        };
        let reply = srv.handle(&request(10, msg::VFS_CLOSE, &close)).unwrap();
        assert_eq!(errno_of(&reply), None);
        let reply = srv.handle(&request(10, msg::VFS_CLOSE, &close)).unwrap();
        assert_eq!(errno_of(&reply), Some(Errno::EBADF));
    }

    #[test]
    fn directory_scenario() {
        let mut srv = server();
        let mk = |srv: &mut VfsServer, path: &str| {
            let req = MkdirRequest::new(path, 0o755).unwrap();
            errno_of(&srv.handle(&request(10, msg::VFS_MKDIR, &req)).unwrap())
        };
        let rm = |srv: &mut VfsServer, path: &str| {
            let req = PathRequest {
                path: InlinePath::new(path).unwrap(),
            };
            errno_of(&srv.handle(&request(10, msg::VFS_RMDIR, &req)).unwrap())
        };
        assert_eq!(mk(&mut srv, "/d"), None);
        assert_eq!(mk(&mut srv, "/d/e"), None);
        assert_eq!(rm(&mut srv, "/d"), Some(Errno::ENOTEMPTY));
        assert_eq!(rm(&mut srv, "/d/e"), None);
        assert_eq!(rm(&mut srv, "/d"), None);
        assert_eq!(rm(&mut srv, "/d"), Some(Errno::ENOENT));
    }

    #[test]
    fn open_directory_for_writing_is_eisdir() {
        let mut srv = server();
        let reply = open(&mut srv, 10, "/", O_RDWR, 0);
        assert_eq!(errno_of(&reply), Some(Errno::EISDIR));
        // Read-only directory opens are fine (for fstat).
        let reply = open(&mut srv, 10, "/tmp", O_RDONLY, 0);
        let fd = value_of(&reply) as i32;
        let reply = srv
            .handle(&request(10, msg::VFS_FSTAT, &FdRequest::new(fd)))
            .unwrap();
        let resp: StatResponse = reply.decode().unwrap();
        assert_eq!(resp.stat.mode & super::ramfs::S_IFMT, super::ramfs::S_IFDIR);
    }

    #[test]
    fn lseek_past_end_then_write_grows() {
        let mut srv = server();
        let fd = value_of(&open(&mut srv, 10, "/tmp/f", O_CREAT | O_RDWR, 0o644)) as i32;
        let seek = LseekRequest {
            offset: 100,
            fd,
            whence: SEEK_SET,
        };
        assert_eq!(value_of(&srv.handle(&request(10, msg::VFS_LSEEK, &seek)).unwrap()), 100);
        // Seeking alone does not extend.
        let stat = srv
            .handle(&request(10, msg::VFS_FSTAT, &FdRequest::new(fd)))
            .unwrap();
        let resp: StatResponse = stat.decode().unwrap();
        assert_eq!(resp.stat.size, 0);
        // Writing at the cursor does.
        let write = WriteRequest::new(fd, -1, b"x").unwrap();
        assert_eq!(value_of(&srv.handle(&request(10, msg::VFS_WRITE, &write)).unwrap()), 1);
        let stat = srv
            .handle(&request(10, msg::VFS_FSTAT, &FdRequest::new(fd)))
            .unwrap();
        let resp: StatResponse = stat.decode().unwrap();
        assert_eq!(resp.stat.size, 101);
    }

    #[test]
    fn oversized_inline_transfers_are_einval() {
        let mut srv = server();
        let fd = value_of(&open(&mut srv, 10, "/tmp/f", O_CREAT | O_RDWR, 0o644)) as i32;
        let read = ReadRequest {
            offset: -1,
            count: (INLINE_DATA_MAX + 1) as u32,
            fd,
        };
        let reply = srv.handle(&request(10, msg::VFS_READ, &read)).unwrap();
        let resp: ReadResponse = reply.decode().unwrap();
        assert_eq!(Errno::from_wire(resp.error), Some(Errno::EINVAL));
    }

    #[test]
    fn fd_tables_are_per_process_and_bounded() {
        let mut srv = server();
        let fd_a = value_of(&open(&mut srv, 10, "/tmp/f", O_CREAT | O_RDWR, 0o644)) as i32;
        // Another process does not see pid 10's descriptor.
        let close = CloseRequest {
            fd: fd_a,
            on_behalf_of: -1,
        };
        let reply = srv.handle(&request(11, msg::VFS_CLOSE, &close)).unwrap();
        assert_eq!(errno_of(&reply), Some(Errno::EBADF));
        // And nobody but the PM may close on another's behalf.
        let foreign = CloseRequest {
            fd: fd_a,
            on_behalf_of: 10,
        };
        let reply = srv.handle(&request(11, msg::VFS_CLOSE, &foreign)).unwrap();
        assert_eq!(errno_of(&reply), Some(Errno::EPERM));

        for _ in 0..(OPEN_MAX - FIRST_FREE_FD) {
            let reply = open(&mut srv, 12, "/tmp/many", O_CREAT | O_RDWR, 0o644);
            assert_eq!(errno_of(&reply), None);
        }
        let reply = open(&mut srv, 12, "/tmp/many", O_RDWR, 0);
        assert_eq!(errno_of(&reply), Some(Errno::EMFILE));
    }

    #[test]
    fn permissions_enforce_mode_bits() {
        let mut srv = server();
        // A root-owned file with no group/other bits.
        let fd = value_of(&open(&mut srv, 10, "/etc/secret", O_CREAT | O_RDWR, 0o600)) as i32;
        let _ = fd;
        // Caller 20 runs as uid 1000 per the PM's notice.
        let _ = srv.handle(&request(
            PM_PID,
            msg::VFS_SETCREDS,
            &SetCredsRequest::new(20, 1000, 1000),
        ));
        let reply = open(&mut srv, 20, "/etc/secret", O_RDONLY, 0);
        assert_eq!(errno_of(&reply), Some(Errno::EACCES));
        let chmod = ChmodRequest::new("/etc/secret", 0o644).unwrap();
        let reply = srv.handle(&request(20, msg::VFS_CHMOD, &chmod)).unwrap();
        assert_eq!(errno_of(&reply), Some(Errno::EPERM));
        let reply = srv.handle(&request(10, msg::VFS_CHMOD, &chmod)).unwrap();
        assert_eq!(errno_of(&reply), None);
        let reply = open(&mut srv, 20, "/etc/secret", O_RDONLY, 0);
        assert_eq!(errno_of(&reply), None);
    }

    #[test]
    fn fork_inheritance_shares_offsets_at_the_time_of_fork() {
        let mut srv = server();
        let fd = value_of(&open(&mut srv, 10, "/tmp/f", O_CREAT | O_RDWR, 0o644)) as i32;
        let write = WriteRequest::new(fd, -1, b"abcdef").unwrap();
        let _ = srv.handle(&request(10, msg::VFS_WRITE, &write));
        let inherit = InheritRequest {
            parent: 10,
            child: 30,
            uid: 0,
            gid: 0,
        };
        let _ = srv.handle(&request(PM_PID, msg::VFS_INHERIT, &inherit));
        // The child reads from its own copy of the cursor.
        let read = ReadRequest {
            offset: 0,
            count: 6,
            fd,
        };
        let reply = srv.handle(&request(30, msg::VFS_READ, &read)).unwrap();
        let resp: ReadResponse = reply.decode().unwrap();
        assert_eq!(resp.bytes_read, 6);
        // Release drops the child's table.
        let _ = srv.handle(&request(PM_PID, msg::VFS_RELEASE, &ReleaseRequest::new(30)));
        let reply = srv.handle(&request(30, msg::VFS_READ, &read)).unwrap();
        let resp: ReadResponse = reply.decode().unwrap();
        assert_eq!(Errno::from_wire(resp.error), Some(Errno::EBADF));
    }

    #[test]
    fn cwd_affects_relative_resolution() {
        let mut srv = server();
        let mk = MkdirRequest::new("/tmp/work", 0o755).unwrap();
        let _ = srv.handle(&request(10, msg::VFS_MKDIR, &mk));
        let chdir = PathRequest {
            path: InlinePath::new("/tmp/work").unwrap(),
        };
        let reply = srv.handle(&request(10, msg::VFS_CHDIR, &chdir)).unwrap();
        assert_eq!(errno_of(&reply), None);
        let reply = open(&mut srv, 10, "rel.txt", O_CREAT | O_RDWR, 0o644);
        assert_eq!(errno_of(&reply), None);
        let stat = PathRequest {
            path: InlinePath::new("/tmp/work/rel.txt").unwrap(),
        };
        let reply = srv.handle(&request(10, msg::VFS_STAT, &stat)).unwrap();
        let resp: StatResponse = reply.decode().unwrap();
        assert_eq!(resp.error, 0);
        let reply = srv.handle(&request(10, msg::VFS_GETCWD, &[0u8; 0])).unwrap();
        let resp: PathResponse = reply.decode().unwrap();
        assert_eq!(resp.path.as_str().unwrap(), "/tmp/work");
    }

    #[test]
    fn unknown_requests_get_enosys() {
        let mut srv = server();
        let reply = srv.handle(&request(10, msg::VFS_IOCTL, &[0u8; 0])).unwrap();
        assert_eq!(reply.mtype, msg::VFS_ERROR);
        assert_eq!(errno_of(&reply), Some(Errno::ENOSYS));
        let reply = srv.handle(&request(10, 199, &[0u8; 0])).unwrap();
        assert_eq!(errno_of(&reply), Some(Errno::ENOSYS));
    }
}
