// SPDX-License-Identifier: MPL-2.0

//! VFS request and response records (message types 100-199).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::{InlinePath, INLINE_DATA_MAX};
use crate::ipc::PAYLOAD_SIZE;
use crate::prelude::*;

/* Open flags, classic octal values. The low two bits are the access mode. */
pub const O_RDONLY: i32 = 0;
pub const O_WRONLY: i32 = 1;
pub const O_RDWR: i32 = 2;
pub const O_ACCMODE: i32 = 3;
pub const O_CREAT: i32 = 0o100;
pub const O_EXCL: i32 = 0o200;
pub const O_TRUNC: i32 = 0o1000;
pub const O_APPEND: i32 = 0o2000;

/* Whence values for LSEEK. */
pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

/* Mode probes for ACCESS. */
pub const F_OK: i32 = 0;
pub const X_OK: i32 = 1;
pub const W_OK: i32 = 2;
pub const R_OK: i32 = 4;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct OpenRequest {
    pub flags: i32,
    pub mode: u32,
    pub path: InlinePath,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct OpenResponse {
    pub fd: i32,
    pub error: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CloseRequest {
    pub fd: i32,
    /// `-1` for the caller's own table. The PM may name another process
    /// here when cleaning up after an exit; everyone else gets `EPERM`.
    pub on_behalf_of: i32,
}

/// READ: `offset == -1` means "use and advance the descriptor cursor".
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ReadRequest {
    pub offset: i64,
    pub count: u32,
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ReadResponse {
    pub bytes_read: i64,
    pub error: i32,
    _pad: i32,
    pub data: [u8; INLINE_DATA_MAX],
}

impl ReadResponse {
    pub fn ok(data: &[u8]) -> Self {
        debug_assert!(data.len() <= INLINE_DATA_MAX);
        let mut resp = ReadResponse {
            bytes_read: data.len() as i64,
            error: 0,
            _pad: 0,
            data: [0; INLINE_DATA_MAX],
        };
        resp.data[..data.len()].copy_from_slice(data);
        resp
    }

    pub fn err(errno: Errno) -> Self {
        ReadResponse {
            bytes_read: -1,
            error: errno.as_i32(),
            _pad: 0,
            data: [0; INLINE_DATA_MAX],
        }
    }
}

/// WRITE: `offset == -1` means "use and advance the descriptor cursor".
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WriteRequest {
    pub offset: i64,
    pub count: u32,
    pub fd: i32,
    pub data: [u8; INLINE_DATA_MAX],
}

impl WriteRequest {
    pub fn new(fd: i32, offset: i64, data: &[u8]) -> Result<Self> {
        if data.len() > INLINE_DATA_MAX {
            return_errno_with_message!(Errno::EINVAL, "write does not fit inline");
        }
        let mut req = WriteRequest {
            offset,
            count: data.len() as u32,
            fd,
            data: [0; INLINE_DATA_MAX],
        };
        req.data[..data.len()].copy_from_slice(data);
        Ok(req)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct LseekRequest {
    pub offset: i64,
    pub fd: i32,
    pub whence: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PathRequest {
    pub path: InlinePath,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FdRequest {
    pub fd: i32,
    _pad: i32,
}

impl FdRequest {
    pub fn new(fd: i32) -> Self {
        FdRequest { fd, _pad: 0 }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Dup2Request {
    pub fd: i32,
    pub newfd: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AccessRequest {
    pub mode: i32,
    _pad: i32,
    pub path: InlinePath,
}

impl AccessRequest {
    pub fn new(path: &str, mode: i32) -> Result<Self> {
        Ok(AccessRequest {
            mode,
            _pad: 0,
            path: InlinePath::new(path)?,
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MkdirRequest {
    pub mode: u32,
    _pad: u32,
    pub path: InlinePath,
}

impl MkdirRequest {
    pub fn new(path: &str, mode: u32) -> Result<Self> {
        Ok(MkdirRequest {
            mode,
            _pad: 0,
            path: InlinePath::new(path)?,
        })
    }
}

/// RENAME and LINK share the two-path shape.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TwoPathRequest {
    pub old: InlinePath,
    pub new: InlinePath,
}

impl TwoPathRequest {
    pub fn new(old: &str, new: &str) -> Result<Self> {
        Ok(TwoPathRequest {
            old: InlinePath::new(old)?,
            new: InlinePath::new(new)?,
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ChmodRequest {
    pub mode: u32,
    _pad: u32,
    pub path: InlinePath,
}

impl ChmodRequest {
    pub fn new(path: &str, mode: u32) -> Result<Self> {
        Ok(ChmodRequest {
            mode,
            _pad: 0,
            path: InlinePath::new(path)?,
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ChownRequest {
    pub uid: u32,
    pub gid: u32,
    pub path: InlinePath,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TruncateRequest {
    pub length: i64,
    pub path: InlinePath,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FtruncateRequest {
    pub length: i64,
    pub fd: i32,
    _pad: i32,
}

impl FtruncateRequest {
    pub fn new(fd: i32, length: i64) -> Self {
        FtruncateRequest {
            length,
            fd,
            _pad: 0,
        }
    }
}

/// File metadata as STAT and FSTAT report it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StatInfo {
    pub ino: u64,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StatResponse {
    pub stat: StatInfo,
    pub error: i32,
    _pad: i32,
}

impl StatResponse {
    pub fn ok(stat: StatInfo) -> Self {
        StatResponse {
            stat,
            error: 0,
            _pad: 0,
        }
    }

    pub fn err(errno: Errno) -> Self {
        StatResponse {
            stat: StatInfo::default(),
            error: errno.as_i32(),
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PathResponse {
    pub error: i32,
    _pad: i32,
    pub path: InlinePath,
}

impl PathResponse {
    pub fn ok(path: &str) -> Result<Self> {
        Ok(PathResponse {
            error: 0,
            _pad: 0,
            path: InlinePath::new(path)?,
        })
    }

    pub fn err(errno: Errno) -> Self {
        PathResponse {
            error: errno.as_i32(),
            _pad: 0,
            path: InlinePath::empty(),
        }
    }
}

/// Fork inheritance notice from the PM: duplicate the parent's descriptor
/// table for the child and record the child's credentials.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct InheritRequest {
    pub parent: i32,
    pub child: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Credential refresh notice from the PM.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SetCredsRequest {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
    _pad: u32,
}

impl SetCredsRequest {
    pub fn new(pid: i32, uid: u32, gid: u32) -> Self {
        SetCredsRequest {
            pid,
            uid,
            gid,
            _pad: 0,
        }
    }
}

/// Exit cleanup notice from the PM: drop everything the process held.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ReleaseRequest {
    pub pid: i32,
    _pad: i32,
}

impl ReleaseRequest {
    pub fn new(pid: i32) -> Self {
        ReleaseRequest { pid, _pad: 0 }
    }
}

const _: () = {
    assert!(core::mem::size_of::<OpenRequest>() <= PAYLOAD_SIZE);
    assert!(core::mem::size_of::<ReadResponse>() <= PAYLOAD_SIZE);
    assert!(core::mem::size_of::<WriteRequest>() <= PAYLOAD_SIZE);
    assert!(core::mem::size_of::<TwoPathRequest>() <= PAYLOAD_SIZE);
    assert!(core::mem::size_of::<StatResponse>() <= PAYLOAD_SIZE);
};
