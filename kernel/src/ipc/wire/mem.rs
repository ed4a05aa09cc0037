// SPDX-License-Identifier: MPL-2.0

//! Memory Manager request and response records (message types 300-399).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::prelude::*;

/* Protection bits. */
pub const PROT_NONE: u32 = 0;
pub const PROT_READ: u32 = 1;
pub const PROT_WRITE: u32 = 2;
pub const PROT_EXEC: u32 = 4;

/* Mapping flags. */
pub const MAP_SHARED: u32 = 0x01;
pub const MAP_PRIVATE: u32 = 0x02;
pub const MAP_FIXED: u32 = 0x10;
pub const MAP_ANONYMOUS: u32 = 0x20;

/* System-V IPC flags and commands. */
pub const IPC_PRIVATE: i32 = 0;
pub const IPC_CREAT: i32 = 0o1000;
pub const IPC_EXCL: i32 = 0o2000;
pub const IPC_RMID: i32 = 0;
pub const SHM_RDONLY: u32 = 0x1000;
pub const SHM_RND: u32 = 0x2000;

/// BRK: `brk == 0` queries the current break.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BrkRequest {
    pub brk: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BrkResponse {
    pub brk: u64,
    pub error: i32,
    _pad: i32,
}

impl BrkResponse {
    pub fn ok(brk: u64) -> Self {
        BrkResponse {
            brk,
            error: 0,
            _pad: 0,
        }
    }

    pub fn err(errno: Errno) -> Self {
        BrkResponse {
            brk: 0,
            error: errno.as_i32(),
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MmapRequest {
    pub addr: u64,
    pub length: u64,
    pub offset: u64,
    pub prot: u32,
    pub flags: u32,
    pub fd: i32,
    _pad: u32,
}

impl MmapRequest {
    pub fn anonymous(addr: u64, length: u64, prot: u32, flags: u32) -> Self {
        MmapRequest {
            addr,
            length,
            offset: 0,
            prot,
            flags: flags | MAP_ANONYMOUS,
            fd: -1,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MmapResponse {
    pub addr: u64,
    pub error: i32,
    _pad: i32,
}

impl MmapResponse {
    pub fn ok(addr: u64) -> Self {
        MmapResponse {
            addr,
            error: 0,
            _pad: 0,
        }
    }

    pub fn err(errno: Errno) -> Self {
        MmapResponse {
            addr: 0,
            error: errno.as_i32(),
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MunmapRequest {
    pub addr: u64,
    pub length: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MprotectRequest {
    pub addr: u64,
    pub length: u64,
    pub prot: u32,
    _pad: u32,
}

impl MprotectRequest {
    pub fn new(addr: u64, length: u64, prot: u32) -> Self {
        MprotectRequest {
            addr,
            length,
            prot,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ShmgetRequest {
    pub size: u64,
    pub key: i32,
    pub flags: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ShmgetResponse {
    pub shmid: i32,
    pub error: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ShmatRequest {
    pub addr: u64,
    pub shmid: i32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ShmdtRequest {
    pub addr: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ShmctlRequest {
    pub shmid: i32,
    pub cmd: i32,
}

/// Fork inheritance notice from the PM: copy the parent's heap and
/// region bookkeeping, bumping shm attach counts.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MmInheritRequest {
    pub parent: i32,
    pub child: i32,
}

/// Exit cleanup notice from the PM.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MmReleaseRequest {
    pub pid: i32,
    _pad: i32,
}

impl MmReleaseRequest {
    pub fn new(pid: i32) -> Self {
        MmReleaseRequest { pid, _pad: 0 }
    }
}
