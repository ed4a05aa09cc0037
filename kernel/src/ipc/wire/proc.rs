// SPDX-License-Identifier: MPL-2.0

//! Process Manager request and response records (message types 200-299).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::InlinePath;
use crate::prelude::*;

/* Wait options. */
pub const WNOHANG: i32 = 1;

/* Handler encodings in SIGACTION requests and replies. */
pub const SIG_DFL: u64 = 0;
pub const SIG_IGN: u64 = 1;

/* SIGPROCMASK operations. */
pub const SIG_BLOCK: i32 = 0;
pub const SIG_UNBLOCK: i32 = 1;
pub const SIG_SETMASK: i32 = 2;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ForkResponse {
    pub child_pid: i32,
    pub error: i32,
}

/// Kernel-to-PM notice that a process died outside the EXIT path.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ProcDiedNotice {
    pub pid: i32,
    /// Already in wait encoding.
    pub status: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ExecRequest {
    pub argc: i32,
    pub envc: i32,
    pub path: InlinePath,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ExitRequest {
    pub code: i32,
    _pad: i32,
}

impl ExitRequest {
    pub fn new(code: i32) -> Self {
        ExitRequest { code, _pad: 0 }
    }
}

/// WAIT: `target > 0` waits for that child, `-1` for any child.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WaitRequest {
    pub target: i32,
    pub options: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WaitResponse {
    pub pid: i32,
    pub status: i32,
    pub error: i32,
    _pad: i32,
}

impl WaitResponse {
    pub fn ok(pid: i32, status: i32) -> Self {
        WaitResponse {
            pid,
            status,
            error: 0,
            _pad: 0,
        }
    }

    pub fn err(errno: Errno) -> Self {
        WaitResponse {
            pid: -1,
            status: 0,
            error: errno.as_i32(),
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct KillRequest {
    pub pid: i32,
    pub signo: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SigactionRequest {
    pub handler: u64,
    pub mask: u64,
    pub signo: i32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SigactionResponse {
    pub old_handler: u64,
    pub error: i32,
    _pad: i32,
}

impl SigactionResponse {
    pub fn ok(old_handler: u64) -> Self {
        SigactionResponse {
            old_handler,
            error: 0,
            _pad: 0,
        }
    }

    pub fn err(errno: Errno) -> Self {
        SigactionResponse {
            old_handler: 0,
            error: errno.as_i32(),
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SigprocmaskRequest {
    pub set: u64,
    pub how: i32,
    _pad: u32,
}

impl SigprocmaskRequest {
    pub fn new(how: i32, set: u64) -> Self {
        SigprocmaskRequest { set, how, _pad: 0 }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SigsetResponse {
    pub set: u64,
    pub error: i32,
    _pad: i32,
}

impl SigsetResponse {
    pub fn ok(set: u64) -> Self {
        SigsetResponse {
            set,
            error: 0,
            _pad: 0,
        }
    }

    pub fn err(errno: Errno) -> Self {
        SigsetResponse {
            set: 0,
            error: errno.as_i32(),
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SetIdRequest {
    pub id: u32,
    _pad: u32,
}

impl SetIdRequest {
    pub fn new(id: u32) -> Self {
        SetIdRequest { id, _pad: 0 }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SetpgidRequest {
    pub pid: i32,
    pub pgid: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GetpgidRequest {
    pub pid: i32,
    _pad: i32,
}

impl GetpgidRequest {
    pub fn new(pid: i32) -> Self {
        GetpgidRequest { pid, _pad: 0 }
    }
}
