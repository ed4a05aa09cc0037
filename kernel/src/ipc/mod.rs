// SPDX-License-Identifier: MPL-2.0

//! The Lattice IPC: the fixed-size message, the wire protocol of the
//! three servers, and the synchronous rendezvous primitive.

pub mod lattice;
mod message;
pub mod wire;

pub use lattice::{receive, send, sendrec, IpcOutcome, RecvFrom};
pub use message::{Message, MESSAGE_SIZE, PAYLOAD_SIZE};

/// Message-type numbers, grouped by range: 0–99 kernel-reserved, 100–199
/// VFS, 200–299 Process Manager, 300–399 Memory Manager, 1000 and up
/// user-defined.
pub mod msg {
    /* Kernel-synthesised messages (0-99) */
    pub const CLOCK_TICK: i32 = 1;
    /// The kernel killed a process (fault or fatal signal); the PM must
    /// run its death bookkeeping.
    pub const PROC_DIED: i32 = 2;

    /* VFS server (100-199) */
    pub const VFS_OPEN: i32 = 100;
    pub const VFS_CLOSE: i32 = 101;
    pub const VFS_READ: i32 = 102;
    pub const VFS_WRITE: i32 = 103;
    pub const VFS_LSEEK: i32 = 104;
    pub const VFS_STAT: i32 = 105;
    pub const VFS_FSTAT: i32 = 106;
    pub const VFS_ACCESS: i32 = 107;
    pub const VFS_DUP: i32 = 108;
    pub const VFS_DUP2: i32 = 109;
    pub const VFS_IOCTL: i32 = 111;
    pub const VFS_FCNTL: i32 = 112;
    /* Trusted control messages, honored only from the PM */
    pub const VFS_INHERIT: i32 = 113;
    pub const VFS_SETCREDS: i32 = 114;
    pub const VFS_RELEASE: i32 = 115;

    pub const VFS_MKDIR: i32 = 120;
    pub const VFS_RMDIR: i32 = 121;
    pub const VFS_CHDIR: i32 = 122;
    pub const VFS_GETCWD: i32 = 123;
    pub const VFS_LINK: i32 = 124;
    pub const VFS_UNLINK: i32 = 125;
    pub const VFS_RENAME: i32 = 126;
    pub const VFS_CHMOD: i32 = 127;
    pub const VFS_CHOWN: i32 = 128;

    pub const VFS_SYMLINK: i32 = 140;
    pub const VFS_READLINK: i32 = 141;
    pub const VFS_TRUNCATE: i32 = 142;
    pub const VFS_FTRUNCATE: i32 = 143;

    pub const VFS_REPLY: i32 = 190;
    pub const VFS_ERROR: i32 = 191;

    /* Process Manager (200-299) */
    pub const PROC_FORK: i32 = 200;
    pub const PROC_EXEC: i32 = 201;
    pub const PROC_EXIT: i32 = 202;
    pub const PROC_WAIT: i32 = 203;
    pub const PROC_KILL: i32 = 204;
    pub const PROC_GETPID: i32 = 205;
    pub const PROC_GETPPID: i32 = 206;
    pub const PROC_SETPGID: i32 = 207;
    pub const PROC_GETPGID: i32 = 208;
    pub const PROC_SETSID: i32 = 209;

    pub const PROC_SIGACTION: i32 = 221;
    pub const PROC_SIGPROCMASK: i32 = 222;
    pub const PROC_SIGPENDING: i32 = 223;
    pub const PROC_SIGRETURN: i32 = 225;

    pub const PROC_GETUID: i32 = 240;
    pub const PROC_GETEUID: i32 = 241;
    pub const PROC_GETGID: i32 = 242;
    pub const PROC_GETEGID: i32 = 243;
    pub const PROC_SETUID: i32 = 244;
    pub const PROC_SETGID: i32 = 245;

    pub const PROC_REPLY: i32 = 290;
    pub const PROC_ERROR: i32 = 291;

    /* Memory Manager (300-399) */
    pub const MM_BRK: i32 = 300;
    pub const MM_MMAP: i32 = 320;
    pub const MM_MUNMAP: i32 = 321;
    pub const MM_MPROTECT: i32 = 322;
    pub const MM_MSYNC: i32 = 323;
    pub const MM_MLOCK: i32 = 324;
    pub const MM_MUNLOCK: i32 = 325;
    pub const MM_MADVISE: i32 = 326;

    pub const MM_SHMGET: i32 = 350;
    pub const MM_SHMAT: i32 = 351;
    pub const MM_SHMDT: i32 = 352;
    pub const MM_SHMCTL: i32 = 353;
    /* Trusted control messages, honored only from the PM */
    pub const MM_INHERIT: i32 = 360;
    pub const MM_RELEASE: i32 = 361;

    pub const MM_GETPAGESIZE: i32 = 370;

    pub const MM_REPLY: i32 = 390;
    pub const MM_ERROR: i32 = 391;

    /// Whether `mtype` falls in the VFS request range.
    pub fn is_vfs(mtype: i32) -> bool {
        (100..200).contains(&mtype)
    }

    /// Whether `mtype` falls in the Process Manager request range.
    pub fn is_proc(mtype: i32) -> bool {
        (200..300).contains(&mtype)
    }

    /// Whether `mtype` falls in the Memory Manager request range.
    pub fn is_mm(mtype: i32) -> bool {
        (300..400).contains(&mtype)
    }

    /// Whether `mtype` is one of the reply kinds.
    pub fn is_reply(mtype: i32) -> bool {
        matches!(mtype, VFS_REPLY | VFS_ERROR | PROC_REPLY | PROC_ERROR | MM_REPLY | MM_ERROR)
    }
}
