// SPDX-License-Identifier: MPL-2.0

//! Error numbers and the kernel error type.
//!
//! One numeric space, aligned with POSIX errno, shared by the kernel and
//! the wire protocol: the `error` field of every reply message carries one
//! of these values (or zero for success).

/// Error number.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Errno {
    EPERM = 1,    /* Operation not permitted */
    ENOENT = 2,   /* No such file or directory */
    ESRCH = 3,    /* No such process */
    EINTR = 4,    /* Interrupted system call */
    EIO = 5,      /* I/O error */
    E2BIG = 7,    /* Argument list too long */
    ENOEXEC = 8,  /* Exec format error */
    EBADF = 9,    /* Bad file number */
    ECHILD = 10,  /* No child processes */
    EAGAIN = 11,  /* Try again */
    ENOMEM = 12,  /* Out of memory */
    EACCES = 13,  /* Permission denied */
    EFAULT = 14,  /* Bad address */
    EBUSY = 16,   /* Device or resource busy */
    EEXIST = 17,  /* File exists */
    ENODEV = 19,  /* No such device */
    ENOTDIR = 20, /* Not a directory */
    EISDIR = 21,  /* Is a directory */
    EINVAL = 22,  /* Invalid argument */
    EMFILE = 24,  /* Too many open files */
    ENOSPC = 28,  /* No space left on device */
    ESPIPE = 29,  /* Illegal seek */
    EROFS = 30,   /* Read-only file system */
    EPIPE = 32,   /* Broken pipe */
    ENAMETOOLONG = 36, /* File name too long */
    ENOSYS = 38,    /* Invalid system call number */
    ENOTEMPTY = 39, /* Directory not empty */
    ELOOP = 40,     /* Too many symbolic links encountered */

    ELOCKED = 101,  /* IPC deadlock detected */
    EBADCALL = 102, /* Malformed or unknown request */
}

impl Errno {
    /// The wire representation.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Decodes a wire error field. Zero is success and yields `None`.
    pub fn from_wire(value: i32) -> Option<Errno> {
        use Errno::*;
        let errno = match value {
            0 => return None,
            1 => EPERM,
            2 => ENOENT,
            3 => ESRCH,
            4 => EINTR,
            5 => EIO,
            7 => E2BIG,
            8 => ENOEXEC,
            9 => EBADF,
            10 => ECHILD,
            11 => EAGAIN,
            12 => ENOMEM,
            13 => EACCES,
            14 => EFAULT,
            16 => EBUSY,
            17 => EEXIST,
            19 => ENODEV,
            20 => ENOTDIR,
            21 => EISDIR,
            22 => EINVAL,
            24 => EMFILE,
            28 => ENOSPC,
            29 => ESPIPE,
            30 => EROFS,
            32 => EPIPE,
            36 => ENAMETOOLONG,
            38 => ENOSYS,
            39 => ENOTEMPTY,
            40 => ELOOP,
            101 => ELOCKED,
            102 => EBADCALL,
            _ => EINVAL,
        };
        Some(errno)
    }
}

/// The error type used across this crate.
#[derive(Debug, Clone, Copy)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    pub const fn with_message(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    pub const fn error(&self) -> Errno {
        self.errno
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<lattice_frame::Error> for Error {
    fn from(frame_error: lattice_frame::Error) -> Self {
        match frame_error {
            lattice_frame::Error::NoMemory => Error::new(Errno::ENOMEM),
            lattice_frame::Error::InvalidArgs => Error::new(Errno::EINVAL),
            lattice_frame::Error::NotMapped => Error::new(Errno::EFAULT),
            lattice_frame::Error::AlreadyMapped => Error::new(Errno::EINVAL),
        }
    }
}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return core::result::Result::Err($crate::error::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($errno: expr, $message: expr) => {
        return core::result::Result::Err($crate::error::Error::with_message(
            $errno, $message,
        ))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_round_trip() {
        assert_eq!(Errno::from_wire(0), None);
        assert_eq!(Errno::from_wire(Errno::ELOCKED.as_i32()), Some(Errno::ELOCKED));
        assert_eq!(Errno::from_wire(Errno::ENOTEMPTY.as_i32()), Some(Errno::ENOTEMPTY));
    }
}
