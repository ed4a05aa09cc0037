// SPDX-License-Identifier: MPL-2.0

//! Typed payload records of the wire protocol.
//!
//! Every record is a packed, padding-free `#[repr(C)]` struct that is
//! copied byte-for-byte into and out of the 248-byte payload area. All
//! multi-byte fields are little-endian native integers; paths and inline
//! data are fixed-size byte arrays.

mod mem;
mod proc;
mod vfs;

pub use mem::*;
pub use proc::*;
pub use vfs::*;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::prelude::*;

/// The longest path a request can carry inline. Two of these fit one
/// payload, which RENAME and LINK depend on.
pub const PATH_INLINE_MAX: usize = 120;

/// The largest read or write that travels inline in the payload. Larger
/// transfers would need shared memory, which the ramfs phase does not
/// speak: they get `EINVAL`.
pub const INLINE_DATA_MAX: usize = 224;

/// A NUL-padded path field.
#[repr(transparent)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct InlinePath([u8; PATH_INLINE_MAX]);

impl InlinePath {
    pub const fn empty() -> Self {
        InlinePath([0; PATH_INLINE_MAX])
    }

    /// Encodes `path`, rejecting anything that cannot fit with its NUL.
    pub fn new(path: &str) -> Result<Self> {
        let bytes = path.as_bytes();
        if bytes.len() >= PATH_INLINE_MAX {
            return_errno_with_message!(Errno::ENAMETOOLONG, "path does not fit inline");
        }
        let mut buf = [0u8; PATH_INLINE_MAX];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(InlinePath(buf))
    }

    /// Decodes the field back into a path.
    pub fn as_str(&self) -> Result<&str> {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(PATH_INLINE_MAX);
        core::str::from_utf8(&self.0[..len])
            .map_err(|_| Error::with_message(Errno::EINVAL, "path is not UTF-8"))
    }
}

impl Default for InlinePath {
    fn default() -> Self {
        Self::empty()
    }
}

impl core::fmt::Debug for InlinePath {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.as_str() {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => f.write_str("<invalid>"),
        }
    }
}

/// The reply shape shared by requests that return at most one integer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GenericResponse {
    pub value: i64,
    pub error: i32,
    _pad: i32,
}

impl GenericResponse {
    pub fn ok(value: i64) -> Self {
        GenericResponse {
            value,
            error: 0,
            _pad: 0,
        }
    }

    pub fn err(errno: Errno) -> Self {
        GenericResponse {
            value: -1,
            error: errno.as_i32(),
            _pad: 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inline_path_round_trips() {
        let p = InlinePath::new("/tmp/a.txt").unwrap();
        assert_eq!(p.as_str().unwrap(), "/tmp/a.txt");
    }

    #[test]
    fn overlong_paths_are_rejected() {
        let long = "x".repeat(PATH_INLINE_MAX);
        assert!(InlinePath::new(&long).is_err());
        let fits = "x".repeat(PATH_INLINE_MAX - 1);
        assert!(InlinePath::new(&fits).is_ok());
    }
}
