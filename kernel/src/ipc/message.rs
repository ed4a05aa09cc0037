// SPDX-License-Identifier: MPL-2.0

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::prelude::*;

/// The constant on-wire size of every message.
pub const MESSAGE_SIZE: usize = 256;

/// Bytes left for the payload after the source and type fields.
pub const PAYLOAD_SIZE: usize = MESSAGE_SIZE - 8;

/// The fixed-size Lattice IPC message.
///
/// `source` is the kernel's view of the sender — the primitive stamps it
/// on every delivery and callers cannot forge it. `payload` is opaque
/// bytes whose interpretation is selected by `mtype`; the typed records
/// live in [`super::wire`].
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Message {
    pub source: i32,
    pub mtype: i32,
    pub payload: [u8; PAYLOAD_SIZE],
}

const _: () = assert!(core::mem::size_of::<Message>() == MESSAGE_SIZE);

impl Message {
    /// A message of the given type with an all-zero payload.
    pub fn new(mtype: i32) -> Self {
        Message {
            source: 0,
            mtype,
            payload: [0; PAYLOAD_SIZE],
        }
    }

    /// A message whose payload is the byte image of `body`.
    pub fn with_payload<T: IntoBytes + Immutable>(mtype: i32, body: &T) -> Self {
        let mut msg = Message::new(mtype);
        let bytes = body.as_bytes();
        debug_assert!(bytes.len() <= PAYLOAD_SIZE);
        msg.payload[..bytes.len()].copy_from_slice(bytes);
        msg
    }

    /// Reads a typed record back out of the payload prefix.
    pub fn decode<T: FromBytes>(&self) -> Result<T> {
        match T::read_from_prefix(&self.payload) {
            Ok((body, _)) => Ok(body),
            Err(_) => Err(Error::with_message(
                Errno::EBADCALL,
                "payload too short for the request type",
            )),
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::new(0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Message")
            .field("source", &self.source)
            .field("mtype", &self.mtype)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ipc::wire::LseekRequest;

    #[test]
    fn typed_payloads_round_trip() {
        let req = LseekRequest {
            offset: -8,
            fd: 3,
            whence: 2,
        };
        let msg = Message::with_payload(crate::ipc::msg::VFS_LSEEK, &req);
        let back: LseekRequest = msg.decode().unwrap();
        assert_eq!(back.offset, -8);
        assert_eq!(back.fd, 3);
        assert_eq!(back.whence, 2);
    }
}
