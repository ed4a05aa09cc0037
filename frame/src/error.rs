// SPDX-License-Identifier: MPL-2.0

/// The error type of the substrate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The physical frame pool is exhausted.
    NoMemory,
    /// Arguments out of range or misaligned.
    InvalidArgs,
    /// The requested virtual address is not mapped.
    NotMapped,
    /// The requested virtual address is already mapped.
    AlreadyMapped,
}
