// SPDX-License-Identifier: MPL-2.0

//! Shared fixtures for the unit tests.

/// Gives the tests a hosted frame pool. Idempotent, and cheap after the
/// first call.
pub(crate) fn setup() {
    lattice_frame::mm::frame_allocator::init_hosted(8192);
}
