// SPDX-License-Identifier: MPL-2.0

#![allow(unused)]

pub(crate) use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet, VecDeque},
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::fmt::Debug;

pub(crate) use bitflags::bitflags;
pub(crate) use lattice_frame::{
    config::PAGE_SIZE,
    mm::{Paddr, Vaddr},
    sync::{SpinLock, SpinLockGuard},
};
pub(crate) use log::{debug, error, info, trace, warn};

pub(crate) use crate::error::{Errno, Error};
pub(crate) use crate::{return_errno, return_errno_with_message};

pub(crate) type Result<T> = core::result::Result<T, Error>;
