// SPDX-License-Identifier: MPL-2.0

use super::sig_set::SigSet;
use super::{
    SIGABRT, SIGCHLD, SIGCONT, SIGFPE, SIGILL, SIGQUIT, SIGSEGV, SIGSTOP, SIGTSTP,
};
use crate::ipc::wire::{SIG_DFL, SIG_IGN};
use crate::prelude::*;

/// What a process wants done with one signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SigAction {
    #[default]
    Dfl,
    Ign,
    Handler {
        addr: Vaddr,
        flags: u32,
        mask: SigSet,
    },
}

impl SigAction {
    /// Decodes the wire encoding: 0 default, 1 ignore, anything else a
    /// handler address.
    pub fn from_wire(handler: u64, flags: u32, mask: u64) -> Self {
        match handler {
            SIG_DFL => SigAction::Dfl,
            SIG_IGN => SigAction::Ign,
            addr => SigAction::Handler {
                addr: addr as Vaddr,
                flags,
                mask: SigSet::from_bits(mask),
            },
        }
    }

    /// The wire encoding of this disposition.
    pub fn to_wire(&self) -> u64 {
        match self {
            SigAction::Dfl => SIG_DFL,
            SigAction::Ign => SIG_IGN,
            SigAction::Handler { addr, .. } => *addr as u64,
        }
    }
}

/// The default action of a signal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SigDefaultAction {
    /// Terminate the process.
    Term,
    /// Drop the signal.
    Ign,
    /// Terminate; a fuller system would also dump core.
    Core,
    /// Stop the process.
    Stop,
    /// Continue the process if it is currently stopped.
    Cont,
}

/// The conventional default-action table.
pub fn default_action(signo: u8) -> SigDefaultAction {
    match signo {
        SIGQUIT | SIGILL | SIGABRT | SIGFPE | SIGSEGV => SigDefaultAction::Core,
        SIGCHLD => SigDefaultAction::Ign,
        SIGCONT => SigDefaultAction::Cont,
        SIGSTOP | SIGTSTP => SigDefaultAction::Stop,
        _ => SigDefaultAction::Term,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wire_encoding_round_trips() {
        let action = SigAction::from_wire(0x7000_1000, 0, 0xff);
        assert_eq!(action.to_wire(), 0x7000_1000);
        assert_eq!(SigAction::from_wire(SIG_IGN, 0, 0), SigAction::Ign);
        assert_eq!(SigAction::from_wire(SIG_DFL, 0, 0).to_wire(), SIG_DFL);
    }

    #[test]
    fn chld_is_ignored_and_segv_is_fatal_by_default() {
        assert_eq!(default_action(SIGCHLD), SigDefaultAction::Ign);
        assert_eq!(default_action(SIGSEGV), SigDefaultAction::Core);
    }
}
