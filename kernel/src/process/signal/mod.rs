// SPDX-License-Identifier: MPL-2.0

//! Signal state: numbers, sets, dispositions and the frames built for
//! user handlers.
//!
//! The Process Manager owns the policy (who may signal whom); the kernel
//! owns the mechanics here. Pending bits are delivered when the target
//! next returns to user mode — a blocked send is never interrupted, only
//! a receive from ANY.

mod sig_action;
mod sig_set;

pub use sig_action::{default_action, SigAction, SigDefaultAction};
pub use sig_set::SigSet;

use lattice_frame::cpu::UserContext;

use crate::prelude::*;

/// Size of the disposition table; valid signal numbers are 1..=63.
pub const NSIG: usize = 64;

pub const SIGHUP: u8 = 1;
pub const SIGINT: u8 = 2;
pub const SIGQUIT: u8 = 3;
pub const SIGILL: u8 = 4;
pub const SIGABRT: u8 = 6;
pub const SIGFPE: u8 = 8;
pub const SIGKILL: u8 = 9;
pub const SIGUSR1: u8 = 10;
pub const SIGSEGV: u8 = 11;
pub const SIGUSR2: u8 = 12;
pub const SIGPIPE: u8 = 13;
pub const SIGALRM: u8 = 14;
pub const SIGTERM: u8 = 15;
pub const SIGCHLD: u8 = 17;
pub const SIGCONT: u8 = 18;
pub const SIGSTOP: u8 = 19;
pub const SIGTSTP: u8 = 20;

/// Checks a wire-supplied signal number.
pub fn valid_signo(signo: i32) -> Result<u8> {
    if (1..NSIG as i32).contains(&signo) {
        Ok(signo as u8)
    } else {
        return_errno_with_message!(Errno::EINVAL, "signal number out of range")
    }
}

/// The 64-entry disposition table of one process.
#[derive(Clone)]
pub struct SigDispositions([SigAction; NSIG]);

impl SigDispositions {
    pub fn new() -> Self {
        SigDispositions([SigAction::Dfl; NSIG])
    }

    pub fn get(&self, signo: u8) -> SigAction {
        self.0[signo as usize]
    }

    pub fn set(&mut self, signo: u8, action: SigAction) -> SigAction {
        core::mem::replace(&mut self.0[signo as usize], action)
    }
}

impl Default for SigDispositions {
    fn default() -> Self {
        Self::new()
    }
}

/// The interrupted context stashed while a handler runs.
#[derive(Clone, Copy)]
pub struct SavedSigContext {
    pub ctx: UserContext,
    pub blocked: SigSet,
}

/// All signal state of one process.
#[derive(Clone)]
pub struct SignalState {
    pub dispositions: SigDispositions,
    pub pending: SigSet,
    pub blocked: SigSet,
    /// Set while a user handler is running, consumed by sigreturn.
    pub saved: Option<SavedSigContext>,
}

impl SignalState {
    pub fn new() -> Self {
        SignalState {
            dispositions: SigDispositions::new(),
            pending: SigSet::empty(),
            blocked: SigSet::empty(),
            saved: None,
        }
    }

    /// The lowest-numbered deliverable signal, if any.
    pub fn next_deliverable(&self) -> Option<u8> {
        let deliverable = self.pending.difference(self.blocked);
        deliverable.lowest()
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blocked_signals_are_not_deliverable() {
        let mut sig = SignalState::new();
        sig.pending.add(SIGUSR1);
        sig.pending.add(SIGTERM);
        sig.blocked.add(SIGUSR1);
        assert_eq!(sig.next_deliverable(), Some(SIGTERM));
        sig.blocked.remove(SIGUSR1);
        assert_eq!(sig.next_deliverable(), Some(SIGUSR1));
    }

    #[test]
    fn signo_validation() {
        assert!(valid_signo(0).is_err());
        assert!(valid_signo(64).is_err());
        assert_eq!(valid_signo(9).unwrap(), 9);
    }
}
