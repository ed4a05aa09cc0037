// SPDX-License-Identifier: MPL-2.0

//! The Memory Manager (PID 4).
//!
//! Tracks each process's heap break, its non-heap mappings and the
//! System-V shared-memory segments. Page-table truth lives in the
//! kernel's VMA trees; this server owns the policy bookkeeping and asks
//! the kernel to adjust mappings. Requests are messages in the 300-399
//! range.

use hashbrown::HashMap;
use lattice_frame::mm::{is_page_aligned, page_align_up, Frame};

use crate::ipc::wire::*;
use crate::ipc::{msg, Message};
use crate::nucleus::Nucleus;
use crate::prelude::*;
use crate::process::{Pid, PM_PID};
use crate::vm::{VmaFlags, VmaType, HEAP_BASE, HEAP_MAX_SIZE};

/// One tracked mapping of one process.
#[derive(Clone, Debug)]
struct Region {
    start: Vaddr,
    len: usize,
    prot: u32,
    flags: u32,
    shmid: Option<i32>,
}

impl Region {
    fn end(&self) -> Vaddr {
        self.start + self.len
    }
}

/// Per-process state.
struct MmProcess {
    heap_start: Vaddr,
    heap_break: Vaddr,
    heap_max: Vaddr,
    regions: Vec<Region>,
}

impl MmProcess {
    fn new() -> Self {
        MmProcess {
            heap_start: HEAP_BASE,
            heap_break: HEAP_BASE,
            heap_max: HEAP_BASE + HEAP_MAX_SIZE,
            regions: Vec::new(),
        }
    }
}

/// A System-V shared-memory segment.
struct ShmSegment {
    key: i32,
    size: usize,
    mode: u32,
    owner_uid: u32,
    owner_gid: u32,
    attach_count: u32,
    frames: Vec<Frame>,
    removed: bool,
}

/// The server state machine.
pub struct MmServer {
    procs: HashMap<Pid, MmProcess>,
    segs: BTreeMap<i32, ShmSegment>,
    next_shmid: i32,
}

impl MmServer {
    pub fn new() -> Self {
        MmServer {
            procs: HashMap::new(),
            segs: BTreeMap::new(),
            next_shmid: 1,
        }
    }

    /// Handles one request; `None` only for trusted notices and stray
    /// replies.
    pub fn handle(&mut self, nc: &mut Nucleus, msg: &Message) -> Option<Message> {
        if msg::is_reply(msg.mtype) {
            return None;
        }
        let caller = msg.source;
        match msg.mtype {
            msg::MM_INHERIT => {
                if caller == PM_PID {
                    if let Ok(req) = msg.decode::<MmInheritRequest>() {
                        self.inherit(req.parent, req.child);
                    }
                }
                None
            }
            msg::MM_RELEASE => {
                if caller == PM_PID {
                    if let Ok(req) = msg.decode::<MmReleaseRequest>() {
                        self.release(req.pid);
                    }
                }
                None
            }
            msg::MM_BRK => Some(match msg.decode::<BrkRequest>() {
                Ok(req) => self.do_brk(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_MMAP => Some(match msg.decode::<MmapRequest>() {
                Ok(req) => self.do_mmap(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_MUNMAP => Some(match msg.decode::<MunmapRequest>() {
                Ok(req) => self.do_munmap(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_MPROTECT => Some(match msg.decode::<MprotectRequest>() {
                Ok(req) => self.do_mprotect(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_SHMGET => Some(match msg.decode::<ShmgetRequest>() {
                Ok(req) => self.do_shmget(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_SHMAT => Some(match msg.decode::<ShmatRequest>() {
                Ok(req) => self.do_shmat(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_SHMDT => Some(match msg.decode::<ShmdtRequest>() {
                Ok(req) => self.do_shmdt(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_SHMCTL => Some(match msg.decode::<ShmctlRequest>() {
                Ok(req) => self.do_shmctl(nc, caller, req),
                Err(e) => error_reply(e.error()),
            }),
            msg::MM_GETPAGESIZE => Some(reply_value(PAGE_SIZE as i64)),
            // Declared but not implemented.
            msg::MM_MSYNC | msg::MM_MLOCK | msg::MM_MUNLOCK | msg::MM_MADVISE => {
                Some(reply_err(Errno::ENOSYS))
            }
            _ => Some(error_reply(Errno::ENOSYS)),
        }
    }

    fn proc_state(&mut self, pid: Pid) -> &mut MmProcess {
        self.procs.entry(pid).or_insert_with(MmProcess::new)
    }

    fn inherit(&mut self, parent: Pid, child: Pid) {
        let copy = {
            let p = self.proc_state(parent);
            MmProcess {
                heap_start: p.heap_start,
                heap_break: p.heap_break,
                heap_max: p.heap_max,
                regions: p.regions.clone(),
            }
        };
        // The child shares the parent's attachments.
        for region in &copy.regions {
            if let Some(shmid) = region.shmid {
                if let Some(seg) = self.segs.get_mut(&shmid) {
                    seg.attach_count += 1;
                }
            }
        }
        self.procs.insert(child, copy);
    }

    fn release(&mut self, pid: Pid) {
        let Some(state) = self.procs.remove(&pid) else {
            return;
        };
        for region in &state.regions {
            if let Some(shmid) = region.shmid {
                self.detach_segment(shmid);
            }
        }
    }

    fn detach_segment(&mut self, shmid: i32) {
        if let Some(seg) = self.segs.get_mut(&shmid) {
            seg.attach_count = seg.attach_count.saturating_sub(1);
            if seg.removed && seg.attach_count == 0 {
                self.segs.remove(&shmid);
            }
        }
    }

    /* ---- heap ---- */

    fn do_brk(&mut self, nc: &mut Nucleus, caller: Pid, req: BrkRequest) -> Message {
        let state = self.procs.entry(caller).or_insert_with(MmProcess::new);
        if req.brk == 0 {
            return Message::with_payload(msg::MM_REPLY, &BrkResponse::ok(state.heap_break as u64));
        }
        let new_break = req.brk as Vaddr;
        if new_break < state.heap_start || new_break > state.heap_max {
            return Message::with_payload(msg::MM_REPLY, &BrkResponse::err(Errno::ENOMEM));
        }
        let Some(pcb) = nc.procs.lookup_mut(caller) else {
            return Message::with_payload(msg::MM_REPLY, &BrkResponse::err(Errno::ESRCH));
        };
        let old_end = page_align_up(state.heap_break);
        let new_end = page_align_up(new_break);
        if new_end > old_end {
            let grown = pcb.vm.mmap(
                Some(old_end),
                new_end - old_end,
                VmaFlags::READ | VmaFlags::WRITE | VmaFlags::PRIVATE | VmaFlags::ANONYMOUS,
                VmaType::Heap,
            );
            if let Err(e) = grown {
                return Message::with_payload(msg::MM_REPLY, &BrkResponse::err(e.error()));
            }
        } else if new_end < old_end {
            let _ = pcb.vm.munmap(new_end, old_end - new_end);
        }
        state.heap_break = new_break;
        Message::with_payload(msg::MM_REPLY, &BrkResponse::ok(new_break as u64))
    }

    /* ---- mappings ---- */

    fn do_mmap(&mut self, nc: &mut Nucleus, caller: Pid, req: MmapRequest) -> Message {
        if req.length == 0 {
            return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::EINVAL));
        }
        if req.flags & MAP_ANONYMOUS == 0 || req.fd != -1 {
            // File-backed mappings need VFS integration the ramfs phase
            // does not have.
            return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::ENOSYS));
        }
        let length = page_align_up(req.length as usize);
        let fixed = req.flags & MAP_FIXED != 0;
        let addr = if fixed {
            if !is_page_aligned(req.addr as usize) {
                return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::EINVAL));
            }
            Some(req.addr as Vaddr)
        } else {
            None
        };
        let mut flags = prot_to_flags(req.prot);
        flags |= if req.flags & MAP_SHARED != 0 {
            VmaFlags::SHARED
        } else {
            VmaFlags::PRIVATE
        };
        flags |= VmaFlags::ANONYMOUS;

        let Some(pcb) = nc.procs.lookup_mut(caller) else {
            return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::ESRCH));
        };
        match pcb.vm.mmap(addr, length, flags, VmaType::Mapped) {
            Ok(base) => {
                self.proc_state(caller).regions.push(Region {
                    start: base,
                    len: length,
                    prot: req.prot,
                    flags: req.flags,
                    shmid: None,
                });
                Message::with_payload(msg::MM_REPLY, &MmapResponse::ok(base as u64))
            }
            Err(e) => Message::with_payload(msg::MM_REPLY, &MmapResponse::err(e.error())),
        }
    }

    fn do_munmap(&mut self, nc: &mut Nucleus, caller: Pid, req: MunmapRequest) -> Message {
        let addr = req.addr as Vaddr;
        let length = req.length as usize;
        if !is_page_aligned(addr) || length == 0 {
            return reply_err(Errno::EINVAL);
        }
        let end = addr + page_align_up(length);
        let state = self.procs.entry(caller).or_insert_with(MmProcess::new);
        // Shared-memory attachments come off with SHMDT, not munmap.
        if state
            .regions
            .iter()
            .any(|r| r.shmid.is_some() && r.start < end && addr < r.end())
        {
            return reply_err(Errno::EINVAL);
        }
        let Some(pcb) = nc.procs.lookup_mut(caller) else {
            return reply_err(Errno::ESRCH);
        };
        if let Err(e) = pcb.vm.munmap(addr, length) {
            return reply_err(e.error());
        }
        // Trim the bookkeeping: drop covered regions, split straddlers.
        let mut kept = Vec::with_capacity(state.regions.len());
        for region in state.regions.drain(..) {
            if region.end() <= addr || region.start >= end {
                kept.push(region);
                continue;
            }
            if region.start < addr {
                kept.push(Region {
                    len: addr - region.start,
                    ..region.clone()
                });
            }
            if region.end() > end {
                kept.push(Region {
                    start: end,
                    len: region.end() - end,
                    ..region.clone()
                });
            }
        }
        state.regions = kept;
        reply_value(0)
    }

    fn do_mprotect(&mut self, nc: &mut Nucleus, caller: Pid, req: MprotectRequest) -> Message {
        let addr = req.addr as Vaddr;
        let length = req.length as usize;
        if !is_page_aligned(addr) || length == 0 {
            return reply_err(Errno::EINVAL);
        }
        let end = addr + page_align_up(length);
        let state = self.procs.entry(caller).or_insert_with(MmProcess::new);
        let covered = state.regions.iter().any(|r| r.start <= addr && end <= r.end())
            || (addr >= state.heap_start && end <= page_align_up(state.heap_break));
        if !covered {
            return reply_err(Errno::EINVAL);
        }
        let Some(pcb) = nc.procs.lookup_mut(caller) else {
            return reply_err(Errno::ESRCH);
        };
        match pcb.vm.mprotect(addr, length, prot_to_flags(req.prot)) {
            Ok(()) => {
                for region in state.regions.iter_mut() {
                    if region.start <= addr && end <= region.end() {
                        region.prot = req.prot;
                    }
                }
                reply_value(0)
            }
            Err(e) => reply_err(e.error()),
        }
    }

    /* ---- shared memory ---- */

    fn do_shmget(&mut self, nc: &mut Nucleus, caller: Pid, req: ShmgetRequest) -> Message {
        if req.size == 0 {
            return Message::with_payload(msg::MM_REPLY, &ShmgetResponse {
                shmid: -1,
                error: Errno::EINVAL.as_i32(),
            });
        }
        let size = page_align_up(req.size as usize);
        if req.key != IPC_PRIVATE {
            if let Some((&shmid, seg)) = self.segs.iter().find(|(_, s)| s.key == req.key && !s.removed) {
                if req.flags & IPC_CREAT != 0 && req.flags & IPC_EXCL != 0 {
                    return Message::with_payload(msg::MM_REPLY, &ShmgetResponse {
                        shmid: -1,
                        error: Errno::EEXIST.as_i32(),
                    });
                }
                if size > seg.size {
                    return Message::with_payload(msg::MM_REPLY, &ShmgetResponse {
                        shmid: -1,
                        error: Errno::EINVAL.as_i32(),
                    });
                }
                return Message::with_payload(msg::MM_REPLY, &ShmgetResponse { shmid, error: 0 });
            }
            if req.flags & IPC_CREAT == 0 {
                return Message::with_payload(msg::MM_REPLY, &ShmgetResponse {
                    shmid: -1,
                    error: Errno::ENOENT.as_i32(),
                });
            }
        }

        let mut frames = Vec::with_capacity(size / PAGE_SIZE);
        for _ in 0..size / PAGE_SIZE {
            match Frame::alloc() {
                Some(frame) => frames.push(frame),
                None => {
                    return Message::with_payload(msg::MM_REPLY, &ShmgetResponse {
                        shmid: -1,
                        error: Errno::ENOMEM.as_i32(),
                    })
                }
            }
        }
        let creds = nc
            .procs
            .lookup(caller)
            .map(|p| p.creds)
            .unwrap_or(crate::process::Credentials::root());
        let shmid = self.next_shmid;
        self.next_shmid += 1;
        self.segs.insert(
            shmid,
            ShmSegment {
                key: req.key,
                size,
                mode: (req.flags as u32) & 0o777,
                owner_uid: creds.euid,
                owner_gid: creds.egid,
                attach_count: 0,
                frames,
                removed: false,
            },
        );
        Message::with_payload(msg::MM_REPLY, &ShmgetResponse { shmid, error: 0 })
    }

    fn do_shmat(&mut self, nc: &mut Nucleus, caller: Pid, req: ShmatRequest) -> Message {
        let Some(seg) = self.segs.get(&req.shmid) else {
            return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::EINVAL));
        };
        if seg.removed {
            return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::EINVAL));
        }
        let addr = match req.addr {
            0 => None,
            hint if req.flags & SHM_RND != 0 => {
                Some(lattice_frame::mm::page_align_down(hint as usize))
            }
            hint => {
                if !is_page_aligned(hint as usize) {
                    return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::EINVAL));
                }
                Some(hint as Vaddr)
            }
        };
        let writable = req.flags & SHM_RDONLY == 0;
        let Some(pcb) = nc.procs.lookup_mut(caller) else {
            return Message::with_payload(msg::MM_REPLY, &MmapResponse::err(Errno::ESRCH));
        };
        let frames = &self.segs.get(&req.shmid).unwrap().frames;
        match pcb.vm.map_shared_frames(addr, frames, writable) {
            Ok(base) => {
                let seg = self.segs.get_mut(&req.shmid).unwrap();
                seg.attach_count += 1;
                let len = seg.size;
                self.proc_state(caller).regions.push(Region {
                    start: base,
                    len,
                    prot: if writable { PROT_READ | PROT_WRITE } else { PROT_READ },
                    flags: MAP_SHARED,
                    shmid: Some(req.shmid),
                });
                Message::with_payload(msg::MM_REPLY, &MmapResponse::ok(base as u64))
            }
            Err(e) => Message::with_payload(msg::MM_REPLY, &MmapResponse::err(e.error())),
        }
    }

    fn do_shmdt(&mut self, nc: &mut Nucleus, caller: Pid, req: ShmdtRequest) -> Message {
        let addr = req.addr as Vaddr;
        let state = self.procs.entry(caller).or_insert_with(MmProcess::new);
        let Some(pos) = state
            .regions
            .iter()
            .position(|r| r.start == addr && r.shmid.is_some())
        else {
            return reply_err(Errno::EINVAL);
        };
        let region = state.regions.remove(pos);
        let shmid = region.shmid.expect("matched on shmid presence");
        if let Some(pcb) = nc.procs.lookup_mut(caller) {
            let _ = pcb.vm.munmap(region.start, region.len);
        }
        self.detach_segment(shmid);
        reply_value(0)
    }

    fn do_shmctl(&mut self, nc: &mut Nucleus, caller: Pid, req: ShmctlRequest) -> Message {
        if req.cmd != IPC_RMID {
            return reply_err(Errno::EINVAL);
        }
        let creds = nc.procs.lookup(caller).map(|p| p.creds);
        let Some(seg) = self.segs.get_mut(&req.shmid) else {
            return reply_err(Errno::EINVAL);
        };
        let allowed = creds.is_some_and(|c| c.is_superuser() || c.euid == seg.owner_uid);
        if !allowed {
            return reply_err(Errno::EPERM);
        }
        seg.removed = true;
        if seg.attach_count == 0 {
            self.segs.remove(&req.shmid);
        }
        reply_value(0)
    }

    /// Test support: a segment's live attach count, if it still exists.
    pub fn attach_count(&self, shmid: i32) -> Option<u32> {
        self.segs.get(&shmid).map(|s| s.attach_count)
    }
}

impl Default for MmServer {
    fn default() -> Self {
        Self::new()
    }
}

fn prot_to_flags(prot: u32) -> VmaFlags {
    let mut flags = VmaFlags::empty();
    if prot & PROT_READ != 0 {
        flags |= VmaFlags::READ;
    }
    if prot & PROT_WRITE != 0 {
        flags |= VmaFlags::WRITE;
    }
    if prot & PROT_EXEC != 0 {
        flags |= VmaFlags::EXEC;
    }
    flags
}

fn reply_value(value: i64) -> Message {
    Message::with_payload(msg::MM_REPLY, &GenericResponse::ok(value))
}

fn reply_err(errno: Errno) -> Message {
    Message::with_payload(msg::MM_REPLY, &GenericResponse::err(errno))
}

fn error_reply(errno: Errno) -> Message {
    Message::with_payload(msg::MM_ERROR, &GenericResponse::err(errno))
}
