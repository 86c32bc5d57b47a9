//! TSTP frame buffer pool
//!
//! A fixed set of frame buffers shared between upper layers and the MAC.
//! Buffers are seized from a rotating cursor, filled through the codec,
//! submitted with a deadline and freed once transmitted, expired or
//! pre-empted by a neighbour's transmission of the same message.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;
use log::{debug, trace, warn};
use rand_core::RngCore;

use crate::Time;
use crate::dispatch::Protocol;
use crate::schedule::{Entry, Schedule};
use crate::timer::Timer;
use crate::tstp::{Coordinates, Microframe, MTU, microframe::ID_MASK};

bitflags::bitflags! {
    /// Buffer state flags
    pub struct BufferFlags: u8 {
        /// Buffer is seized by an owner
        const LOCKED     = 1 << 0;
        /// Buffer holds an outgoing frame
        const TX         = 1 << 1;
        /// Buffer holds a received frame
        const RX         = 1 << 2;
        /// Buffer holds a microframe
        const MICROFRAME = 1 << 3;
    }
}

/// Reference to a seized buffer.
///
/// Handles carry the generation of the seize they were issued for, so a
/// handle kept past `release` no longer matches the reused buffer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferHandle {
    index: u8,
    generation: u16,
}

impl BufferHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Frame buffer with transmit / receive metadata
#[derive(Clone, Debug)]
pub struct Buffer {
    /// 15-bit message id
    pub id: u16,
    /// Protocol the frame belongs to
    pub protocol: Protocol,
    /// Destination of an outgoing frame
    pub destination: Coordinates,
    /// Allocation time for outgoing frames, SFD timestamp for received frames
    pub sfd: Time,

    flags: BufferFlags,
    size: usize,
    deadline: Time,
    offset_us: u64,
    next: Option<u8>,
    generation: u16,
    frame: [u8; MTU],
}

impl Buffer {
    fn empty() -> Self {
        Self {
            id: 0,
            protocol: Protocol::TSTP,
            destination: Coordinates::default(),
            sfd: 0,
            flags: BufferFlags::empty(),
            size: 0,
            deadline: 0,
            offset_us: 0,
            next: None,
            generation: 0,
            frame: [0u8; MTU],
        }
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn deadline(&self) -> Time {
        self.deadline
    }

    pub fn offset_us(&self) -> u64 {
        self.offset_us
    }

    pub fn frame(&self) -> &[u8] {
        &self.frame[..self.size]
    }

    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.frame[..self.size]
    }

    fn is_locked(&self) -> bool {
        self.flags.contains(BufferFlags::LOCKED)
    }
}

/// Slots kept for the MAC beyond the `N` producer buffers
const MICROFRAME_SLOT: usize = 0;
const RECEIVE_SLOT: usize = 1;
const RESERVED: usize = 2;

struct Inner<G, const N: usize> {
    slots: [Buffer; N],
    reserved: [Buffer; RESERVED],
    schedule: Schedule<N>,
    pending: Option<u8>,
    cursor: usize,
    rng: G,
    expired: u32,
}

impl <G: RngCore, const N: usize> Inner<G, N> {
    fn get(&self, index: usize) -> Option<&Buffer> {
        match index < N {
            true => self.slots.get(index),
            false => self.reserved.get(index - N),
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut Buffer> {
        match index < N {
            true => self.slots.get_mut(index),
            false => self.reserved.get_mut(index - N),
        }
    }

    fn buf(&self, index: u8) -> &Buffer {
        let i = index as usize;
        match i < N {
            true => &self.slots[i],
            false => &self.reserved[i - N],
        }
    }

    fn buf_mut(&mut self, index: u8) -> &mut Buffer {
        let i = index as usize;
        match i < N {
            true => &mut self.slots[i],
            false => &mut self.reserved[i - N],
        }
    }

    fn buffers(&self) -> impl Iterator<Item=&Buffer> {
        self.slots.iter().chain(self.reserved.iter())
    }

    fn slot(&self, h: BufferHandle) -> Option<&Buffer> {
        self.get(h.index()).filter(|b| b.is_locked() && b.generation == h.generation)
    }

    fn slot_mut(&mut self, h: BufferHandle) -> Option<&mut Buffer> {
        self.get_mut(h.index()).filter(|b| b.is_locked() && b.generation == h.generation)
    }

    fn handle(&self, index: u8) -> BufferHandle {
        BufferHandle{ index, generation: self.buf(index).generation }
    }

    /// Lock a free slot and reset its metadata
    fn lock(&mut self, index: u8) -> Option<u8> {
        let b = self.buf_mut(index);
        if b.is_locked() {
            return None;
        }

        b.flags = BufferFlags::LOCKED;
        b.generation = b.generation.wrapping_add(1);
        b.next = None;
        b.deadline = 0;
        b.offset_us = 0;
        b.size = 0;
        b.id = 0;

        Some(index)
    }

    /// Attempt to lock the producer slot under the cursor, advancing the cursor
    fn seize(&mut self) -> Option<u8> {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % N;

        self.lock(index as u8)
    }

    /// Free a buffer and every buffer chained behind it
    fn free_chain(&mut self, index: u8) {
        let mut cur = Some(index);

        while let Some(i) = cur {
            if !self.buf(i).is_locked() {
                break;
            }

            for b in self.slots.iter_mut().chain(self.reserved.iter_mut()) {
                if b.next == Some(i) {
                    b.next = None;
                }
            }

            self.schedule.remove(i);
            if self.pending == Some(i) {
                self.pending = None;
            }

            let b = self.buf_mut(i);
            cur = b.next.take();
            b.flags = BufferFlags::empty();
        }
    }

    fn expire(&mut self, index: u8) {
        let b = self.buf(index);
        warn!("Deadline miss for message {:04x} (deadline: {})", b.id, b.deadline);

        self.expired = self.expired.saturating_add(1);
        self.free_chain(index);
    }
}

/// Pool of `N` frame buffers with a deadline ordered transmit schedule.
///
/// The pool is shared by reference between the MAC and upper layers, all
/// state is guarded by critical sections. Producers may hold all `N`
/// buffers, the MAC has two more of its own for the outgoing microframe
/// and incoming frames so backpressure never stalls the radio.
pub struct BufferPool<T, G, const N: usize> {
    timer: T,
    inner: Mutex<RefCell<Inner<G, N>>>,
}

impl <T, G, const N: usize> BufferPool<T, G, N>
where
    T: Timer,
    G: RngCore,
{
    /// Buffer indices are carried in a byte
    const INDEX_FITS: () = assert!(N + RESERVED <= u8::MAX as usize, "buffer pools are limited to 253 entries");

    /// Create a pool with every buffer free, `rng` supplies message ids
    pub fn new(timer: T, rng: G) -> Self {
        let () = Self::INDEX_FITS;

        Self {
            timer,
            inner: Mutex::new(RefCell::new(Inner {
                slots: core::array::from_fn(|_| Buffer::empty()),
                reserved: core::array::from_fn(|_| Buffer::empty()),
                schedule: Schedule::new(),
                pending: None,
                cursor: 0,
                rng,
                expired: 0,
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner<G, N>) -> R) -> R {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            f(&mut inner)
        })
    }

    /// Seize a buffer for an outgoing frame of `once + always + payload` bytes.
    ///
    /// Blocks until a buffer is released when the pool is exhausted, returns
    /// `None` only if the frame could never fit the MTU.
    pub fn allocate(&self, destination: Coordinates, protocol: Protocol, once: usize, always: usize, payload: usize) -> Option<BufferHandle> {
        let size = once.checked_add(always)?.checked_add(payload)?;
        if size > MTU || N == 0 {
            return None;
        }

        loop {
            if let Some(h) = self.try_allocate(destination, protocol, once, always, payload) {
                return Some(h);
            }
            core::hint::spin_loop();
        }
    }

    /// Seize a buffer for an outgoing frame, giving up after one pass over the pool
    pub fn try_allocate(&self, destination: Coordinates, protocol: Protocol, once: usize, always: usize, payload: usize) -> Option<BufferHandle> {
        let size = once.checked_add(always)?.checked_add(payload)?;
        if size > MTU {
            return None;
        }

        let now = self.timer.now();

        // Each slot is tried in its own critical section so interrupts
        // can free buffers while we scan
        for _ in 0..N {
            let h = self.with_inner(|inner| {
                let index = inner.seize()?;
                let id = inner.rng.next_u32() as u16 & ID_MASK;

                let b = inner.buf_mut(index);
                b.flags |= BufferFlags::TX;
                b.id = id;
                b.size = size;
                b.protocol = protocol;
                b.destination = destination;
                b.sfd = now;
                b.frame[..size].fill(0);

                Some(inner.handle(index))
            });

            if let Some(h) = h {
                trace!("Allocated buffer {} ({} bytes)", h.index, size);
                return Some(h);
            }
        }

        None
    }

    /// Seize a buffer for a received frame.
    ///
    /// The MAC's receive slot is tried first, then one pass over the
    /// producer buffers.
    pub(crate) fn receive(&self, frame: &[u8], sfd: Time, microframe: bool) -> Option<BufferHandle> {
        if frame.len() > MTU {
            return None;
        }

        for attempt in 0..=N {
            let h = self.with_inner(|inner| {
                let index = match attempt {
                    0 => inner.lock((N + RECEIVE_SLOT) as u8)?,
                    _ => inner.seize()?,
                };

                let b = inner.buf_mut(index);
                b.flags |= BufferFlags::RX;
                if microframe {
                    b.flags |= BufferFlags::MICROFRAME;
                }
                b.size = frame.len();
                b.sfd = sfd;
                b.protocol = Protocol::TSTP;
                b.destination = Coordinates::default();
                b.frame[..frame.len()].copy_from_slice(frame);

                Some(inner.handle(index))
            });

            if h.is_some() {
                return h;
            }
        }

        None
    }

    /// Schedule a seized buffer for transmission, returning the frame size.
    ///
    /// `offset_us` delays the start of the transmission within the wake-up
    /// cycle it is picked up in.
    pub fn submit(&self, handle: BufferHandle, deadline: Time, offset_us: u64) -> Option<usize> {
        self.with_inner(|inner| {
            let b = inner.slot_mut(handle)?;
            b.deadline = deadline;
            b.offset_us = offset_us;
            b.flags |= BufferFlags::TX;
            let size = b.size;

            inner.schedule.remove(handle.index);
            inner.schedule.insert(Entry{ slot: handle.index, deadline }).ok()?;

            debug!("Submitted buffer {} (deadline: {}, size: {})", handle.index, deadline, size);

            Some(size)
        })
    }

    /// Allocate, fill and submit a frame in one call, returning the frame size
    pub fn send(&self, destination: Coordinates, protocol: Protocol, frame: &[u8], deadline: Time, offset_us: u64) -> Option<usize> {
        let h = self.allocate(destination, protocol, 0, 0, frame.len())?;

        self.with_mut(h, |b| b.frame_mut().copy_from_slice(frame))?;

        let n = self.submit(h, deadline, offset_us);
        if n.is_none() {
            self.release(h);
        }
        n
    }

    /// Free a buffer along with any buffers chained to it.
    ///
    /// Releasing a free buffer or a stale handle does nothing.
    pub fn release(&self, handle: BufferHandle) {
        self.with_inner(|inner| {
            if inner.slot(handle).is_some() {
                trace!("Releasing buffer {}", handle.index);
                inner.free_chain(handle.index);
            }
        })
    }

    /// Access a seized buffer.
    ///
    /// The closure runs on a copy taken under the pool lock, so it may call
    /// back into the pool.
    pub fn with<R>(&self, handle: BufferHandle, f: impl FnOnce(&Buffer) -> R) -> Option<R> {
        let b = self.with_inner(|inner| inner.slot(handle).cloned())?;
        Some(f(&b))
    }

    /// Mutably access a seized buffer.
    ///
    /// The closure runs on a copy outside the pool lock and may call back
    /// into the pool. The id, protocol, destination, sfd and frame are then
    /// written back, unless the buffer was released in the meantime in
    /// which case `None` is returned.
    pub fn with_mut<R>(&self, handle: BufferHandle, f: impl FnOnce(&mut Buffer) -> R) -> Option<R> {
        let mut b = self.with_inner(|inner| inner.slot(handle).cloned())?;
        let r = f(&mut b);

        self.with_inner(|inner| {
            let s = inner.slot_mut(handle)?;
            s.id = b.id;
            s.protocol = b.protocol;
            s.destination = b.destination;
            s.sfd = b.sfd;
            s.frame = b.frame;
            Some(())
        })?;

        Some(r)
    }

    /// Number of seized buffers, including those held by the MAC
    pub fn locked(&self) -> usize {
        self.with_inner(|inner| inner.buffers().filter(|b| b.is_locked()).count())
    }

    /// Number of buffers waiting in the transmit schedule
    pub fn scheduled(&self) -> usize {
        self.with_inner(|inner| inner.schedule.len())
    }

    /// Number of buffers freed for missing their deadline
    pub fn expired(&self) -> u32 {
        self.with_inner(|inner| inner.expired)
    }

    /// Buffer currently being transmitted by the MAC
    pub fn pending(&self) -> Option<BufferHandle> {
        self.with_inner(|inner| inner.pending.map(|i| inner.handle(i)))
    }

    /// Select the pending transmission.
    ///
    /// Expires the current pending buffer if its deadline has passed, then
    /// pulls the next live entry from the schedule, freeing expired ones.
    pub(crate) fn next_pending(&self, now: Time) -> Option<BufferHandle> {
        self.with_inner(|inner| {
            if let Some(p) = inner.pending {
                if inner.buf(p).deadline <= now {
                    inner.expire(p);
                } else {
                    return Some(inner.handle(p));
                }
            }

            let mut expired = Vec::<u8, N>::new();
            let due = inner.schedule.pop_due(now, |e| { let _ = expired.push(e.slot); });
            for i in expired.iter() {
                inner.expire(*i);
            }

            let due = due?;
            inner.pending = Some(due.slot);
            Some(inner.handle(due.slot))
        })
    }

    /// Free the pending or a scheduled transmission carrying message `id`
    pub(crate) fn preempt(&self, id: u16) -> bool {
        self.with_inner(|inner| {
            let id = id & ID_MASK;

            let pending = inner.pending.filter(|p| inner.buf(*p).id == id);
            let scheduled = inner.schedule.iter().map(|e| e.slot)
                .find(|s| inner.buf(*s).id == id);

            match pending.or(scheduled) {
                Some(i) => {
                    debug!("Message {:04x} pre-empted by neighbour", id);
                    inner.free_chain(i);
                    true
                },
                None => false,
            }
        })
    }

    /// Chain an encoded microframe behind the pending buffer.
    ///
    /// Microframes use the MAC's own slot, a microframe already chained to
    /// the buffer is reused.
    pub(crate) fn attach_microframe(&self, pending: BufferHandle, mf: &Microframe) -> Option<BufferHandle> {
        let mut frame = [0u8; Microframe::SIZE];
        mf.encode(&mut frame);

        self.with_inner(|inner| {
            let existing = inner.slot(pending)?.next;

            let index = match existing {
                Some(i) => i,
                None => inner.lock((N + MICROFRAME_SLOT) as u8)?,
            };

            let (id, deadline) = {
                let p = inner.buf(pending.index);
                (p.id, p.deadline)
            };

            let b = inner.buf_mut(index);
            b.flags |= BufferFlags::TX | BufferFlags::MICROFRAME;
            b.id = id;
            b.deadline = deadline;
            b.size = Microframe::SIZE;
            b.frame[..Microframe::SIZE].copy_from_slice(&frame);

            inner.buf_mut(pending.index).next = Some(index);

            Some(inner.handle(index))
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use rand::rngs::mock::StepRng;

    use crate::timer::mock::MockTimer;

    use super::*;

    type Pool<const N: usize> = BufferPool<MockTimer, StepRng, N>;

    fn pool<const N: usize>() -> (Pool<N>, MockTimer) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let timer = MockTimer::new();
        (BufferPool::new(timer.clone(), StepRng::new(0x1234, 0x1111)), timer)
    }

    const DEST: Coordinates = Coordinates::new(10, 20, 30);

    #[test]
    fn allocate_payload() {
        let (p, mut t) = pool::<4>();
        t.set(500);

        let h = p.allocate(DEST, Protocol::TSTP, 0, 0, 20).unwrap();

        p.with(h, |b| {
            assert_eq!(b.size(), 20);
            assert_eq!(b.frame().len(), 20);
            assert_eq!(b.sfd, 500);
            assert_eq!(b.destination, DEST);
            assert!(b.id <= ID_MASK);
            assert!(b.flags().contains(BufferFlags::LOCKED | BufferFlags::TX));
        }).unwrap();

        assert_eq!(p.locked(), 1);
    }

    #[test]
    fn allocate_too_large() {
        let (p, _t) = pool::<4>();

        assert!(p.allocate(DEST, Protocol::TSTP, 60, 40, 21).is_none());
        assert!(p.try_allocate(DEST, Protocol::TSTP, 0, 0, MTU + 1).is_none());
        assert_eq!(p.locked(), 0);

        assert!(p.allocate(DEST, Protocol::TSTP, 60, 40, 20).is_some());
    }

    #[test]
    fn locked_never_exceeds_capacity() {
        let (p, _t) = pool::<4>();

        let mut handles = std::vec::Vec::new();
        for i in 0..4 {
            handles.push(p.try_allocate(DEST, Protocol::TSTP, 0, 0, 10 + i).unwrap());
        }
        assert_eq!(p.locked(), 4);
        assert!(p.try_allocate(DEST, Protocol::TSTP, 0, 0, 10).is_none());
        assert_eq!(p.locked(), 4);

        // Released buffers become available again
        p.release(handles[2]);
        assert_eq!(p.locked(), 3);
        let h = p.try_allocate(DEST, Protocol::TSTP, 0, 0, 10).unwrap();
        assert_eq!(h.index(), handles[2].index());
        assert_eq!(p.locked(), 4);
    }

    #[test]
    fn stale_handles_rejected() {
        let (p, _t) = pool::<1>();

        let old = p.allocate(DEST, Protocol::TSTP, 0, 0, 10).unwrap();
        p.release(old);
        let new = p.allocate(DEST, Protocol::TSTP, 0, 0, 10).unwrap();

        assert_eq!(old.index(), new.index());
        assert!(p.with(old, |_| ()).is_none());

        // Releasing a stale handle leaves the new owner alone
        p.release(old);
        assert_eq!(p.locked(), 1);
        assert!(p.with(new, |_| ()).is_some());

        // Double release is a no-op
        p.release(new);
        p.release(new);
        assert_eq!(p.locked(), 0);
    }

    #[test]
    fn allocate_blocks_until_release() {
        let (p, _t) = pool::<2>();

        let a = p.allocate(DEST, Protocol::TSTP, 0, 0, 10).unwrap();
        let _b = p.allocate(DEST, Protocol::TSTP, 0, 0, 10).unwrap();

        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let h = p.allocate(DEST, Protocol::TSTP, 0, 0, 12);
                done.store(true, Ordering::SeqCst);
                h
            });

            std::thread::sleep(Duration::from_millis(50));
            assert!(!done.load(Ordering::SeqCst));

            p.release(a);

            let h = waiter.join().unwrap().unwrap();
            assert!(done.load(Ordering::SeqCst));
            assert_eq!(h.index(), a.index());
            assert_eq!(p.with(h, |b| b.size()), Some(12));
        });

        assert_eq!(p.locked(), 2);
    }

    #[test]
    fn send_and_pending_order() {
        let (p, _t) = pool::<4>();

        assert_eq!(p.send(DEST, Protocol::TSTP, &[1; 8], 300, 0), Some(8));
        assert_eq!(p.send(DEST, Protocol::TSTP, &[2; 9], 100, 0), Some(9));
        assert_eq!(p.send(DEST, Protocol::TSTP, &[3; 10], 200, 0), Some(10));
        assert_eq!(p.scheduled(), 3);

        let first = p.next_pending(0).unwrap();
        assert_eq!(p.with(first, |b| b.frame()[0]), Some(2));
        assert_eq!(p.pending(), Some(first));

        // Pending stays selected until released
        assert_eq!(p.next_pending(0), Some(first));
        p.release(first);
        assert_eq!(p.pending(), None);

        let next = p.next_pending(0).unwrap();
        assert_eq!(p.with(next, |b| b.frame()[0]), Some(3));
    }

    #[test]
    fn expired_entries_freed() {
        let (p, _t) = pool::<4>();

        p.send(DEST, Protocol::TSTP, &[1; 8], 100, 0).unwrap();
        p.send(DEST, Protocol::TSTP, &[2; 8], 150, 0).unwrap();
        p.send(DEST, Protocol::TSTP, &[3; 8], 400, 0).unwrap();

        let due = p.next_pending(150).unwrap();
        assert_eq!(p.with(due, |b| b.frame()[0]), Some(3));
        assert_eq!(p.expired(), 2);
        assert_eq!(p.locked(), 1);

        // Pending transmissions expire too
        assert_eq!(p.next_pending(400), None);
        assert_eq!(p.expired(), 3);
        assert_eq!(p.locked(), 0);
        assert_eq!(p.pending(), None);
    }

    #[test]
    fn microframe_chain_release() {
        let (p, _t) = pool::<4>();

        p.send(DEST, Protocol::TSTP, &[7; 60], 1000, 0).unwrap();
        let pending = p.next_pending(0).unwrap();
        let id = p.with(pending, |b| b.id).unwrap();

        let mf = p.attach_microframe(pending, &Microframe::new(false, id, 4)).unwrap();
        assert_eq!(p.locked(), 2);
        p.with(mf, |b| {
            assert_eq!(b.size(), Microframe::SIZE);
            assert!(b.flags().contains(BufferFlags::MICROFRAME));
            assert_eq!(Microframe::decode(b.frame()).unwrap().0, Microframe::new(false, id, 4));
        }).unwrap();

        // Re-attaching reuses the chained buffer
        assert_eq!(p.attach_microframe(pending, &Microframe::new(false, id, 2)), Some(mf));
        assert_eq!(p.locked(), 2);

        // Releasing the microframe alone unlinks it
        p.release(mf);
        assert_eq!(p.locked(), 1);
        assert_eq!(p.pending(), Some(pending));

        // Releasing the head frees the whole chain
        let mf = p.attach_microframe(pending, &Microframe::new(false, id, 4)).unwrap();
        p.release(pending);
        assert_eq!(p.locked(), 0);
        assert!(p.with(mf, |_| ()).is_none());
    }

    #[test]
    fn preempt_by_id() {
        let (p, _t) = pool::<4>();

        let h = p.allocate(DEST, Protocol::TSTP, 0, 0, 10).unwrap();
        let id = p.with_mut(h, |b| { b.id = 0x0123; b.id }).unwrap();
        p.submit(h, 1000, 0).unwrap();

        p.send(DEST, Protocol::TSTP, &[0; 10], 2000, 0).unwrap();

        assert!(!p.preempt(0x7777));
        assert!(p.preempt(id));
        assert_eq!(p.scheduled(), 1);
        assert_eq!(p.locked(), 1);

        // Pending buffers are pre-empted as well
        let pending = p.next_pending(0).unwrap();
        let id = p.with(pending, |b| b.id).unwrap();
        assert!(p.preempt(id | 0x8000));
        assert_eq!(p.pending(), None);
        assert_eq!(p.locked(), 0);
    }

    #[test]
    fn receive_one_pass() {
        let (p, _t) = pool::<1>();

        let h = p.receive(&[1, 2, 3, 4], 77, true).unwrap();
        p.with(h, |b| {
            assert_eq!(b.frame(), &[1, 2, 3, 4]);
            assert_eq!(b.sfd, 77);
            assert!(b.flags().contains(BufferFlags::RX | BufferFlags::MICROFRAME));
        }).unwrap();

        // Falls back to the producer buffers once the receive slot is held
        let h2 = p.receive(&[5; 60], 78, false).unwrap();
        assert_ne!(h.index(), h2.index());
        assert_eq!(p.locked(), 2);

        assert!(p.receive(&[0; 60], 79, false).is_none());
        assert!(p.try_allocate(DEST, Protocol::TSTP, 0, 0, 10).is_none());

        p.release(h);
        assert!(p.receive(&[6; 8], 80, false).is_some());
    }

    #[test]
    fn mac_slots_survive_full_pool() {
        let (p, _t) = pool::<2>();

        p.send(DEST, Protocol::TSTP, &[1; 20], 1000, 0).unwrap();
        p.send(DEST, Protocol::TSTP, &[2; 20], 2000, 0).unwrap();
        assert!(p.try_allocate(DEST, Protocol::TSTP, 0, 0, 10).is_none());

        // Microframes and receptions still find a buffer
        let pending = p.next_pending(0).unwrap();
        let id = p.with(pending, |b| b.id).unwrap();
        let mf = p.attach_microframe(pending, &Microframe::new(false, id, 3)).unwrap();
        assert!(mf.index() >= 2);

        let rx = p.receive(&[9; 4], 50, true).unwrap();
        assert!(rx.index() >= 2);
        assert_ne!(rx.index(), mf.index());
        assert_eq!(p.locked(), 4);

        // Reserved slots never satisfy producers
        p.release(rx);
        assert!(p.try_allocate(DEST, Protocol::TSTP, 0, 0, 10).is_none());

        p.release(pending);
        assert_eq!(p.locked(), 1);
    }

    #[test]
    fn pool_callable_from_accessors() {
        let (p, _t) = pool::<2>();

        let h = p.allocate(DEST, Protocol::TSTP, 0, 0, 10).unwrap();

        assert_eq!(p.with(h, |_| p.locked()), Some(1));

        let other = p.with_mut(h, |b| {
            b.id = 0x0042;
            p.try_allocate(DEST, Protocol::TSTP, 0, 0, 4)
        }).unwrap().unwrap();
        assert_eq!(p.with(h, |b| b.id), Some(0x0042));
        assert_eq!(p.locked(), 2);

        // Changes to a buffer released inside the closure are dropped
        assert_eq!(p.with_mut(other, |b| { b.id = 0x0001; p.release(other); }), None);
        assert!(p.with(other, |_| ()).is_none());
        assert_eq!(p.locked(), 1);
    }
}
