//! Command ring and reclaim ring
//!
//! Both rings live inside the region at fixed offsets, single-producer /
//! single-consumer, lock-free. The command ring carries fixed 4-word
//! structural commands editor → kernel; the reclaim ring carries freed
//! Zone B byte offsets kernel → editor.
//!
//! FIFO and publication are enforced the classic way: the producer's
//! release store on the tail makes all prior payload writes visible to a
//! consumer whose head load acquires that tail.

use std::sync::atomic::Ordering;

use sym_core::error::{KernelError, KernelResult};
use sym_core::layout::{COMMAND_WORDS, header, regs};

use crate::region::Region;

/// One fixed-width structural command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: u32,
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
}

impl Command {
    pub const fn new(opcode: u32, p1: u32, p2: u32, p3: u32) -> Self {
        Self { opcode, p1, p2, p3 }
    }
}

impl Region {
    /// Enqueue a command (editor side). Fails with `RingFull` when one slot
    /// short of wrapping; the editor retries next tick.
    pub fn ring_write(&self, cmd: Command) -> KernelResult<()> {
        let base = self.load(header::RING_PTR);
        if base == 0 {
            return Err(KernelError::RingNotInitialized);
        }
        let mask = self.load(header::RING_CAPACITY) - 1;
        let head = self.word(header::RING_HEAD).load(Ordering::Acquire);
        let tail = self.word(header::RING_TAIL).load(Ordering::Relaxed);
        if (tail + 1) & mask == head {
            return Err(KernelError::RingFull);
        }

        let slot = base + tail * COMMAND_WORDS * 4;
        self.byte_word(slot).store(cmd.opcode, Ordering::Relaxed);
        self.byte_word(slot + 4).store(cmd.p1, Ordering::Relaxed);
        self.byte_word(slot + 8).store(cmd.p2, Ordering::Relaxed);
        self.byte_word(slot + 12).store(cmd.p3, Ordering::Relaxed);
        self.word(header::RING_TAIL)
            .store((tail + 1) & mask, Ordering::Release);
        Ok(())
    }

    /// Dequeue a command (kernel side). `None` when empty.
    pub fn ring_read(&self) -> Option<Command> {
        let base = self.load(header::RING_PTR);
        if base == 0 {
            return None;
        }
        let mask = self.load(header::RING_CAPACITY) - 1;
        let tail = self.word(header::RING_TAIL).load(Ordering::Acquire);
        let head = self.word(header::RING_HEAD).load(Ordering::Relaxed);
        if head == tail {
            return None;
        }

        let slot = base + head * COMMAND_WORDS * 4;
        let cmd = Command {
            opcode: self.byte_word(slot).load(Ordering::Relaxed),
            p1: self.byte_word(slot + 4).load(Ordering::Relaxed),
            p2: self.byte_word(slot + 8).load(Ordering::Relaxed),
            p3: self.byte_word(slot + 12).load(Ordering::Relaxed),
        };
        self.word(header::RING_HEAD)
            .store((head + 1) & mask, Ordering::Release);
        Some(cmd)
    }

    /// Commands currently queued.
    pub fn ring_len(&self) -> u32 {
        let mask = self.load(header::RING_CAPACITY) - 1;
        let head = self.word(header::RING_HEAD).load(Ordering::Acquire);
        let tail = self.word(header::RING_TAIL).load(Ordering::Acquire);
        tail.wrapping_sub(head) & mask
    }

    // --- reclaim ring (kernel producer -> editor consumer) ---

    /// Post a freed Zone B offset back to the editor. Returns false when
    /// the ring is full; the caller decides whether the slot leaks.
    pub fn reclaim_push(&self, ptr: u32) -> bool {
        let base = self.load(regs::RECLAIM_PTR);
        if base == 0 {
            return false;
        }
        let mask = self.load(regs::RECLAIM_CAPACITY) - 1;
        let head = self.word(regs::RECLAIM_HEAD).load(Ordering::Acquire);
        let tail = self.word(regs::RECLAIM_TAIL).load(Ordering::Relaxed);
        if (tail + 1) & mask == head {
            return false;
        }
        self.byte_word(base + tail * 4).store(ptr, Ordering::Relaxed);
        self.word(regs::RECLAIM_TAIL)
            .store((tail + 1) & mask, Ordering::Release);
        true
    }

    /// Take one reclaimed offset (editor side).
    pub fn reclaim_pop(&self) -> Option<u32> {
        let base = self.load(regs::RECLAIM_PTR);
        if base == 0 {
            return None;
        }
        let mask = self.load(regs::RECLAIM_CAPACITY) - 1;
        let tail = self.word(regs::RECLAIM_TAIL).load(Ordering::Acquire);
        let head = self.word(regs::RECLAIM_HEAD).load(Ordering::Relaxed);
        if head == tail {
            return None;
        }
        let ptr = self.byte_word(base + head * 4).load(Ordering::Relaxed);
        self.word(regs::RECLAIM_HEAD)
            .store((head + 1) & mask, Ordering::Release);
        Some(ptr)
    }

    pub fn reclaim_len(&self) -> u32 {
        let mask = self.load(regs::RECLAIM_CAPACITY) - 1;
        let head = self.word(regs::RECLAIM_HEAD).load(Ordering::Acquire);
        let tail = self.word(regs::RECLAIM_TAIL).load(Ordering::Acquire);
        tail.wrapping_sub(head) & mask
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use sym_core::config::KernelConfig;
    use sym_core::layout::command;

    use super::*;

    fn region() -> Region {
        Region::new(KernelConfig {
            node_capacity: 32,
            ring_capacity: 8,
            reclaim_capacity: 8,
            synapse_capacity: 256,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let r = region();
        for i in 0..5 {
            r.ring_write(Command::new(command::INSERT, i, 0, 0)).unwrap();
        }
        for i in 0..5 {
            let cmd = r.ring_read().unwrap();
            assert_eq!(cmd.opcode, command::INSERT);
            assert_eq!(cmd.p1, i);
        }
        assert!(r.ring_read().is_none());
    }

    #[test]
    fn test_full_at_capacity_minus_one() {
        let r = region();
        for i in 0..7 {
            r.ring_write(Command::new(command::DELETE, i, 0, 0)).unwrap();
        }
        assert!(matches!(
            r.ring_write(Command::new(command::DELETE, 7, 0, 0)),
            Err(KernelError::RingFull)
        ));
        assert_eq!(r.ring_len(), 7);
        // Draining one slot reopens the ring.
        r.ring_read().unwrap();
        r.ring_write(Command::new(command::DELETE, 7, 0, 0)).unwrap();
    }

    #[test]
    fn test_wraparound_preserves_payload() {
        let r = region();
        for round in 0..10u32 {
            r.ring_write(Command::new(command::CONNECT, round, round * 2, round * 3))
                .unwrap();
            let cmd = r.ring_read().unwrap();
            assert_eq!((cmd.p1, cmd.p2, cmd.p3), (round, round * 2, round * 3));
        }
    }

    #[test]
    fn test_reclaim_round_trip() {
        let r = region();
        assert!(r.reclaim_push(0xABC0));
        assert!(r.reclaim_push(0xDEF0));
        assert_eq!(r.reclaim_len(), 2);
        assert_eq!(r.reclaim_pop(), Some(0xABC0));
        assert_eq!(r.reclaim_pop(), Some(0xDEF0));
        assert_eq!(r.reclaim_pop(), None);
    }

    #[test]
    fn test_reclaim_full_reports_false() {
        let r = region();
        for i in 0..7 {
            assert!(r.reclaim_push(i));
        }
        assert!(!r.reclaim_push(7));
    }

    #[test]
    fn test_spsc_threads_see_all_commands() {
        let r = Arc::new(
            Region::new(KernelConfig {
                node_capacity: 32,
                ring_capacity: 64,
                synapse_capacity: 256,
                ..Default::default()
            })
            .unwrap(),
        );
        const N: u32 = 10_000;

        let producer = {
            let r = Arc::clone(&r);
            thread::spawn(move || {
                let mut sent = 0;
                while sent < N {
                    if r.ring_write(Command::new(command::INSERT, sent, sent ^ 0x5A5A, 0)).is_ok() {
                        sent += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let consumer = {
            let r = Arc::clone(&r);
            thread::spawn(move || {
                let mut expect = 0;
                while expect < N {
                    if let Some(cmd) = r.ring_read() {
                        assert_eq!(cmd.p1, expect, "FIFO violated");
                        assert_eq!(cmd.p2, expect ^ 0x5A5A, "payload torn");
                        expect += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
