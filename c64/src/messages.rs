//! Host message queue.
//!
//! The core posts messages for the host UI here; the host drains the
//! queue between frames.

use std::collections::VecDeque;

/// Messages posted by the core for the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// The machine is configured as PAL.
    Pal,
    /// The machine is configured as NTSC.
    Ntsc,
    /// A hardware reset was performed.
    Reset,
    /// The CPU halted on an illegal/unstable opcode.
    IllegalInstruction,
    /// The CPU reached a breakpoint.
    Breakpoint,
}

/// FIFO of pending host messages.
#[derive(Debug, Default)]
pub struct MessageQueue {
    queue: VecDeque<Message>,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn put(&mut self, msg: Message) {
        self.queue.push_back(msg);
    }

    pub fn take(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
