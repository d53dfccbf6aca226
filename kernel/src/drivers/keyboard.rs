//! PS/2 keyboard scanner (spec §4.H names only `read_key_buffer()` as the
//! collaborator; scancode decoding beyond that minimal byte source is out of
//! scope). This module owns just enough of a set-1 scancode table to produce
//! ASCII and the arrow-key sentinels, fed by the IRQ1 handler into a ring
//! buffer that `read_key_buffer`/`key_available` drain.

use spin::Mutex;

use crate::arch::port::Port;
use crate::arch::trap::TrapFrame;
use crate::config::{KEY_DOWN, KEY_LEFT, KEY_RIGHT, KEY_UP};

const KEYBOARD_DATA_PORT: u16 = 0x60;
const RING_CAPACITY: usize = 128;

/// US QWERTY set-1 make-code table, unshifted. Scancodes with no ASCII
/// mapping (modifiers, function keys) map to 0 and are dropped.
const SCANCODE_ASCII: [u8; 0x3A] = [
    0, 0x1B, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, 0, 0, b' ',
];

struct RingBuffer {
    data: [u8; RING_CAPACITY],
    head: usize,
    len: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        RingBuffer { data: [0; RING_CAPACITY], head: 0, len: 0 }
    }

    fn push(&mut self, byte: u8) {
        if self.len == RING_CAPACITY {
            return;
        }
        let tail = (self.head + self.len) % RING_CAPACITY;
        self.data[tail] = byte;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.data[self.head];
        self.head = (self.head + 1) % RING_CAPACITY;
        self.len -= 1;
        Some(byte)
    }
}

static BUFFER: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());

/// E0-prefixed extended scancodes for the arrow keys, decoded across two
/// interrupts; tracked here since the IRQ handler only sees one byte at a
/// time.
static EXTENDED_PREFIX: Mutex<bool> = Mutex::new(false);

fn decode(scancode: u8) -> Option<u8> {
    if scancode == 0xE0 {
        *EXTENDED_PREFIX.lock() = true;
        return None;
    }
    let extended = core::mem::take(&mut *EXTENDED_PREFIX.lock());
    if scancode & 0x80 != 0 {
        return None; // break code: key released
    }
    if extended {
        return match scancode {
            0x48 => Some(KEY_UP),
            0x50 => Some(KEY_DOWN),
            0x4B => Some(KEY_LEFT),
            0x4D => Some(KEY_RIGHT),
            _ => None,
        };
    }
    SCANCODE_ASCII
        .get(scancode as usize)
        .copied()
        .filter(|&b| b != 0)
}

/// IRQ1 handler, registered against the PIC's keyboard vector during boot.
pub fn irq_handler(_frame: &mut TrapFrame) {
    let data: Port<u8> = Port::new(KEYBOARD_DATA_PORT);
    let scancode = data.read();
    if let Some(byte) = decode(scancode) {
        BUFFER.lock().push(byte);
    }
    crate::arch::pic::send_eoi(1);
}

/// Blocks (spins) until a byte is available, then returns it.
pub fn read_key_buffer() -> u8 {
    loop {
        if let Some(byte) = BUFFER.lock().pop() {
            return byte;
        }
        core::hint::spin_loop();
    }
}

pub fn key_available() -> bool {
    BUFFER.lock().len > 0
}

/// Queues bytes the console itself generates (e.g. a cursor-position
/// report) onto the same ring buffer real keystrokes land on, so the next
/// `read(2)` on `/console` sees them exactly like typed input.
pub fn inject_bytes(bytes: &[u8]) {
    let mut buffer = BUFFER.lock();
    for &byte in bytes {
        buffer.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_letter() {
        *EXTENDED_PREFIX.lock() = false;
        assert_eq!(decode(0x1E), Some(b'a'));
    }

    #[test]
    fn ignores_break_codes() {
        assert_eq!(decode(0x1E | 0x80), None);
    }

    #[test]
    fn extended_prefix_then_up_arrow_yields_sentinel() {
        assert_eq!(decode(0xE0), None);
        assert_eq!(decode(0x48), Some(KEY_UP));
    }
}
