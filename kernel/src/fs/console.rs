//! Console character-device backend: VT-100 CSI subset on write, blocking
//! key-buffer reads (spec §4.H). `read_key_buffer()` and the terminal
//! `putchar`/cursor-set primitives are the named-but-unspecified
//! collaborators (spec §1); this module owns only the escape-sequence
//! parser and the VFS glue around them.

use spin::Mutex;

use crate::config::{CONSOLE_COLS, CONSOLE_ROWS};
use crate::error::Errno;
use crate::fs::{Dirent, FileMode, MountOps, Stat};

/// Blocking byte source for keyboard input, and the terminal sink for
/// output. Out-of-scope hardware glue implements this trait; the parser
/// below only depends on it.
pub trait Terminal: Send + Sync {
    /// Blocks until at least one byte is available, then returns it.
    fn read_key_buffer(&self) -> u8;
    /// True if a byte is ready without blocking (used for short reads).
    fn key_available(&self) -> bool;
    fn putchar(&self, c: u8);
    fn set_cursor(&self, row: usize, col: usize);
    fn cursor(&self) -> (usize, usize);
    fn clear_screen(&self);
    /// Queues bytes onto the same input stream `read_key_buffer` drains,
    /// for replies the console itself generates (the `ESC[6n` cursor
    /// report) rather than ones typed at the keyboard.
    fn inject_reply(&self, bytes: &[u8]);
}

#[derive(Default)]
struct ParserState {
    in_escape: bool,
    in_csi: bool,
    args: [u32; 4],
    arg_count: usize,
    cur_arg_started: bool,
}

impl ParserState {
    fn reset(&mut self) {
        *self = ParserState::default();
    }

    fn push_digit(&mut self, d: u32) {
        if !self.cur_arg_started {
            self.arg_count = (self.arg_count + 1).min(self.args.len());
            self.args[self.arg_count - 1] = 0;
            self.cur_arg_started = true;
        }
        if let Some(slot) = self.args.get_mut(self.arg_count - 1) {
            *slot = *slot * 10 + d;
        }
    }

    fn next_arg(&mut self) {
        self.cur_arg_started = false;
    }

    fn arg(&self, i: usize, default: u32) -> u32 {
        if i < self.arg_count {
            self.args[i]
        } else {
            default
        }
    }
}

/// Writes `ESC [ row ; col R` into `out`, returning the byte count. `out`
/// must be large enough for two decimal `usize`s plus four punctuation
/// bytes; `CONSOLE_ROWS`/`CONSOLE_COLS` keep the values small enough that
/// 16 bytes is always plenty.
fn format_cursor_report(out: &mut [u8], row: usize, col: usize) -> usize {
    fn write_decimal(out: &mut [u8], at: usize, mut value: usize) -> usize {
        let start = at;
        if value == 0 {
            out[at] = b'0';
            return at + 1;
        }
        let mut digits = [0u8; 10];
        let mut n = 0;
        while value > 0 {
            digits[n] = b'0' + (value % 10) as u8;
            value /= 10;
            n += 1;
        }
        for i in 0..n {
            out[start + i] = digits[n - 1 - i];
        }
        start + n
    }

    let mut at = 0;
    out[at] = 0x1B;
    at += 1;
    out[at] = b'[';
    at += 1;
    at = write_decimal(out, at, row);
    out[at] = b';';
    at += 1;
    at = write_decimal(out, at, col);
    out[at] = b'R';
    at += 1;
    at
}

pub struct Console<T: Terminal> {
    term: T,
    parser: Mutex<ParserState>,
}

impl<T: Terminal> Console<T> {
    pub fn new(term: T) -> Self {
        Console {
            term,
            parser: Mutex::new(ParserState::default()),
        }
    }

    fn run_command(&self, cmd: u8, parser: &ParserState) {
        match cmd {
            b'J' => {
                if parser.arg(0, 0) == 2 {
                    self.term.clear_screen();
                    self.term.set_cursor(0, 0);
                }
            }
            b'H' => {
                let row = parser.arg(0, 1).saturating_sub(1) as usize;
                let col = parser.arg(1, 1).saturating_sub(1) as usize;
                self.term
                    .set_cursor(row.min(CONSOLE_ROWS - 1), col.min(CONSOLE_COLS - 1));
            }
            b'C' => {
                let n = parser.arg(0, 1) as usize;
                let (row, col) = self.term.cursor();
                self.term.set_cursor(row, (col + n).min(CONSOLE_COLS - 1));
            }
            b'B' => {
                let n = parser.arg(0, 1) as usize;
                let (row, col) = self.term.cursor();
                self.term.set_cursor((row + n).min(CONSOLE_ROWS - 1), col);
            }
            b'n' => {
                if parser.arg(0, 0) == 6 {
                    let (row, col) = self.term.cursor();
                    // Cursor-position report: ESC [ r;c R, 1-based, queued
                    // onto the input side for the next read (spec §6).
                    let mut reply = [0u8; 16];
                    let len = format_cursor_report(&mut reply, row + 1, col + 1);
                    self.term.inject_reply(&reply[..len]);
                }
            }
            _ => {
                // Unknown final letter: consume silently (spec §4.H).
            }
        }
    }

    /// Feeds one byte of write(2) data through the CSI parser.
    fn feed(&self, byte: u8) {
        let mut parser = self.parser.lock();
        if !parser.in_escape {
            if byte == 0x1B {
                parser.in_escape = true;
            } else {
                self.term.putchar(byte);
            }
            return;
        }
        if parser.in_escape && !parser.in_csi {
            if byte == b'[' {
                parser.in_csi = true;
                parser.args = [0; 4];
                parser.arg_count = 0;
                parser.cur_arg_started = false;
            } else {
                parser.reset();
            }
            return;
        }
        match byte {
            b'0'..=b'9' => parser.push_digit((byte - b'0') as u32),
            b';' => parser.next_arg(),
            b'A'..=b'Z' | b'a'..=b'z' => {
                let snapshot = ParserState {
                    in_escape: parser.in_escape,
                    in_csi: parser.in_csi,
                    args: parser.args,
                    arg_count: parser.arg_count,
                    cur_arg_started: parser.cur_arg_started,
                };
                parser.reset();
                drop(parser);
                self.run_command(byte, &snapshot);
            }
            _ => parser.reset(),
        }
    }
}

impl<T: Terminal> MountOps for Console<T> {
    fn read(&self, _path: &str, _offset: u64, buf: &mut [u8]) -> Result<usize, Errno> {
        if buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.term.read_key_buffer();
        let mut n = 1;
        while n < buf.len() && self.term.key_available() {
            buf[n] = self.term.read_key_buffer();
            n += 1;
        }
        Ok(n)
    }

    fn write(&self, _path: &str, _offset: u64, buf: &[u8]) -> Result<usize, Errno> {
        for &b in buf {
            self.feed(b);
        }
        Ok(buf.len())
    }

    fn getattr(&self, _path: &str) -> Result<Stat, Errno> {
        Ok(Stat {
            mode: FileMode::S_IFCHR.bits() | 0o620,
            size: 0,
            mtime: 0,
        })
    }

    fn readdir(&self, _path: &str, _index: usize) -> Result<Option<Dirent>, Errno> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use spin::Mutex as SpinMutex;

    struct FakeTerminal {
        keys: SpinMutex<alloc::collections::VecDeque<u8>>,
        cursor: SpinMutex<(usize, usize)>,
        cleared: SpinMutex<bool>,
        written: SpinMutex<alloc::vec::Vec<u8>>,
    }

    impl FakeTerminal {
        fn with_keys(keys: &[u8]) -> Self {
            FakeTerminal {
                keys: SpinMutex::new(keys.iter().copied().collect()),
                cursor: SpinMutex::new((5, 5)),
                cleared: SpinMutex::new(false),
                written: SpinMutex::new(alloc::vec::Vec::new()),
            }
        }
    }

    impl Terminal for FakeTerminal {
        fn read_key_buffer(&self) -> u8 {
            self.keys.lock().pop_front().unwrap_or(0)
        }
        fn key_available(&self) -> bool {
            !self.keys.lock().is_empty()
        }
        fn putchar(&self, c: u8) {
            self.written.lock().push(c);
        }
        fn set_cursor(&self, row: usize, col: usize) {
            *self.cursor.lock() = (row, col);
        }
        fn cursor(&self) -> (usize, usize) {
            *self.cursor.lock()
        }
        fn clear_screen(&self) {
            *self.cleared.lock() = true;
        }
        fn inject_reply(&self, bytes: &[u8]) {
            self.keys.lock().extend(bytes.iter().copied());
        }
    }

    #[test]
    fn clear_screen_resets_cursor() {
        let console = Console::new(FakeTerminal::with_keys(&[]));
        console.write("/console", 0, b"\x1b[2J").unwrap();
        assert_eq!(*console.term.cleared.lock(), true);
        assert_eq!(*console.term.cursor.lock(), (0, 0));
    }

    #[test]
    fn cursor_position_command_moves_absolute() {
        let console = Console::new(FakeTerminal::with_keys(&[]));
        console.write("/console", 0, b"\x1b[3;4H").unwrap();
        assert_eq!(*console.term.cursor.lock(), (2, 3));
    }

    #[test]
    fn plain_bytes_pass_through_to_putchar() {
        let console = Console::new(FakeTerminal::with_keys(&[]));
        console.write("/console", 0, b"hi").unwrap();
        assert_eq!(&*console.term.written.lock(), b"hi");
    }

    #[test]
    fn cursor_position_report_is_queued_for_the_next_read() {
        let console = Console::new(FakeTerminal::with_keys(&[]));
        *console.term.cursor.lock() = (2, 3);
        console.write("/console", 0, b"\x1b[6n").unwrap();
        let mut buf = [0u8; 8];
        let n = console.read("/console", 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"\x1b[3;4R");
    }

    #[test]
    fn read_drains_available_keys_as_short_read() {
        let console = Console::new(FakeTerminal::with_keys(&[b'a', b'b']));
        let mut buf = [0u8; 8];
        let n = console.read("/console", 0, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"ab");
    }
}
