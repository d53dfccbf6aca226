//! `log` facade backend: a 16550 UART on COM1, matching the teacher's
//! serial-backed logger but built on this crate's own `arch::port::Port`
//! instead of pulling in a separate UART crate, since every other driver
//! in this kernel already goes through that primitive.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::arch::port::Port;

const COM1: u16 = 0x3F8;

struct SerialPort {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        SerialPort {
            data: Port::new(base),
            line_status: Port::new(base + 5),
        }
    }

    /// Standard 16550 init sequence: disable interrupts, set the baud
    /// divisor, 8N1, enable FIFO.
    fn init(&mut self) {
        let mut int_enable: Port<u8> = Port::new(COM1 + 1);
        let mut fifo_ctrl: Port<u8> = Port::new(COM1 + 2);
        let mut line_ctrl: Port<u8> = Port::new(COM1 + 3);
        let mut modem_ctrl: Port<u8> = Port::new(COM1 + 4);
        let mut divisor_lo: Port<u8> = Port::new(COM1);
        let mut divisor_hi: Port<u8> = Port::new(COM1 + 1);

        int_enable.write(0x00);
        line_ctrl.write(0x80); // enable DLAB to set the baud divisor
        divisor_lo.write(0x03); // 38400 baud
        divisor_hi.write(0x00);
        line_ctrl.write(0x03); // 8 bits, no parity, one stop bit, DLAB off
        fifo_ctrl.write(0xC7);
        modem_ctrl.write(0x0B);
        int_enable.write(0x00);
    }

    fn line_is_ready_to_transmit(&self) -> bool {
        self.line_status.read() & 0x20 != 0
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            while !self.line_is_ready_to_transmit() {
                core::hint::spin_loop();
            }
            self.data.write(byte);
        }
        Ok(())
    }
}

static SERIAL: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::arch::without_interrupts(|| {
            let _ = writeln!(
                SERIAL.lock(),
                "[{:<5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        });
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Installs the serial-backed logger. Must run once, early in boot,
/// before the first `log::info!`/`log::warn!`/`log::error!` call.
pub fn init(level: LevelFilter) {
    SERIAL.lock().init();
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(level))
        .expect("logger already installed");
}
