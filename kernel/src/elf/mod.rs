//! ELF32 header / program-header parsing, shared by `execve` (spec §4.I)
//! and documented identically for the bootloader's loader (spec §4.J),
//! though the two crates keep independent copies (freestanding binaries
//! with no common link unit at boot time).

const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

#[derive(Debug, Clone, Copy)]
pub struct Elf32Header {
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

impl Elf32Header {
    /// Parses the first 52 bytes of an ELF32 file. Returns `None` on a bad
    /// magic number or a non-32-bit/non-LSB/non-x86 header.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 52 || buf[0..4] != MAGIC {
            return None;
        }
        const EI_CLASS_32: u8 = 1;
        const EI_DATA_LSB: u8 = 1;
        if buf[4] != EI_CLASS_32 || buf[5] != EI_DATA_LSB {
            return None;
        }
        Some(Elf32Header {
            entry: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            phoff: u32::from_le_bytes(buf[28..32].try_into().ok()?),
            phentsize: u16::from_le_bytes(buf[42..44].try_into().ok()?),
            phnum: u16::from_le_bytes(buf[44..46].try_into().ok()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramHeaderType {
    Load,
    Other(u32),
}

impl From<u32> for ProgramHeaderType {
    fn from(v: u32) -> Self {
        match v {
            1 => ProgramHeaderType::Load,
            other => ProgramHeaderType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub p_type: ProgramHeaderType,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
}

impl ProgramHeader {
    /// Parses a 32-byte ELF32 program header entry.
    pub fn parse(buf: &[u8; 32]) -> Self {
        let word = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        ProgramHeader {
            p_type: ProgramHeaderType::from(word(0)),
            p_offset: word(4),
            p_vaddr: word(8),
            p_paddr: word(12),
            p_filesz: word(16),
            p_memsz: word(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_header(entry: u32, phoff: u32, phnum: u16) -> [u8; 52] {
        let mut buf = [0u8; 52];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = 1;
        buf[5] = 1;
        buf[24..28].copy_from_slice(&entry.to_le_bytes());
        buf[28..32].copy_from_slice(&phoff.to_le_bytes());
        buf[42..44].copy_from_slice(&32u16.to_le_bytes());
        buf[44..46].copy_from_slice(&phnum.to_le_bytes());
        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = fake_header(0x1000, 52, 1);
        buf[0] = 0;
        assert!(Elf32Header::parse(&buf).is_none());
    }

    #[test]
    fn parses_entry_and_phnum() {
        let buf = fake_header(0x0804_8000, 52, 2);
        let header = Elf32Header::parse(&buf).unwrap();
        assert_eq!(header.entry, 0x0804_8000);
        assert_eq!(header.phnum, 2);
        assert_eq!(header.phentsize, 32);
    }

    #[test]
    fn program_header_identifies_load_segments() {
        let mut buf = [0u8; 32];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        buf[16..20].copy_from_slice(&100u32.to_le_bytes());
        buf[20..24].copy_from_slice(&200u32.to_le_bytes());
        let phdr = ProgramHeader::parse(&buf);
        assert_eq!(phdr.p_type, ProgramHeaderType::Load);
        assert_eq!(phdr.p_filesz, 100);
        assert_eq!(phdr.p_memsz, 200);
    }
}
