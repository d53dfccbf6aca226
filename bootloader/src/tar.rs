//! `tar_lookup_lazy` (spec §4.J step 2): a sectorwise, index-free USTAR scan
//! that reads one header at a time and skips whole files it doesn't want.
//! Mirrors `kernel::fs::tar`'s algorithm and its single-probe-match
//! limitation (spec §9b) — a long-name USTAR extension record would not be
//! followed — since both backends descend from the same original routine.

use crate::ata::read_sectors;

const HEADER_SIZE: usize = 512;
const NAME_LEN: usize = 100;
const SIZE_OFFSET: usize = 124;
const SIZE_LEN: usize = 12;
const MAGIC_OFFSET: usize = 257;
const MAGIC: &[u8] = b"ustar";

fn parse_octal(field: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &b in field {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 8 + (b - b'0') as u32;
    }
    value
}

fn header_matches(header: &[u8; HEADER_SIZE], filename: &str) -> Option<bool> {
    if &header[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()] != MAGIC {
        return None;
    }
    let name_len = header[..NAME_LEN].iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    let name = core::str::from_utf8(&header[..name_len]).unwrap_or("");
    Some(name.trim_start_matches('/') == filename.trim_start_matches('/'))
}

/// Walks the archive starting at `start_lba` looking for `filename`. On a
/// match, reads the file content straight into `buf[0..]` (overwriting the
/// header sector, exactly like the original, which reuses one buffer for
/// both the header probe and the eventual payload) and returns the file
/// size. Returns `None` once an all-zero (end-of-archive) or non-`ustar`
/// header is read without a match.
pub fn lookup_lazy(start_lba: u32, filename: &str, buf: &mut [u8]) -> Option<usize> {
    let mut lba = start_lba;
    loop {
        let mut header = [0u8; HEADER_SIZE];
        read_sectors(lba, 1, &mut header);

        match header_matches(&header, filename) {
            None => return None,
            Some(true) => {
                let size = parse_octal(&header[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN]) as usize;
                let content_sectors = ((size + HEADER_SIZE - 1) / HEADER_SIZE) as u8;
                // One extra sector beyond the content, inherited from the
                // original's `size_in_sector = ceil(size/512) + 1`.
                read_sectors(lba + 1, content_sectors + 1, buf);
                return Some(size);
            }
            Some(false) => {
                let size = parse_octal(&header[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN]) as usize;
                let content_sectors = ((size + HEADER_SIZE - 1) / HEADER_SIZE) as u32;
                lba += 1 + content_sectors;
            }
        }
    }
}
