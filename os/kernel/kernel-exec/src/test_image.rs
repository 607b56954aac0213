//! Builds small ELF64 images for tests.

use crate::elf::{ELF_HEADER_SIZE, EM_X86_64, ET_EXEC, PROGRAM_HEADER_SIZE, PT_LOAD, SECTION_HEADER_SIZE};

pub struct TestSegment {
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
    p_type: u32,
}

impl TestSegment {
    pub fn new(vaddr: u64, data: Vec<u8>, memsz: u64) -> Self {
        Self {
            vaddr,
            data,
            memsz,
            p_type: PT_LOAD,
        }
    }

    /// A non-loadable header (`PT_NOTE`).
    pub fn note(data: Vec<u8>) -> Self {
        let memsz = data.len() as u64;
        Self {
            vaddr: 0,
            data,
            memsz,
            p_type: 4,
        }
    }
}

pub struct TestImage {
    entry: u64,
    segments: Vec<TestSegment>,
    sections: usize,
}

impl TestImage {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            segments: Vec::new(),
            sections: 2,
        }
    }

    pub fn segment(mut self, segment: TestSegment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn sections(mut self, count: usize) -> Self {
        self.sections = count;
        self
    }

    /// Header, program headers, section headers, then segment data at
    /// 16-byte aligned offsets.
    pub fn build(&self) -> Vec<u8> {
        let phoff = ELF_HEADER_SIZE;
        let shoff = phoff + self.segments.len() * PROGRAM_HEADER_SIZE;
        let mut data_off = (shoff + self.sections * SECTION_HEADER_SIZE).next_multiple_of(16);

        let mut out = vec![0u8; data_off];
        out[0..4].copy_from_slice(b"\x7FELF");
        out[4] = 2;
        out[5] = 1;
        out[6] = 1;
        put16(&mut out, 16, ET_EXEC);
        put16(&mut out, 18, EM_X86_64);
        put32(&mut out, 20, 1);
        put64(&mut out, 24, self.entry);
        put64(&mut out, 32, phoff as u64);
        put64(&mut out, 40, if self.sections > 0 { shoff as u64 } else { 0 });
        put16(&mut out, 52, ELF_HEADER_SIZE as u16);
        put16(&mut out, 54, PROGRAM_HEADER_SIZE as u16);
        put16(&mut out, 56, self.segments.len() as u16);
        put16(&mut out, 58, SECTION_HEADER_SIZE as u16);
        put16(&mut out, 60, self.sections as u16);

        for (i, seg) in self.segments.iter().enumerate() {
            let ph = phoff + i * PROGRAM_HEADER_SIZE;
            put32(&mut out, ph, seg.p_type);
            put32(&mut out, ph + 4, 0b110);
            put64(&mut out, ph + 8, data_off as u64);
            put64(&mut out, ph + 16, seg.vaddr);
            put64(&mut out, ph + 24, seg.vaddr);
            put64(&mut out, ph + 32, seg.data.len() as u64);
            put64(&mut out, ph + 40, seg.memsz);
            put64(&mut out, ph + 48, 0x1000);

            out.extend_from_slice(&seg.data);
            out.resize(out.len().next_multiple_of(16), 0);
            data_off = out.len();
        }

        // section 0 stays null; the rest carry their index as the name
        for i in 1..self.sections {
            let sh = shoff + i * SECTION_HEADER_SIZE;
            put32(&mut out, sh, i as u32);
            put32(&mut out, sh + 4, 1);
            put64(&mut out, sh + 48, 16);
        }

        out
    }
}

fn put16(out: &mut [u8], at: usize, v: u16) {
    out[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut [u8], at: usize, v: u32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut [u8], at: usize, v: u64) {
    out[at..at + 8].copy_from_slice(&v.to_le_bytes());
}
