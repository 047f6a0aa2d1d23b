//! ELF file header and section header decoding.
//!
//! Only the fields the loader needs are retained: where the section table
//! lives, what each section contains, and where its bytes sit in the file.

use crate::image::FormatError;
use crate::reader::Reader;

/// The 4-byte ELF magic signature.
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Section holds a string table (`SHT_STRTAB`).
pub const SHT_STRTAB: u32 = 3;
/// Section holds dynamic linking entries (`SHT_DYNAMIC`).
pub const SHT_DYNAMIC: u32 = 6;

/// Dynamic tag: needed library name (`DT_NEEDED`).
pub const DT_NEEDED: u64 = 1;
/// Dynamic tag: shared object name (`DT_SONAME`).
pub const DT_SONAME: u64 = 14;
/// Dynamic tag: runtime library search path (`DT_RPATH`).
pub const DT_RPATH: u64 = 15;
/// Dynamic tag: runtime library search path, new-style (`DT_RUNPATH`).
pub const DT_RUNPATH: u64 = 29;

/// Pointer width of an ELF image.
///
/// Selected by the class byte in the identification block; every
/// fixed-size layout that follows (file header, section headers, dynamic
/// entries) depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    /// 32-bit image (`ELFCLASS32`).
    Elf32,
    /// 64-bit image (`ELFCLASS64`).
    Elf64,
}

impl ElfClass {
    /// Size in bytes of one entry in the `.dynamic` section.
    pub fn dynamic_entry_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 8,
            ElfClass::Elf64 => 16,
        }
    }
}

/// Decoded ELF file header (the subset the loader uses).
#[derive(Debug, Clone)]
pub struct ElfHeader {
    /// Pointer width of the image.
    pub class: ElfClass,
    /// File offset of the section header table.
    pub shoff: u64,
    /// Number of section headers.
    pub shnum: u16,
    /// Index of the section-name string table section, as recorded in the
    /// header. Used as a fallback when the marker scan finds nothing.
    pub shstrndx: u16,
}

impl ElfHeader {
    /// Parse the identification block and file header.
    ///
    /// The reader must be positioned at the start of the file. The
    /// data-encoding byte is not validated; fields are decoded
    /// little-endian.
    pub(crate) fn parse(r: &mut Reader<'_>) -> Result<Self, FormatError> {
        let magic = r.bytes(4)?;
        if magic != ELF_MAGIC {
            return Err(FormatError::NotElf);
        }
        let class = match r.u8()? {
            1 => ElfClass::Elf32,
            2 => ElfClass::Elf64,
            other => return Err(FormatError::UnsupportedClass(other)),
        };
        // encoding + version + 9 padding bytes
        r.skip(11);

        let _e_type = r.u16()?;
        let _e_machine = r.u16()?;
        let _e_version = r.u32()?;
        let (_entry, _phoff, shoff) = match class {
            ElfClass::Elf32 => (r.u32()? as u64, r.u32()? as u64, r.u32()? as u64),
            ElfClass::Elf64 => (r.u64()?, r.u64()?, r.u64()?),
        };
        let _e_flags = r.u32()?;
        let _e_ehsize = r.u16()?;
        let _e_phentsize = r.u16()?;
        let _e_phnum = r.u16()?;
        let _e_shentsize = r.u16()?;
        let shnum = r.u16()?;
        let shstrndx = r.u16()?;

        Ok(Self {
            class,
            shoff,
            shnum,
            shstrndx,
        })
    }
}

/// Decoded section header.
#[derive(Debug, Clone)]
pub struct SectionHeader {
    /// Section name, resolved against the section-name string table.
    /// Empty until resolution.
    pub name: String,
    /// Offset of the section's name within the section-name string table.
    pub name_offset: u32,
    /// Section type tag (`SHT_*`).
    pub sh_type: u32,
    /// File offset of the section body.
    pub offset: u64,
    /// Size of the section body in bytes.
    pub size: u64,
    /// Size of one entry for table-like sections, 0 otherwise.
    pub entry_size: u64,
}

impl SectionHeader {
    /// Parse one section header at the reader's current position.
    pub(crate) fn parse(r: &mut Reader<'_>, class: ElfClass) -> Result<Self, FormatError> {
        let name_offset = r.u32()?;
        let sh_type = r.u32()?;
        let (offset, size, entry_size) = match class {
            ElfClass::Elf32 => {
                let _flags = r.u32()?;
                let _addr = r.u32()?;
                let offset = r.u32()? as u64;
                let size = r.u32()? as u64;
                let _link = r.u32()?;
                let _info = r.u32()?;
                let _addralign = r.u32()?;
                let entsize = r.u32()? as u64;
                (offset, size, entsize)
            }
            ElfClass::Elf64 => {
                let _flags = r.u64()?;
                let _addr = r.u64()?;
                let offset = r.u64()?;
                let size = r.u64()?;
                let _link = r.u32()?;
                let _info = r.u32()?;
                let _addralign = r.u64()?;
                let entsize = r.u64()?;
                (offset, size, entsize)
            }
        };
        Ok(Self {
            name: String::new(),
            name_offset,
            sh_type,
            offset,
            size,
            entry_size,
        })
    }

    /// The section body as a slice of the whole file, bounds-checked.
    pub(crate) fn body<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], FormatError> {
        let start = self.offset as usize;
        let end = start
            .checked_add(self.size as usize)
            .ok_or(FormatError::Truncated)?;
        if end > data.len() {
            return Err(FormatError::Truncated);
        }
        Ok(&data[start..end])
    }
}
