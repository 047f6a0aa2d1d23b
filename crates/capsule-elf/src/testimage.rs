//! Minimal ELF image builder for the test suites.
//!
//! Produces just enough of a shared object for the parser and the
//! extraction layer to chew on: file header, a `.text` stub, `.dynstr`,
//! an optional `.dynamic` section, and `.shstrtab`. The images are not
//! loadable by a real dynamic linker; they exist so tests can assert on
//! dependency metadata and in-place rewrites without shipping compiled
//! fixtures.

use crate::header::{ElfClass, DT_NEEDED, DT_RPATH, DT_RUNPATH, DT_SONAME};

/// Builder for a minimal ELF32/ELF64 shared-object image.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    class: ElfClass,
    needed: Vec<String>,
    soname: Option<String>,
    runpath: Option<String>,
    runpath_tag: u64,
    with_dynamic: bool,
}

impl ImageBuilder {
    /// Start a builder for the given pointer width.
    pub fn new(class: ElfClass) -> Self {
        Self {
            class,
            needed: Vec::new(),
            soname: None,
            runpath: None,
            runpath_tag: DT_RPATH,
            with_dynamic: true,
        }
    }

    /// Add a `DT_NEEDED` entry.
    pub fn needed(mut self, name: &str) -> Self {
        self.needed.push(name.to_string());
        self
    }

    /// Set the `DT_SONAME` entry.
    pub fn soname(mut self, name: &str) -> Self {
        self.soname = Some(name.to_string());
        self
    }

    /// Set the runtime search path (emitted as `DT_RPATH` by default).
    pub fn runpath(mut self, text: &str) -> Self {
        self.runpath = Some(text.to_string());
        self
    }

    /// Emit the search path with the new-style `DT_RUNPATH` tag.
    pub fn use_runpath_tag(mut self) -> Self {
        self.runpath_tag = DT_RUNPATH;
        self
    }

    /// Omit the `.dynamic` section entirely (a static-style image).
    pub fn no_dynamic(mut self) -> Self {
        self.with_dynamic = false;
        self
    }

    /// Serialize the image.
    pub fn build(&self) -> Vec<u8> {
        let (ehsize, shentsize) = match self.class {
            ElfClass::Elf32 => (52usize, 40usize),
            ElfClass::Elf64 => (64usize, 64usize),
        };

        let text = vec![0xC3u8; 16];

        // .dynstr: leading NUL, then every referenced string, NUL-terminated.
        let mut dynstr = vec![0u8];
        let mut push_str = |pool: &mut Vec<u8>, s: &str| -> u64 {
            let off = pool.len() as u64;
            pool.extend_from_slice(s.as_bytes());
            pool.push(0);
            off
        };
        let needed_offs: Vec<u64> = self
            .needed
            .iter()
            .map(|n| push_str(&mut dynstr, n))
            .collect();
        let soname_off = self.soname.as_ref().map(|n| push_str(&mut dynstr, n));
        let runpath_off = self.runpath.as_ref().map(|n| push_str(&mut dynstr, n));

        // .dynamic: (tag, value) pairs, NULL-terminated.
        let mut tags: Vec<(u64, u64)> = Vec::new();
        for off in &needed_offs {
            tags.push((DT_NEEDED, *off));
        }
        if let Some(off) = soname_off {
            tags.push((DT_SONAME, off));
        }
        if let Some(off) = runpath_off {
            tags.push((self.runpath_tag, off));
        }
        tags.push((0, 0));
        let mut dynamic = Vec::new();
        for (tag, value) in &tags {
            match self.class {
                ElfClass::Elf32 => {
                    dynamic.extend_from_slice(&(*tag as u32).to_le_bytes());
                    dynamic.extend_from_slice(&(*value as u32).to_le_bytes());
                }
                ElfClass::Elf64 => {
                    dynamic.extend_from_slice(&tag.to_le_bytes());
                    dynamic.extend_from_slice(&value.to_le_bytes());
                }
            }
        }

        let shstrtab = b"\0.text\0.dynstr\0.dynamic\0.shstrtab\0".to_vec();
        let (name_text, name_dynstr, name_dynamic, name_shstrtab) = (1u32, 7u32, 15u32, 24u32);

        let text_off = ehsize as u64;
        let dynstr_off = text_off + text.len() as u64;
        let dynamic_off = dynstr_off + dynstr.len() as u64;
        let shstrtab_off = if self.with_dynamic {
            dynamic_off + dynamic.len() as u64
        } else {
            dynamic_off
        };
        let shoff = shstrtab_off + shstrtab.len() as u64;
        let shnum: u16 = if self.with_dynamic { 5 } else { 4 };

        let mut out = Vec::new();
        self.write_ehdr(&mut out, shoff, shentsize as u16, shnum);
        out.extend_from_slice(&text);
        out.extend_from_slice(&dynstr);
        if self.with_dynamic {
            out.extend_from_slice(&dynamic);
        }
        out.extend_from_slice(&shstrtab);

        // Section header table: null, .text, .dynstr, [.dynamic], .shstrtab
        self.write_shdr(&mut out, 0, 0, 0, 0, 0);
        self.write_shdr(&mut out, name_text, 1, text_off, text.len() as u64, 0);
        self.write_shdr(&mut out, name_dynstr, 3, dynstr_off, dynstr.len() as u64, 0);
        if self.with_dynamic {
            let entsize = self.class.dynamic_entry_size();
            self.write_shdr(&mut out, name_dynamic, 6, dynamic_off, dynamic.len() as u64, entsize);
        }
        self.write_shdr(&mut out, name_shstrtab, 3, shstrtab_off, shstrtab.len() as u64, 0);

        out
    }

    fn write_ehdr(&self, out: &mut Vec<u8>, shoff: u64, shentsize: u16, shnum: u16) {
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
        let (class_byte, machine, ehsize) = match self.class {
            ElfClass::Elf32 => (1u8, 3u16, 52u16),
            ElfClass::Elf64 => (2u8, 62u16, 64u16),
        };
        out.push(class_byte);
        out.push(1); // little-endian
        out.push(1); // ident version
        out.extend_from_slice(&[0u8; 9]);

        out.extend_from_slice(&3u16.to_le_bytes()); // e_type = ET_DYN
        out.extend_from_slice(&machine.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        match self.class {
            ElfClass::Elf32 => {
                out.extend_from_slice(&0u32.to_le_bytes()); // e_entry
                out.extend_from_slice(&0u32.to_le_bytes()); // e_phoff
                out.extend_from_slice(&(shoff as u32).to_le_bytes());
            }
            ElfClass::Elf64 => {
                out.extend_from_slice(&0u64.to_le_bytes());
                out.extend_from_slice(&0u64.to_le_bytes());
                out.extend_from_slice(&shoff.to_le_bytes());
            }
        }
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&ehsize.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&shentsize.to_le_bytes());
        out.extend_from_slice(&shnum.to_le_bytes());
        out.extend_from_slice(&(shnum - 1).to_le_bytes()); // e_shstrndx = last
    }

    #[allow(clippy::too_many_arguments)]
    fn write_shdr(
        &self,
        out: &mut Vec<u8>,
        name_off: u32,
        sh_type: u32,
        offset: u64,
        size: u64,
        entsize: u64,
    ) {
        out.extend_from_slice(&name_off.to_le_bytes());
        out.extend_from_slice(&sh_type.to_le_bytes());
        match self.class {
            ElfClass::Elf32 => {
                out.extend_from_slice(&0u32.to_le_bytes()); // sh_flags
                out.extend_from_slice(&0u32.to_le_bytes()); // sh_addr
                out.extend_from_slice(&(offset as u32).to_le_bytes());
                out.extend_from_slice(&(size as u32).to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes()); // sh_link
                out.extend_from_slice(&0u32.to_le_bytes()); // sh_info
                out.extend_from_slice(&0u32.to_le_bytes()); // sh_addralign
                out.extend_from_slice(&(entsize as u32).to_le_bytes());
            }
            ElfClass::Elf64 => {
                out.extend_from_slice(&0u64.to_le_bytes());
                out.extend_from_slice(&0u64.to_le_bytes());
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&0u64.to_le_bytes());
                out.extend_from_slice(&entsize.to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sizes() {
        let data32 = ImageBuilder::new(ElfClass::Elf32).build();
        let data64 = ImageBuilder::new(ElfClass::Elf64).build();
        assert_eq!(data32[4], 1);
        assert_eq!(data64[4], 2);
        assert_eq!(&data32[..4], &[0x7F, b'E', b'L', b'F']);
    }

    #[test]
    fn test_dynstr_contains_names() {
        let data = ImageBuilder::new(ElfClass::Elf64)
            .needed("libhelper.so")
            .build();
        let pos = data
            .windows(b"libhelper.so\0".len())
            .position(|w| w == b"libhelper.so\0");
        assert!(pos.is_some());
    }
}
