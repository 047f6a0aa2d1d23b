//! Parsed ELF image and the dynamic-entry decoder.
//!
//! `ElfImage::parse` walks header → section table → string tables →
//! `.dynamic` and keeps only the decoded dependency metadata. The image is
//! built once from a byte source and thrown away after use; nothing here
//! holds on to the input.

use std::collections::HashMap;
use std::path::Path;

use crate::header::{
    ElfClass, ElfHeader, SectionHeader, DT_NEEDED, DT_RPATH, DT_RUNPATH, DT_SONAME, SHT_DYNAMIC,
    SHT_STRTAB,
};
use crate::reader::Reader;
use crate::strtab::StringTable;

/// Errors produced while decoding an ELF image.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The magic signature is absent; this is not an ELF object.
    #[error("not an ELF object")]
    NotElf,

    /// The class byte names a pointer width we do not understand.
    #[error("unknown ELF class: {0}")]
    UnsupportedClass(u8),

    /// A header, section, or table points past the end of the file.
    #[error("truncated ELF image")]
    Truncated,

    /// No usable section-name string table was found.
    #[error("section-name string table missing")]
    MissingStringTable,

    /// The image has no `.dynamic` section (e.g. a static object).
    ///
    /// Callers treat this as "no dependencies, nothing to rewrite", not as
    /// a failure.
    #[error("no dynamic section")]
    NoDynamicSection,

    /// File I/O error while reading the image.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A runtime search path together with its location in the file.
///
/// `file_offset` is the absolute offset of the first byte of the string
/// (string table section offset + offset within the table). The extraction
/// layer overwrites the string in place at exactly this position, which is
/// why the offset is recorded at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPath {
    /// The search path text, e.g. `$ORIGIN/..`.
    pub text: String,
    /// Absolute file offset of the string's first byte.
    pub file_offset: u64,
}

/// One decoded dynamic-linking entry the loader cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicEntry {
    /// `DT_NEEDED`: a library this object requires at load time.
    Needed(String),
    /// `DT_SONAME`: the object's own logical name.
    SoName(String),
    /// `DT_RPATH`/`DT_RUNPATH`: the runtime search path.
    RunPath(RunPath),
}

/// Parsed representation of one ELF shared object.
#[derive(Debug, Clone)]
pub struct ElfImage {
    /// Pointer width of the image.
    pub class: ElfClass,
    /// Section headers with resolved names.
    pub sections: Vec<SectionHeader>,
    /// Decoded dynamic entries in encounter order, duplicates preserved.
    pub entries: Vec<DynamicEntry>,
}

impl ElfImage {
    /// Parse an ELF image from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(data);
        let header = ElfHeader::parse(&mut r)?;

        let mut sections = Vec::with_capacity(header.shnum as usize);
        r.seek(header.shoff);
        for _ in 0..header.shnum {
            sections.push(SectionHeader::parse(&mut r, header.class)?);
        }

        resolve_section_names(data, &header, &mut sections)?;
        let strtabs = decode_string_tables(data, &sections)?;
        let entries = decode_dynamic(data, &header, &sections, &strtabs)?;

        Ok(Self {
            class: header.class,
            sections,
            entries,
        })
    }

    /// Parse an ELF image from a file on disk.
    pub fn parse_file(path: &Path) -> Result<Self, FormatError> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Needed library names, in encounter order.
    pub fn needed(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            DynamicEntry::Needed(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Declared sonames, in encounter order.
    pub fn sonames(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            DynamicEntry::SoName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// All runtime search path entries, in encounter order.
    pub fn runpaths(&self) -> impl Iterator<Item = &RunPath> {
        self.entries.iter().filter_map(|e| match e {
            DynamicEntry::RunPath(rp) => Some(rp),
            _ => None,
        })
    }

    /// The first runtime search path, if any.
    pub fn runpath(&self) -> Option<&RunPath> {
        self.runpaths().next()
    }
}

/// Locate the section-name string table and resolve every section's name.
///
/// The authoritative index is `e_shstrndx`, but some producers emit images
/// where it is unreliable, so the table is located by scanning string-table
/// sections for the `.text` marker first and the header index is used as a
/// fallback. Documented heuristic, not a guaranteed identification.
fn resolve_section_names(
    data: &[u8],
    header: &ElfHeader,
    sections: &mut [SectionHeader],
) -> Result<(), FormatError> {
    let mut shstrtab_index = None;
    for (i, section) in sections.iter().enumerate() {
        if section.sh_type != SHT_STRTAB {
            continue;
        }
        if let Ok(body) = section.body(data) {
            if contains_subslice(body, b".text") {
                shstrtab_index = Some(i);
                break;
            }
        }
    }
    if shstrtab_index.is_none() {
        let idx = header.shstrndx as usize;
        if idx < sections.len() && sections[idx].sh_type == SHT_STRTAB {
            shstrtab_index = Some(idx);
        }
    }
    let shstrtab_index = shstrtab_index.ok_or(FormatError::MissingStringTable)?;

    let table = StringTable::decode(sections[shstrtab_index].body(data)?);
    for section in sections.iter_mut().skip(1) {
        section.name = table
            .get(section.name_offset as u64)
            .unwrap_or_default()
            .to_string();
    }
    Ok(())
}

/// Decode every string-table section, keyed by resolved section name.
///
/// The section's file offset is kept alongside so dynamic-entry decoding
/// can compute absolute offsets of runtime search path strings.
fn decode_string_tables(
    data: &[u8],
    sections: &[SectionHeader],
) -> Result<HashMap<String, (StringTable, u64)>, FormatError> {
    let mut tables = HashMap::new();
    for section in sections {
        if section.sh_type != SHT_STRTAB || section.name.is_empty() {
            continue;
        }
        let table = StringTable::decode(section.body(data)?);
        tables.insert(section.name.clone(), (table, section.offset));
    }
    Ok(tables)
}

/// Decode the `.dynamic` section into the entries the loader uses.
fn decode_dynamic(
    data: &[u8],
    header: &ElfHeader,
    sections: &[SectionHeader],
    strtabs: &HashMap<String, (StringTable, u64)>,
) -> Result<Vec<DynamicEntry>, FormatError> {
    let dynamic = sections
        .iter()
        .find(|s| s.sh_type == SHT_DYNAMIC)
        .ok_or(FormatError::NoDynamicSection)?;

    let entry_size = if dynamic.entry_size != 0 {
        dynamic.entry_size
    } else {
        header.class.dynamic_entry_size()
    };
    let count = dynamic.size / entry_size;

    let mut r = Reader::new(data);
    r.seek(dynamic.offset);
    let mut pairs = Vec::new();
    for _ in 0..count {
        let (tag, value) = match header.class {
            ElfClass::Elf32 => (r.u32()? as u64, r.u32()? as u64),
            ElfClass::Elf64 => (r.u64()?, r.u64()?),
        };
        if tag == 0 {
            break;
        }
        pairs.push((tag, value));
    }

    // Dynamic string values may live in either the symbol string table or
    // the dynamic string table; probe in that order.
    let lookup_order = [".strtab", ".dynstr"];
    let mut entries = Vec::new();
    for (tag, value) in pairs {
        if !matches!(tag, DT_NEEDED | DT_SONAME | DT_RPATH | DT_RUNPATH) || value == 0 {
            continue;
        }
        let Some((text, table_offset)) = lookup_order.iter().find_map(|name| {
            let (table, offset) = strtabs.get(*name)?;
            Some((table.get(value)?.to_string(), *offset))
        }) else {
            continue;
        };
        let entry = match tag {
            DT_NEEDED => DynamicEntry::Needed(text),
            DT_SONAME => DynamicEntry::SoName(text),
            _ => DynamicEntry::RunPath(RunPath {
                text,
                file_offset: table_offset + value,
            }),
        };
        entries.push(entry);
    }
    Ok(entries)
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
