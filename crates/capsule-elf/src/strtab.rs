//! ELF string table decoding.
//!
//! A string table section is a pool of NUL-terminated byte runs. Offsets
//! recorded elsewhere in the file (section names, dynamic entry values)
//! index into the pool, and producers may point into the *middle* of a
//! stored string to reuse its suffix (".so.6" inside "libc.so.6"), so in
//! addition to every run start we record a secondary entry at the first
//! internal dot of each name.

use std::collections::HashMap;

/// A decoded string table: offset within the section body → string.
#[derive(Debug, Default, Clone)]
pub struct StringTable {
    entries: HashMap<u64, String>,
}

impl StringTable {
    /// Decode all NUL-terminated runs in a string table section body.
    ///
    /// A run starts one past each NUL byte and ends at the next NUL; a run
    /// with no terminator is dropped. The leading run at offset 0 is never
    /// recorded (a conforming table begins with a NUL byte anyway).
    ///
    /// Names are arbitrary bytes, so the dot scan and all offset
    /// arithmetic happen on the raw slice; conversion to `String` is
    /// lossy and last, keeping recorded offsets equal to file offsets.
    pub fn decode(raw: &[u8]) -> Self {
        let mut entries = HashMap::new();
        let mut i = 0;
        while i < raw.len() {
            if raw[i] != 0 {
                i += 1;
                continue;
            }
            let start = i + 1;
            let Some(len) = raw[start..].iter().position(|&b| b == 0) else {
                break;
            };
            let end = start + len;
            let name = &raw[start..end];
            if name.len() > 1 {
                if let Some(dot) = name[1..].iter().position(|&b| b == b'.') {
                    let suffix_off = start + dot + 1;
                    entries.insert(
                        suffix_off as u64,
                        String::from_utf8_lossy(&name[dot + 1..]).into_owned(),
                    );
                }
            }
            entries.insert(start as u64, String::from_utf8_lossy(name).into_owned());
            i = end;
        }
        Self { entries }
    }

    /// Look up the string starting at `offset`.
    pub fn get(&self, offset: u64) -> Option<&str> {
        self.entries.get(&offset).map(|s| s.as_str())
    }

    /// Number of recorded offsets (including suffix entries).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table recorded no strings at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
