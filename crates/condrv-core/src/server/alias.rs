//! Per-executable command alias store.
//!
//! Exe and source lookups are case-insensitive; the serialized enumeration
//! forms are `"src=tgt\0src=tgt\0\0"` and `"exe\0exe\0\0"` in UTF-16
//! units, with the doubled terminator only present when the list is
//! non-empty. Length queries report exactly the units the enumeration
//! produces.

use std::collections::BTreeMap;

use tracing::debug;

#[derive(Debug, Default)]
struct ExeAliases {
    /// Original-case exe name, as first registered
    name: String,
    /// Caseless source -> (original-case source, target)
    aliases: BTreeMap<String, (String, String)>,
}

/// All alias state owned by the server
#[derive(Debug, Default)]
pub struct AliasStore {
    exes: BTreeMap<String, ExeAliases>,
}

fn caseless(text: &str) -> String {
    text.to_lowercase()
}

impl AliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `source` -> `target` under `exe`. An empty target removes
    /// the alias; the exe entry itself persists for enumeration.
    pub fn add(&mut self, exe: &str, source: &str, target: &str) {
        let entry = self
            .exes
            .entry(caseless(exe))
            .or_insert_with(|| ExeAliases {
                name: exe.to_string(),
                aliases: BTreeMap::new(),
            });

        if target.is_empty() {
            debug!("Removing alias {:?} for {:?}", source, exe);
            entry.aliases.remove(&caseless(source));
        } else {
            entry
                .aliases
                .insert(caseless(source), (source.to_string(), target.to_string()));
        }
    }

    pub fn get(&self, exe: &str, source: &str) -> Option<&str> {
        self.exes
            .get(&caseless(exe))?
            .aliases
            .get(&caseless(source))
            .map(|(_, target)| target.as_str())
    }

    /// `"src=tgt\0src=tgt\0\0"` as UTF-16 units; empty when the exe has no
    /// aliases
    pub fn serialize_aliases(&self, exe: &str) -> Vec<u16> {
        let mut units = Vec::new();
        if let Some(entry) = self.exes.get(&caseless(exe)) {
            for (source, target) in entry.aliases.values() {
                units.extend(source.encode_utf16());
                units.push(u16::from(b'='));
                units.extend(target.encode_utf16());
                units.push(0);
            }
        }
        if !units.is_empty() {
            units.push(0);
        }
        units
    }

    /// Unit count `serialize_aliases` will produce for `exe`
    pub fn aliases_length(&self, exe: &str) -> usize {
        self.serialize_aliases(exe).len()
    }

    /// `"exe\0exe\0\0"` as UTF-16 units
    pub fn serialize_exes(&self) -> Vec<u16> {
        let mut units = Vec::new();
        for entry in self.exes.values() {
            if entry.aliases.is_empty() {
                continue;
            }
            units.extend(entry.name.encode_utf16());
            units.push(0);
        }
        if !units.is_empty() {
            units.push(0);
        }
        units
    }

    pub fn exes_length(&self) -> usize {
        self.serialize_exes().len()
    }
}
