//! Per-module symbol tables.
//!
//! Stored as `module → name → [(address, nm type)]`. A name may have
//! several definitions (static symbols in different translation units);
//! lookups then need the `nm`-style type letter to pick one, otherwise
//! the ambiguity is an error. Addresses are kept full-width.

use std::collections::BTreeMap;

use log::debug;

use crate::profile::ProfileError;

/// One definition of a symbol.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SymbolDef {
    pub address: u64,
    /// `nm`-style type letter (`T`, `d`, `b`, …).
    pub nm_type: char,
}

/// Symbols grouped by module (`"kernel"` plus any loaded modules).
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    modules: BTreeMap<String, BTreeMap<String, Vec<SymbolDef>>>,
}

impl SymbolTable {
    pub fn insert(&mut self, module: &str, name: &str, address: u64, nm_type: char) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push(SymbolDef { address, nm_type });
    }

    /// Address of `name` in `module`.
    ///
    /// # Errors
    /// [`ProfileError::AmbiguousSymbol`] when several definitions exist
    /// and `nm_type` does not single one out.
    pub fn lookup(
        &self,
        module: &str,
        name: &str,
        nm_type: Option<char>,
    ) -> Result<Option<u64>, ProfileError> {
        let Some(symbols) = self.modules.get(module) else {
            debug!("module {module} not in the symbol table");
            return Ok(None);
        };
        let Some(defs) = symbols.get(name) else {
            return Ok(None);
        };
        match (defs.as_slice(), nm_type) {
            ([single], None) => Ok(Some(single.address)),
            (_, None) => Err(ProfileError::AmbiguousSymbol {
                name: name.to_string(),
            }),
            (defs, Some(ty)) => Ok(defs.iter().find(|d| d.nm_type == ty).map(|d| d.address)),
        }
    }

    /// All `(name, definitions)` pairs of a module.
    pub fn all_symbols<'a>(
        &'a self,
        module: &str,
    ) -> impl Iterator<Item = (&'a str, &'a [SymbolDef])> {
        self.modules
            .get(module)
            .into_iter()
            .flat_map(|symbols| symbols.iter().map(|(name, defs)| (name.as_str(), defs.as_slice())))
    }

    /// The smallest symbol address strictly greater than `address`.
    ///
    /// Structures without a recorded size get an upper bound this way:
    /// the next symbol caps their extent.
    #[must_use]
    pub fn next_symbol_address(&self, module: &str, address: u64) -> Option<u64> {
        self.modules.get(module).and_then(|symbols| {
            symbols
                .values()
                .flatten()
                .map(|d| d.address)
                .filter(|&a| a > address)
                .min()
        })
    }
}
