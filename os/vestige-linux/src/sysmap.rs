//! System.map ingestion.
//!
//! The symbol input for Linux profiles is the classic `System.map`
//! text: one `address type-letter name` triple per line. The width of
//! the address column doubles as the memory-model detector (eight hex
//! digits on 32-bit kernels, sixteen on 64-bit ones). Unparsable lines
//! are skipped, matching how the files ship in the wild.

use log::debug;
use vestige_obj::MemoryModel;

/// One parsed symbol line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapSymbol {
    pub name: String,
    pub address: u64,
    pub nm_type: char,
}

/// A parsed System.map.
#[derive(Clone, Debug)]
pub struct SystemMap {
    pub memory_model: MemoryModel,
    pub symbols: Vec<MapSymbol>,
}

/// Parse `data` as System.map text.
///
/// Returns `None` when not a single symbol line parses; the memory
/// model comes from the first line that does.
#[must_use]
pub fn parse_system_map(data: &str) -> Option<SystemMap> {
    let mut memory_model = None;
    let mut symbols = Vec::new();

    for line in data.lines() {
        let mut parts = line.split_whitespace();
        let (Some(addr), Some(ty), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Ok(address) = u64::from_str_radix(addr, 16) else {
            continue;
        };
        let Some(nm_type) = ty.chars().next() else {
            continue;
        };
        memory_model.get_or_insert(if addr.len() > 8 {
            MemoryModel::Bits64
        } else {
            MemoryModel::Bits32
        });
        symbols.push(MapSymbol {
            name: name.to_string(),
            address,
            nm_type,
        });
    }

    let memory_model = memory_model?;
    debug!(
        "System.map: {} symbols, {memory_model:?}",
        symbols.len()
    );
    Some(SystemMap {
        memory_model,
        symbols,
    })
}
