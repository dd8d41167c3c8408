//! Resolve symbol names to target addresses
//!
//! Runtimes publish a few well-known structures (the debug structure pointer,
//! the flasher header) under stable names. Their addresses change with every
//! build, so they are looked up in the binaries' symbol tables each time they
//! are needed.

use std::{fs, path::Path};

use log::debug;
use object::{File, Object, ObjectSymbol};

use crate::error::Error;

/// Symbol pointing at the runtime debug structure
pub const DEBUG_STRUCT_SYMBOL: &str = "__rt_debug_struct_ptr";
/// Older runtimes publish the debug structure pointer under this name
pub const LEGACY_DEBUG_STRUCT_SYMBOL: &str = "debugStruct_ptr";
/// Control block of the flasher firmware
pub const FLASHER_HEADER_SYMBOL: &str = "flasherHeader";

/// Symbols of a single parsed binary
pub struct SymbolTable<'data> {
    object: File<'data>,
}

impl<'data> SymbolTable<'data> {
    /// Parse the symbol table of an ELF image already in memory.
    pub fn from_data(data: &'data [u8]) -> Result<Self, Error> {
        let object = File::parse(data)?;

        Ok(Self { object })
    }

    /// Address (`st_value`) of the first symbol named exactly `name`.
    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.object
            .symbols()
            .find(|symbol| symbol.name().is_ok_and(|n| n == name))
            .map(|symbol| symbol.address())
    }
}

/// Look `name` up in every binary, in order, returning the first match.
///
/// A symbol whose value is 0 counts as unresolved: address 0 is never a
/// usable base for the structures looked up this way.
pub fn resolve<P: AsRef<Path>>(binaries: &[P], name: &str) -> Result<Option<u64>, Error> {
    for binary in binaries {
        let path = binary.as_ref();
        let data = fs::read(path).map_err(|e| Error::FileOpenError(path.to_path_buf(), e))?;

        if let Some(addr) = SymbolTable::from_data(&data)?.address_of(name) {
            debug!("Found symbol {name} at {addr:#x} in {}", path.display());
            return Ok(Some(addr).filter(|addr| *addr != 0));
        }
    }

    debug!("Symbol {name} not found");

    Ok(None)
}

/// Try each of `names` in turn, returning the address of the first one found.
pub fn resolve_any<P: AsRef<Path>>(binaries: &[P], names: &[&str]) -> Result<Option<u64>, Error> {
    for name in names {
        if let Some(addr) = resolve(binaries, name)? {
            return Ok(Some(addr));
        }
    }

    Ok(None)
}

/// Like [resolve_any], but failing with [Error::UnresolvedSymbol] when none of
/// the names can be found.
pub fn resolve_required<P: AsRef<Path>>(binaries: &[P], names: &[&str]) -> Result<u64, Error> {
    resolve_any(binaries, names)?.ok_or_else(|| Error::UnresolvedSymbol {
        names: names.iter().map(|name| name.to_string()).collect(),
    })
}
