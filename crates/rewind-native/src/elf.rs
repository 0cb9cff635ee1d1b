use std::ops::Range;
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use goblin::elf::header::ET_DYN;
use rewind_proc::FunctionLookup;

/// Function symbols of an ELF executable.
#[derive(Clone, Debug, Default)]
pub struct ElfSymbols {
    /// Functions sorted by start address.
    functions: Vec<(Range<u64>, String)>,
}

impl ElfSymbols {
    /// Loads the function symbols of the executable at `path`.
    ///
    /// `entry_point` is the runtime entry point of the executable, used to
    /// relocate the symbols of a position-independent executable.
    pub fn open(path: &Path, entry_point: Option<u64>) -> crate::Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| crate::Error::File(PathBuf::from(path), e))?;

        Self::parse(&bytes, entry_point)
    }

    /// Parses the function symbols of an executable.
    ///
    /// Both the static (`.symtab`) and dynamic (`.dynsym`) symbol tables are
    /// used, so that stripped executables still expose their exported
    /// functions.
    pub fn parse(bytes: &[u8], entry_point: Option<u64>) -> crate::Result<Self> {
        let elf = Elf::parse(bytes)?;

        let bias = match entry_point {
            Some(entry) if elf.header.e_type == ET_DYN => entry.wrapping_sub(elf.entry),
            _ => 0,
        };

        let symtab = elf.syms.iter().map(|sym| (sym, &elf.strtab));
        let dynsym = elf.dynsyms.iter().map(|sym| (sym, &elf.dynstrtab));

        let mut functions: Vec<_> = symtab
            .chain(dynsym)
            .filter(|(sym, _)| sym.is_function() && sym.st_value != 0 && sym.st_size != 0)
            .filter_map(|(sym, strtab)| {
                let name = strtab.get_at(sym.st_name)?;
                let start = sym.st_value.wrapping_add(bias);
                Some((start..start + sym.st_size, name.to_owned()))
            })
            .collect();

        functions.sort_by_key(|(range, _)| range.start);
        functions.dedup_by_key(|(range, _)| range.start);

        tracing::debug!(
            count = functions.len(),
            bias = format_args!("{bias:#x}"),
            "loaded function symbols"
        );

        Ok(Self { functions })
    }

    /// Returns the address of the function with the given name.
    pub fn addr_of(&self, name: &str) -> Option<u64> {
        self.functions
            .iter()
            .find_map(|(range, sym)| (sym == name).then_some(range.start))
    }

    /// Returns the number of known functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns whether no function is known.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl FunctionLookup for ElfSymbols {
    fn function_at(&self, addr: u64) -> Option<&str> {
        let idx = self.functions.partition_point(|(range, _)| range.start <= addr);

        let (range, name) = self.functions.get(idx.checked_sub(1)?)?;
        range.contains(&addr).then_some(name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use rewind_proc::FunctionLookup;

    use super::ElfSymbols;

    #[test]
    fn lookup_sorted_functions() {
        let symbols = ElfSymbols {
            functions: vec![
                (0x1000..0x1010, "main".to_owned()),
                (0x1010..0x1018, "helper".to_owned()),
                (0x1100..0x1180, "runtime.call32".to_owned()),
            ],
        };

        assert_eq!(symbols.function_at(0xfff), None);
        assert_eq!(symbols.function_at(0x1000), Some("main"));
        assert_eq!(symbols.function_at(0x100f), Some("main"));
        assert_eq!(symbols.function_at(0x1010), Some("helper"));
        assert_eq!(symbols.function_at(0x1020), None);
        assert_eq!(symbols.function_at(0x117f), Some("runtime.call32"));

        assert_eq!(symbols.addr_of("helper"), Some(0x1010));
        assert_eq!(symbols.addr_of("missing"), None);
    }

    #[test]
    fn not_an_elf() {
        assert!(ElfSymbols::parse(b"#!/bin/sh\n", None).is_err());
    }
}
