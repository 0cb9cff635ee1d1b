use scroll::Pread;

/// End of the auxiliary vector.
pub const AT_NULL: u64 = 0;

/// Entry point of the executable.
pub const AT_ENTRY: u64 = 9;

/// Iterates over the `(type, value)` entries of an auxiliary vector, as found
/// in `/proc/<pid>/auxv` or in the `NT_AUXV` note of a core dump.
pub fn entries(
    bytes: &[u8],
    elf_ctx: goblin::container::Ctx,
) -> impl Iterator<Item = crate::Result<(u64, u64)>> + '_ {
    let mut offset = 0;

    std::iter::from_fn(move || {
        if offset + elf_ctx.size() * 2 > bytes.len() {
            return None;
        }

        match read_entry(bytes, &mut offset, elf_ctx) {
            Ok((AT_NULL, _)) => None,
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                offset = bytes.len();
                Some(Err(e))
            }
        }
    })
}

/// Returns the value of the first entry of type `ty`.
pub fn find(bytes: &[u8], elf_ctx: goblin::container::Ctx, ty: u64) -> crate::Result<Option<u64>> {
    for entry in entries(bytes, elf_ctx) {
        let (auxv_ty, auxv_val) = entry?;

        if auxv_ty == ty {
            return Ok(Some(auxv_val));
        }
    }

    Ok(None)
}

fn read_entry(
    bytes: &[u8],
    offset: &mut usize,
    elf_ctx: goblin::container::Ctx,
) -> crate::Result<(u64, u64)> {
    if elf_ctx.is_big() {
        let ty: u64 = bytes.gread_with(offset, elf_ctx.le)?;
        let val: u64 = bytes.gread_with(offset, elf_ctx.le)?;

        Ok((ty, val))
    } else {
        let ty: u32 = bytes.gread_with(offset, elf_ctx.le)?;
        let val: u32 = bytes.gread_with(offset, elf_ctx.le)?;

        Ok((ty as u64, val as u64))
    }
}
