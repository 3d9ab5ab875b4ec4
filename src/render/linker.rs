//! `memory.x` template: the memory map consumed by the linker script of the
//! runtime crate. Pure text; every value is pulled from the render context
//! so a hole in the resolved configuration fails the render instead of
//! producing a linkable-but-wrong map.

use std::fmt::Write;

use super::{format_hex, text_banner, RenderError, TemplateContext};

pub fn render(ctx: &TemplateContext) -> Result<String, RenderError> {
    let mcu = ctx.str_var("mcu")?;
    let flash_base = format_hex(ctx.u64_var("flash_base")?, 8)?;
    let flash_size = format_hex(ctx.u64_var("flash_size")?, 8)?;
    let sram_base = format_hex(ctx.u64_var("sram_base")?, 8)?;
    let sram_size = format_hex(ctx.u64_var("sram_size")?, 8)?;
    let stack_size = format_hex(ctx.u64_var("stack_size")?, 8)?;

    let mut out = text_banner("Memory map", mcu);
    writeln!(out, "MEMORY").unwrap();
    writeln!(out, "{{").unwrap();
    writeln!(out, "  FLASH : ORIGIN = {flash_base}, LENGTH = {flash_size}").unwrap();
    writeln!(out, "  RAM : ORIGIN = {sram_base}, LENGTH = {sram_size}").unwrap();
    writeln!(out, "}}").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "_stack_size = {stack_size};").unwrap();
    writeln!(out, "_stack_start = ORIGIN(RAM) + LENGTH(RAM);").unwrap();
    Ok(out)
}
