//! Register-block template: one `#[repr(C)]` struct per peripheral kind,
//! with reserved padding, unions for exact-overlap registers, per-field mask
//! and shift constants and a compile-time size assertion. Layout decisions
//! were already made by the resolver; this file only writes them down.

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::LitInt;

use super::{banner, pretty, register_type, RenderError, TemplateContext};
use crate::resolve::{BlockItem, RegisterModel};
use crate::util::{
    ident, unsuffixed, ToSanitizedPascalCase, ToSanitizedSnakeCase, ToSanitizedUpperCase,
};

fn hex_lit(value: u64) -> LitInt {
    LitInt::new(&format!("0x{value:02x}"), Span::call_site())
}

fn struct_field(reg: &RegisterModel) -> Result<TokenStream, RenderError> {
    let doc = format!("0x{:02x} - {}", reg.offset, reg.label);
    let name = ident(&reg.name.to_sanitized_snake_case());
    let ty = register_type(reg.width)?;
    Ok(quote! {
        #[doc = #doc]
        pub #name: #ty
    })
}

/// Constants module for one register: offset, reset value and mask/shift
/// pairs for every bitfield.
fn const_module(reg: &RegisterModel) -> Result<TokenStream, RenderError> {
    let mod_name = ident(&reg.name.to_sanitized_snake_case());
    let ty = register_type(reg.width)?;
    let offset = hex_lit(reg.offset);
    let reset = hex_lit(reg.reset);

    let fields = reg.fields.iter().map(|f| {
        let mask_name = ident(&format!("{}_MASK", f.name.to_sanitized_upper_case()));
        let shift_name = ident(&format!("{}_SHIFT", f.name.to_sanitized_upper_case()));
        let mask = hex_lit(f.mask);
        let shift = unsuffixed(u64::from(f.lsb));
        let doc = format!("Bits {}:{} - {}", f.lsb, f.msb, f.name);
        quote! {
            #[doc = #doc]
            pub const #mask_name: #ty = #mask;
            pub const #shift_name: u32 = #shift;
        }
    });

    let doc = format!("Offsets, reset value and bitfields of `{}`.", reg.label);
    Ok(quote! {
        #[doc = #doc]
        pub mod #mod_name {
            pub const OFFSET: usize = #offset;
            pub const RESET: #ty = #reset;
            #(#fields)*
        }
    })
}

fn union_name(registers: &[RegisterModel]) -> String {
    registers
        .iter()
        .map(|r| r.name.to_sanitized_pascal_case().into_owned())
        .collect::<Vec<_>>()
        .join("")
}

pub fn render(ctx: &TemplateContext) -> Result<String, RenderError> {
    let mcu = ctx.str_var("mcu")?;
    let kind = ctx.str_var("peripheral_kind")?;
    let p = ctx.peripheral()?;
    let block = &p.block;

    let mut unions = Vec::new();
    let mut struct_fields = Vec::new();
    let mut const_modules = Vec::new();

    for item in &block.items {
        match item {
            BlockItem::Register(reg) => {
                struct_fields.push(struct_field(reg)?);
                const_modules.push(const_module(reg)?);
            }
            BlockItem::Padding { index, bytes } => {
                let name = ident(&format!("_reserved{index}"));
                let len = unsuffixed(*bytes);
                struct_fields.push(quote! {
                    #name: [u8; #len]
                });
            }
            BlockItem::Union {
                offset, registers, ..
            } => {
                let ty_name = ident(&union_name(registers));
                let mut members = Vec::with_capacity(registers.len());
                for r in registers {
                    let doc = format!("{} view of offset 0x{:02x}", r.label, r.offset);
                    let name = ident(&r.name.to_sanitized_snake_case());
                    let ty = register_type(r.width)?;
                    members.push(quote! {
                        #[doc = #doc]
                        pub #name: #ty
                    });
                }
                let union_doc = format!(
                    "Registers sharing offset 0x{offset:02x}; access is selected by the hardware, not the program."
                );
                unions.push(quote! {
                    #[doc = #union_doc]
                    #[repr(C)]
                    #[derive(Clone, Copy)]
                    pub union #ty_name {
                        #(#members),*
                    }
                });

                let field_name = ident(
                    &registers
                        .iter()
                        .map(|r| r.name.to_sanitized_snake_case().into_owned())
                        .collect::<Vec<_>>()
                        .join("_"),
                );
                let doc = format!("0x{offset:02x} - overlapping registers");
                struct_fields.push(quote! {
                    #[doc = #doc]
                    pub #field_name: #ty_name
                });
                for r in registers {
                    const_modules.push(const_module(r)?);
                }
            }
        }
    }

    let size = hex_lit(block.size);
    let block_doc = format!("Register block of the `{kind}` peripheral kind.");
    let tokens = quote! {
        #(#unions)*

        #[doc = #block_doc]
        #[repr(C)]
        pub struct RegisterBlock {
            #(#struct_fields),*
        }

        const _: () = assert!(core::mem::size_of::<RegisterBlock>() == #size);

        #(#const_modules)*
    };

    let what = format!("Register block and bitfield constants for `{kind}`");
    Ok(format!(
        "{}{}",
        banner(&what, mcu),
        pretty("register-block", tokens)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{PinArtifacts, TemplateContext};
    use crate::resolve::testutil::config;

    #[test]
    fn block_carries_size_assertion_and_masks() {
        let cfg = config();
        let pins = PinArtifacts::from_config(&cfg);
        let ctx = TemplateContext::for_peripheral(&cfg, &cfg.peripherals[0], &pins);
        let out = render(&ctx).unwrap();

        assert!(out.contains("#[repr(C)]"));
        assert!(out.contains("pub struct RegisterBlock"));
        assert!(out.contains("size_of::<RegisterBlock>() == 0x1c"));
        // TXE is bit 7 of SR.
        assert!(out.contains("pub const TXE_MASK: u32 = 0x80;"));
        assert!(out.contains("pub const TXE_SHIFT: u32 = 7;"));
        // Trailing reserved span up to the declared size.
        assert!(out.contains("_reserved0: [u8; 12]"));
    }

    #[test]
    fn device_context_cannot_render_a_peripheral_template() {
        let cfg = config();
        let ctx = TemplateContext::device(&cfg);
        let err = render(&ctx).unwrap_err();
        assert!(matches!(err, RenderError::UnknownVariable { name }
            if name == "peripheral_kind"));
    }
}
