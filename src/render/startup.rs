//! Startup template: reset handler with data/bss initialization, the
//! interrupt vector table and the matching `device.x` provide-script.
//!
//! Every device vector defaults to `DefaultHandler` through a `PROVIDE`
//! line; a firmware overrides a single slot by defining a function with the
//! interrupt's external linkage name. The table itself is a fixed-size
//! array with reserved slots materialized by the resolver.

use std::fmt::Write;

use quote::quote;

use super::{banner, pretty, text_banner, RenderError, TemplateContext};
use crate::resolve::VectorSlot;
use crate::util::{ident, unsuffixed};

pub fn render(ctx: &TemplateContext) -> Result<String, RenderError> {
    let mcu = ctx.str_var("mcu")?;
    let cfg = ctx.cfg;

    let device_names: Vec<_> = cfg
        .vector_table
        .iter()
        .filter_map(|slot| match slot {
            VectorSlot::Device { name, .. } => Some(ident(name)),
            VectorSlot::Reserved => None,
        })
        .collect();

    let elements = cfg.vector_table.iter().map(|slot| match slot {
        VectorSlot::Device { name, .. } => {
            let handler = ident(name);
            quote!(Vector { handler: #handler })
        }
        VectorSlot::Reserved => quote!(Vector { reserved: 0 }),
    });
    let n = unsuffixed(cfg.vector_table.len() as u64);

    let enable_fpu = cfg.features.fpu.then(|| {
        quote! {
            // Grant full access to coprocessors CP10/CP11 before any
            // floating-point instruction can execute.
            const CPACR: *mut u32 = 0xe000_ed88 as *mut u32;
            CPACR.write_volatile(CPACR.read_volatile() | (0b1111 << 20));
        }
    });

    let table_doc = format!("Device interrupt vectors of the {mcu}.");
    let tokens = quote! {
        extern "C" {
            #(fn #device_names();)*
        }

        #[doc(hidden)]
        #[repr(C)]
        pub union Vector {
            handler: unsafe extern "C" fn(),
            reserved: usize,
        }

        #[doc = #table_doc]
        #[link_section = ".vector_table.interrupts"]
        #[no_mangle]
        pub static __INTERRUPTS: [Vector; #n] = [
            #(#elements),*
        ];

        /// Fallback for every interrupt the firmware does not override.
        #[no_mangle]
        pub extern "C" fn DefaultHandler() {
            loop {}
        }

        /// Reset entry: initialize statics, then hand control to `main`.
        #[no_mangle]
        pub unsafe extern "C" fn Reset() -> ! {
            extern "C" {
                static mut __sbss: u32;
                static mut __ebss: u32;
                static mut __sdata: u32;
                static mut __edata: u32;
                static __sidata: u32;
                fn main() -> !;
            }

            #enable_fpu

            let mut bss = core::ptr::addr_of_mut!(__sbss);
            let ebss = core::ptr::addr_of_mut!(__ebss);
            while bss < ebss {
                bss.write_volatile(0);
                bss = bss.add(1);
            }

            let mut data = core::ptr::addr_of_mut!(__sdata);
            let edata = core::ptr::addr_of_mut!(__edata);
            let mut src = core::ptr::addr_of!(__sidata);
            while data < edata {
                data.write_volatile(src.read());
                data = data.add(1);
                src = src.add(1);
            }

            main()
        }
    };

    Ok(format!(
        "{}{}",
        banner("Startup code and vector table", mcu),
        pretty("startup", tokens)?
    ))
}

/// `device.x`: alias every device vector to `DefaultHandler` unless the
/// firmware provides its own definition.
pub fn render_device_x(ctx: &TemplateContext) -> Result<String, RenderError> {
    let mcu = ctx.str_var("mcu")?;

    let mut out = text_banner("Interrupt provides", mcu);
    for slot in &ctx.cfg.vector_table {
        if let VectorSlot::Device { name, .. } = slot {
            writeln!(out, "PROVIDE({name} = DefaultHandler);").unwrap();
        }
    }
    Ok(out)
}
