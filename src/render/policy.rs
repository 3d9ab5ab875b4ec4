//! Hardware-policy template: one unit struct per (peripheral, MCU) pair with
//! the register base address and peripheral clock baked in as const generic
//! parameters, so every operation compiles down to the same volatile access
//! a hand-written driver would contain.
//!
//! Each method also invokes the `reg_access_hook!` macro. The definition
//! emitted here is a no-op; a test build compiled with `--cfg
//! reg_access_hook` supplies its own and can route register traffic into a
//! mock backing store without touching the generated logic.

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::LitInt;

use super::{banner, pretty, RenderError, TemplateContext};
use crate::resolve::{OpLowered, OpModel};
use crate::util::{ident, unsuffixed, ToSanitizedPascalCase, ToSanitizedUpperCase};

fn hex_lit(value: u64) -> LitInt {
    LitInt::new(&format!("0x{value:02x}"), Span::call_site())
}

fn method(op: &OpModel) -> TokenStream {
    let name = ident(&op.method);
    let doc = &op.doc;

    match op.lowered {
        OpLowered::Set { offset, mask } => {
            let offset = hex_lit(offset);
            let mask = hex_lit(mask);
            quote! {
                #[doc = #doc]
                #[inline(always)]
                pub fn #name() {
                    unsafe {
                        let reg = Self::reg(#offset);
                        let value = reg.read_volatile() | #mask;
                        reg_access_hook!(write, BASE + #offset, value);
                        reg.write_volatile(value);
                    }
                }
            }
        }
        OpLowered::Clear { offset, mask } => {
            let offset = hex_lit(offset);
            let mask = hex_lit(mask);
            quote! {
                #[doc = #doc]
                #[inline(always)]
                pub fn #name() {
                    unsafe {
                        let reg = Self::reg(#offset);
                        let value = reg.read_volatile() & !#mask;
                        reg_access_hook!(write, BASE + #offset, value);
                        reg.write_volatile(value);
                    }
                }
            }
        }
        OpLowered::WriteField {
            offset,
            mask,
            shift,
        } => {
            let offset = hex_lit(offset);
            let mask = hex_lit(mask);
            let shift = unsuffixed(u64::from(shift));
            quote! {
                #[doc = #doc]
                #[inline(always)]
                pub fn #name(value: u32) {
                    unsafe {
                        let reg = Self::reg(#offset);
                        let value = (reg.read_volatile() & !#mask) | ((value << #shift) & #mask);
                        reg_access_hook!(write, BASE + #offset, value);
                        reg.write_volatile(value);
                    }
                }
            }
        }
        OpLowered::ReadField {
            offset,
            mask,
            shift,
        } => {
            let offset = hex_lit(offset);
            let mask = hex_lit(mask);
            let shift = unsuffixed(u64::from(shift));
            quote! {
                #[doc = #doc]
                #[inline(always)]
                pub fn #name() -> u32 {
                    unsafe {
                        let reg = Self::reg(#offset);
                        reg_access_hook!(read, BASE + #offset);
                        (reg.read_volatile() & #mask) >> #shift
                    }
                }
            }
        }
        OpLowered::WriteRegister { offset } => {
            let offset = hex_lit(offset);
            quote! {
                #[doc = #doc]
                #[inline(always)]
                pub fn #name(value: u32) {
                    unsafe {
                        let reg = Self::reg(#offset);
                        reg_access_hook!(write, BASE + #offset, value);
                        reg.write_volatile(value);
                    }
                }
            }
        }
        OpLowered::BaudDivisor {
            offset,
            mask,
            shift,
            scale,
        } => {
            let offset = hex_lit(offset);
            let mask = hex_lit(mask);
            let shift = unsuffixed(u64::from(shift));
            let scale = unsuffixed(scale);
            quote! {
                #[doc = #doc]
                #[inline(always)]
                pub fn #name(rate: u32) {
                    let divisor = CLOCK_HZ / (#scale * rate);
                    unsafe {
                        let reg = Self::reg(#offset);
                        let value = (reg.read_volatile() & !#mask) | ((divisor << #shift) & #mask);
                        reg_access_hook!(write, BASE + #offset, value);
                        reg.write_volatile(value);
                    }
                }
            }
        }
    }
}

pub fn render(ctx: &TemplateContext) -> Result<String, RenderError> {
    let mcu = ctx.str_var("mcu")?;
    let instance = ctx.str_var("peripheral")?.to_string();
    let base = ctx.u64_var("base_address")?;
    let clock_hz = ctx.u64_var("peripheral_clock_hz")?;
    let p = ctx.peripheral()?;
    let pins = ctx.pins()?;

    // Resolve every declared signal against the pin table generated by the
    // pin stage; a gap here means that stage did not run (or the metadata
    // slipped past validation) and is a hard error either way.
    let mut signal_rows = Vec::with_capacity(p.signals.len());
    for signal in &p.signals {
        let f = pins
            .lookup(signal)
            .ok_or_else(|| RenderError::MissingPinFunction {
                signal: signal.clone(),
            })?;
        let pin = &f.pin;
        let alternate = unsuffixed(u64::from(f.alternate));
        signal_rows.push(quote! {
            (#signal, #pin, #alternate)
        });
    }
    let n_signals = unsuffixed(signal_rows.len() as u64);

    let policy_name = ident(&format!(
        "{}Policy",
        instance.to_sanitized_pascal_case()
    ));
    let instance_ty = ident(&instance.to_sanitized_pascal_case());
    let base_lit = LitInt::new(&format!("0x{base:08x}"), Span::call_site());
    let clock_lit = unsuffixed(clock_hz);

    let methods: Vec<TokenStream> = p.operations.iter().map(method).collect();

    let policy_doc = format!(
        "Register-manipulation policy for {} on the {}. `BASE` and `CLOCK_HZ` are \
         compile-time parameters; every method is a plain volatile access after inlining.",
        instance, mcu
    );
    let alias_doc = format!(
        "{} at its {} base address, clocked from `{}`.",
        instance, mcu, p.clock_domain
    );
    let table_doc = format!("Signal-to-pin routing used by {instance}.");
    let instance_upper = instance.to_sanitized_upper_case().into_owned();

    let tokens = quote! {
        #[cfg(not(reg_access_hook))]
        macro_rules! reg_access_hook {
            ($($t:tt)*) => {};
        }

        #[doc = #table_doc]
        pub static SIGNAL_PINS: [(&str, &str, u8); #n_signals] = [
            #(#signal_rows),*
        ];

        #[doc = #policy_doc]
        pub struct #policy_name<const BASE: usize, const CLOCK_HZ: u32>;

        impl<const BASE: usize, const CLOCK_HZ: u32> #policy_name<BASE, CLOCK_HZ> {
            const fn reg(offset: usize) -> *mut u32 {
                (BASE + offset) as *mut u32
            }

            #(#methods)*
        }

        #[doc = #alias_doc]
        pub type #instance_ty = #policy_name<#base_lit, #clock_lit>;
    };

    let what = format!("Hardware policy for {instance_upper}");
    Ok(format!(
        "{}{}",
        banner(&what, mcu),
        pretty("hardware-policy", tokens)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{PinArtifacts, TemplateContext};
    use crate::resolve::testutil::config;

    #[test]
    fn policy_bakes_in_base_and_clock() {
        let cfg = config();
        let pins = PinArtifacts::from_config(&cfg);
        let ctx = TemplateContext::for_peripheral(&cfg, &cfg.peripherals[0], &pins);
        let out = render(&ctx).unwrap();

        assert!(out.contains("pub struct Usart1Policy<const BASE: usize, const CLOCK_HZ: u32>"));
        assert!(out.contains("pub type Usart1 = Usart1Policy<0x40013800, 8000000>;"));
        assert!(out.contains("#[inline(always)]"));
        assert!(out.contains("reg_access_hook!"));
        // The baud formula is lowered metadata, not template logic.
        assert!(out.contains("CLOCK_HZ / (16 * rate)"));
    }

    #[test]
    fn signals_resolve_against_the_pin_table() {
        let cfg = config();
        let pins = PinArtifacts::from_config(&cfg);
        let ctx = TemplateContext::for_peripheral(&cfg, &cfg.peripherals[0], &pins);
        let out = render(&ctx).unwrap();
        assert!(out.contains(r#"("USART1_TX", "PA9", 7)"#));
    }

    #[test]
    fn missing_pin_entry_fails_the_render() {
        let cfg = config();
        let pins = PinArtifacts { functions: vec![] };
        let ctx = TemplateContext::for_peripheral(&cfg, &cfg.peripherals[0], &pins);
        let err = render(&ctx).unwrap_err();
        assert!(matches!(err, RenderError::MissingPinFunction { signal }
            if signal == "USART1_TX"));
    }

    #[test]
    fn missing_clock_variable_names_the_field() {
        let mut cfg = config();
        cfg.peripherals[0].clock_hz = None;
        let pins = PinArtifacts::from_config(&cfg);
        let ctx = TemplateContext::for_peripheral(&cfg, &cfg.peripherals[0], &pins);
        let err = render(&ctx).unwrap_err();
        assert!(matches!(err, RenderError::UnknownVariable { name }
            if name == "peripheral_clock_hz"));
    }
}
