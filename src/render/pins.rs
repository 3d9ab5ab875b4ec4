//! Pin / alternate-function table template. This stage runs first: every
//! later per-peripheral template resolves its signals against this table.

use proc_macro2::Literal;
use quote::quote;

use super::{banner, pretty, RenderError, TemplateContext};
use crate::util::unsuffixed;

pub fn render(ctx: &TemplateContext) -> Result<String, RenderError> {
    let mcu = ctx.str_var("mcu")?;
    let family = ctx.str_var("family")?;

    let entries = ctx.cfg.pins.iter().map(|p| {
        let pin = &p.pin;
        let port = Literal::character(p.port);
        let index = unsuffixed(u64::from(p.index));
        let signal = &p.signal;
        let alternate = unsuffixed(u64::from(p.alternate));
        quote! {
            PinFunction {
                pin: #pin,
                port: #port,
                index: #index,
                signal: #signal,
                alternate: #alternate,
            }
        }
    });
    let n = unsuffixed(ctx.cfg.pins.len() as u64);

    let table_doc = format!("Every routable peripheral signal of the {mcu}, one entry per signal.");
    let tokens = quote! {
        /// Routing of one peripheral signal to a physical pin.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct PinFunction {
            pub pin: &'static str,
            pub port: char,
            pub index: u8,
            pub signal: &'static str,
            pub alternate: u8,
        }

        #[doc = #table_doc]
        pub static PIN_FUNCTIONS: [PinFunction; #n] = [
            #(#entries),*
        ];

        /// Look up the pin routing a signal.
        pub fn lookup(signal: &str) -> Option<&'static PinFunction> {
            PIN_FUNCTIONS.iter().find(|f| f.signal == signal)
        }
    };

    let what = format!("Pin and alternate-function table ({family})");
    Ok(format!("{}{}", banner(&what, mcu), pretty("pin-table", tokens)?))
}
