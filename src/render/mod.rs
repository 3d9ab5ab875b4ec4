//! Deterministic text generation from a resolved configuration.
//!
//! Each artifact kind has a named template. Rust artifacts are assembled as
//! token streams and formatted with `prettyplease`; linker-facing artifacts
//! (`device.x`, `memory.x`) are plain text. Templates are substitution only:
//! every mask, offset, padding span and vector slot arrives precomputed in
//! the [`ResolvedConfig`]. A template that asks the context for a variable
//! it does not have fails loudly: generated-code correctness depends on
//! catching missing fields at generation time, not downstream at firmware
//! compile time.

use std::collections::BTreeMap;

use proc_macro2::{Ident, TokenStream};
use serde_json::Value;
use thiserror::Error;

use crate::resolve::{PinFunction, ResolvedConfig, ResolvedPeripheral};
use crate::util::ident;

pub mod linker;
pub mod pins;
pub mod policy;
pub mod registers;
pub mod startup;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown template `{name}`")]
    UnknownTemplate { name: String },
    #[error("template references `{name}`, which is absent from the render context")]
    UnknownVariable { name: String },
    #[error("context variable `{name}` is not {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
    #[error("{value:#x} does not fit in {width} hex digits")]
    HexWidth { value: u64, width: usize },
    #[error("no fixed-width integer type for a {bits}-bit register")]
    UnrepresentableWidth { bits: u32 },
    #[error("pin-function table not present in the render context; the pin stage must run first")]
    MissingPinTable,
    #[error("signal `{signal}` has no entry in the generated pin-function table")]
    MissingPinFunction { signal: String },
    #[error("template `{template}` produced unparseable Rust: {detail}")]
    Syntax {
        template: &'static str,
        detail: String,
    },
}

/// The closed template registry, in the order the orchestrator's stages use
/// them.
pub const TEMPLATES: &[&str] = &[
    "pin-table",
    "register-block",
    "hardware-policy",
    "startup",
    "device-x",
    "linker-script",
];

/// Render the named template against `ctx`.
pub fn render(name: &str, ctx: &TemplateContext) -> Result<String, RenderError> {
    match name {
        "pin-table" => pins::render(ctx),
        "register-block" => registers::render(ctx),
        "hardware-policy" => policy::render(ctx),
        "startup" => startup::render(ctx),
        "device-x" => startup::render_device_x(ctx),
        "linker-script" => linker::render(ctx),
        _ => Err(RenderError::UnknownTemplate {
            name: name.to_string(),
        }),
    }
}

/// The pin stage's product. Later stages cannot build a peripheral context
/// without one, which is what makes pins-first an invariant rather than a
/// calling convention.
#[derive(Clone, Debug)]
pub struct PinArtifacts {
    pub functions: Vec<PinFunction>,
}

impl PinArtifacts {
    pub fn from_config(cfg: &ResolvedConfig) -> Self {
        Self {
            functions: cfg.pins.clone(),
        }
    }

    pub fn lookup(&self, signal: &str) -> Option<&PinFunction> {
        self.functions.iter().find(|f| f.signal == signal)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Variables and structured data exposed to one template invocation.
/// Created immediately before a render call; it does not outlive it.
pub struct TemplateContext<'a> {
    pub cfg: &'a ResolvedConfig,
    peripheral: Option<&'a ResolvedPeripheral>,
    pins: Option<&'a PinArtifacts>,
    vars: BTreeMap<String, Value>,
}

impl<'a> TemplateContext<'a> {
    /// Context for device-level templates (pins, startup, linker).
    pub fn device(cfg: &'a ResolvedConfig) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("vendor".to_string(), Value::from(cfg.vendor.clone()));
        vars.insert("family".to_string(), Value::from(cfg.family.clone()));
        vars.insert("mcu".to_string(), Value::from(cfg.mcu.clone()));
        vars.insert(
            "architecture".to_string(),
            Value::from(cfg.architecture.clone()),
        );
        vars.insert("flash_base".to_string(), Value::from(cfg.memory.flash.base));
        vars.insert("flash_size".to_string(), Value::from(cfg.memory.flash.size));
        vars.insert("sram_base".to_string(), Value::from(cfg.memory.sram.base));
        vars.insert("sram_size".to_string(), Value::from(cfg.memory.sram.size));
        vars.insert("stack_size".to_string(), Value::from(cfg.memory.stack_size));
        Self {
            cfg,
            peripheral: None,
            pins: None,
            vars,
        }
    }

    pub fn with_pins(mut self, pins: &'a PinArtifacts) -> Self {
        self.pins = Some(pins);
        self
    }

    /// Context for the register-block template, which describes a
    /// peripheral kind's layout and never references pin routing.
    pub fn for_block(cfg: &'a ResolvedConfig, peripheral: &'a ResolvedPeripheral) -> Self {
        let mut ctx = Self::device(cfg);
        ctx.peripheral = Some(peripheral);
        ctx.vars.insert(
            "peripheral_kind".to_string(),
            Value::from(peripheral.kind.clone()),
        );
        ctx
    }

    /// Context for per-peripheral templates. Requires the pin artifacts;
    /// peripheral templates may reference pin routing.
    pub fn for_peripheral(
        cfg: &'a ResolvedConfig,
        peripheral: &'a ResolvedPeripheral,
        pins: &'a PinArtifacts,
    ) -> Self {
        let mut ctx = Self::device(cfg).with_pins(pins);
        ctx.peripheral = Some(peripheral);
        ctx.vars.insert(
            "peripheral".to_string(),
            Value::from(peripheral.name.clone()),
        );
        ctx.vars.insert(
            "peripheral_kind".to_string(),
            Value::from(peripheral.kind.clone()),
        );
        ctx.vars.insert(
            "base_address".to_string(),
            Value::from(peripheral.base_address),
        );
        // Deliberately absent when the clock domain did not resolve; the
        // template fails with UnknownVariable instead of baking in garbage.
        if let Some(hz) = peripheral.clock_hz {
            ctx.vars
                .insert("peripheral_clock_hz".to_string(), Value::from(hz));
        }
        ctx
    }

    pub fn var(&self, name: &str) -> Result<&Value, RenderError> {
        self.vars.get(name).ok_or_else(|| RenderError::UnknownVariable {
            name: name.to_string(),
        })
    }

    pub fn str_var(&self, name: &str) -> Result<&str, RenderError> {
        self.var(name)?
            .as_str()
            .ok_or_else(|| RenderError::TypeMismatch {
                name: name.to_string(),
                expected: "a string",
            })
    }

    pub fn u64_var(&self, name: &str) -> Result<u64, RenderError> {
        self.var(name)?
            .as_u64()
            .ok_or_else(|| RenderError::TypeMismatch {
                name: name.to_string(),
                expected: "an unsigned integer",
            })
    }

    pub fn peripheral(&self) -> Result<&ResolvedPeripheral, RenderError> {
        self.peripheral
            .ok_or_else(|| RenderError::UnknownVariable {
                name: "peripheral".to_string(),
            })
    }

    pub fn pins(&self) -> Result<&PinArtifacts, RenderError> {
        self.pins.ok_or(RenderError::MissingPinTable)
    }
}

/// Zero-padded `0x`-prefixed hex. Values are unsigned at the type level;
/// a value needing more digits than `width` is rejected rather than
/// truncated.
pub fn format_hex(value: u64, width: usize) -> Result<String, RenderError> {
    let digits = (64 - value.leading_zeros() as usize + 3) / 4;
    if digits.max(1) > width {
        return Err(RenderError::HexWidth { value, width });
    }
    Ok(format!("0x{value:0width$x}"))
}

/// Map a register bit width onto its fixed-width integer type. The
/// vocabulary is closed; anything else is a metadata error surfaced here.
pub fn register_type(bits: u32) -> Result<Ident, RenderError> {
    match bits {
        8 => Ok(ident("u8")),
        16 => Ok(ident("u16")),
        32 => Ok(ident("u32")),
        _ => Err(RenderError::UnrepresentableWidth { bits }),
    }
}

/// Parse-check and pretty-print a generated token stream.
pub(crate) fn pretty(template: &'static str, tokens: TokenStream) -> Result<String, RenderError> {
    let file = syn::parse2(tokens).map_err(|e| RenderError::Syntax {
        template,
        detail: e.to_string(),
    })?;
    Ok(prettyplease::unparse(&file))
}

pub(crate) fn banner(what: &str, mcu: &str) -> String {
    format!(
        "// {what} for {mcu}.\n// Generated by halgen {}. Do not edit; regeneration overwrites this file.\n\n",
        env!("CARGO_PKG_VERSION")
    )
}

pub(crate) fn text_banner(what: &str, mcu: &str) -> String {
    format!(
        "/* {what} for {mcu}.\n   Generated by halgen {}. Do not edit; regeneration overwrites this file. */\n\n",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_template_is_rejected() {
        let cfg = crate::resolve::testutil::config();
        let ctx = TemplateContext::device(&cfg);
        let err = render("no-such-template", &ctx).unwrap_err();
        assert!(matches!(err, RenderError::UnknownTemplate { name }
            if name == "no-such-template"));
    }

    #[test]
    fn device_context_exposes_memory_variables() {
        let cfg = crate::resolve::testutil::config();
        let ctx = TemplateContext::device(&cfg);
        assert_eq!(ctx.u64_var("flash_base").unwrap(), 0x0800_0000);
        assert!(matches!(
            ctx.u64_var("peripheral_clock_hz").unwrap_err(),
            RenderError::UnknownVariable { .. }
        ));
        assert!(matches!(ctx.pins().unwrap_err(), RenderError::MissingPinTable));
    }

    #[test]
    fn format_hex_pads_and_rejects() {
        assert_eq!(format_hex(0x1c, 4).unwrap(), "0x001c");
        assert_eq!(format_hex(0, 2).unwrap(), "0x00");
        assert!(matches!(
            format_hex(0x1_0000, 4).unwrap_err(),
            RenderError::HexWidth { .. }
        ));
    }

    #[test]
    fn register_type_is_a_closed_vocabulary() {
        assert_eq!(register_type(32).unwrap().to_string(), "u32");
        assert_eq!(register_type(8).unwrap().to_string(), "u8");
        assert!(matches!(
            register_type(24).unwrap_err(),
            RenderError::UnrepresentableWidth { bits: 24 }
        ));
    }
}
