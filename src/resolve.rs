//! Layered metadata resolution.
//!
//! Tiers merge with most-specific-wins precedence (peripheral > family >
//! vendor). The merge is field-by-field at the top level of each document: a
//! field present in a more specific tier replaces the whole value, arrays and
//! objects included, so override semantics never depend on deep-merge rules.
//!
//! Everything a template would otherwise have to decide is computed here:
//! register sort order, reserved padding, union grouping for overlapping
//! registers, bitfield masks and shifts, lowered operation descriptors and
//! vector-table slots. Templates substitute this model; they do not reason
//! about it.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::config::RegisterCase;
use crate::metadata::{
    ClockDecl, Endianness, FamilyView, FeaturesDecl, InterruptDecl, MemoryDecl, MetadataSet,
    OperationDecl, PeripheralView, RegisterBlockDecl, RegisterDecl,
};
use crate::util::{
    ToSanitizedPascalCase, ToSanitizedSnakeCase, ToSanitizedUpperCase, BITS_PER_BYTE,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown family `{family}`")]
    UnknownFamily { family: String },
    #[error("unknown vendor `{vendor}` (referenced by family `{family}`)")]
    UnknownVendor { vendor: String, family: String },
    #[error("family `{family}` is not listed in vendor `{vendor}`'s family catalog")]
    NotInVendorCatalog { vendor: String, family: String },
    #[error("unknown MCU `{mcu}` in family `{family}`")]
    UnknownMcu { family: String, mcu: String },
    #[error("`{field}` is required but missing after merging all metadata tiers")]
    MissingRequiredField { field: String },
    #[error("merged metadata does not deserialize: {detail}")]
    Malformed { detail: String },
    #[error("`memory.stack_size` must be greater than zero, found {found}")]
    InvalidStackSize { found: u64 },
    #[error("peripheral `{peripheral}` references unknown clock domain `{domain}`")]
    UnknownClockDomain { peripheral: String, domain: String },
    #[error("clock `{domain}` runs at {frequency_hz} Hz, above its documented limit of {max_hz} Hz")]
    ClockOutOfRange {
        domain: String,
        frequency_hz: u64,
        max_hz: u64,
    },
    #[error("peripheral `{peripheral}` declares signal `{signal}` which has no entry in the family pin table")]
    PinFunctionNotFound { peripheral: String, signal: String },
    #[error("pin name `{pin}` is not of the form P<port><index>")]
    MalformedPinName { pin: String },
    #[error("no register block named `{kind}` in `register_blocks` (required by peripheral `{peripheral}`)")]
    UnknownRegisterBlock { peripheral: String, kind: String },
    #[error("registers `{a}` and `{b}` in block `{kind}` both sanitize to `{sanitized}`")]
    SanitizedNameCollision {
        kind: String,
        a: String,
        b: String,
        sanitized: String,
    },
    #[error("registers `{a}` and `{b}` in block `{kind}` overlap without sharing an offset and width")]
    RegisterOverlap { kind: String, a: String, b: String },
    #[error("field `{field}` of register `{register}` spans bits {lsb}..={msb}, outside the register's {width}-bit width")]
    FieldOutOfRange {
        register: String,
        field: String,
        lsb: u32,
        msb: u32,
        width: u32,
    },
    #[error("block `{kind}` declares size {declared:#x} but its registers need {required:#x} bytes")]
    BlockSizeTooSmall {
        kind: String,
        declared: u64,
        required: u64,
    },
    #[error("operation `{op}` on peripheral kind `{kind}`: {detail}")]
    InvalidOperation {
        kind: String,
        op: String,
        detail: String,
    },
    #[error("interrupts `{a}` and `{b}` both claim vector position {value}")]
    DuplicateInterrupt { a: String, b: String, value: u32 },
}

/// The merged, precomputed configuration for one MCU variant. Immutable;
/// consumed read-only by the renderer and discarded after the variant's
/// targets are generated.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub vendor: String,
    pub family: String,
    pub mcu: String,
    pub architecture: String,
    pub endianness: Endianness,
    pub register_case: RegisterCase,
    pub memory: MemoryDecl,
    pub features: FeaturesDecl,
    pub clocks: BTreeMap<String, ClockDecl>,
    pub pins: Vec<PinFunction>,
    pub vector_table: Vec<VectorSlot>,
    pub peripherals: Vec<ResolvedPeripheral>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinFunction {
    pub pin: String,
    pub port: char,
    pub index: u8,
    pub signal: String,
    pub alternate: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VectorSlot {
    Reserved,
    Device { name: String, value: u32 },
}

#[derive(Clone, Debug)]
pub struct ResolvedPeripheral {
    pub name: String,
    pub kind: String,
    pub base_address: u64,
    pub clock_domain: String,
    /// Frequency of the peripheral's clock domain. `None` until the domain
    /// is known; `validate` rejects configurations where it stays unknown.
    pub clock_hz: Option<u64>,
    pub signals: Vec<String>,
    pub block: RegisterBlockModel,
    pub operations: Vec<OpModel>,
}

#[derive(Clone, Debug)]
pub struct RegisterBlockModel {
    pub kind: String,
    /// Declared byte size; the generated struct asserts this at compile time.
    pub size: u64,
    /// Items in ascending offset order with reserved padding materialized.
    pub items: Vec<BlockItem>,
}

#[derive(Clone, Debug)]
pub enum BlockItem {
    Register(RegisterModel),
    /// Reserved gap between registers (or trailing, up to the declared size).
    Padding { index: usize, bytes: u64 },
    /// Registers sharing one offset and width, emitted as a union.
    Union {
        offset: u64,
        width: u32,
        registers: Vec<RegisterModel>,
    },
}

#[derive(Clone, Debug)]
pub struct RegisterModel {
    pub name: String,
    /// Name cased per the vendor's `register_case` convention, used for
    /// generated documentation labels.
    pub label: String,
    pub offset: u64,
    pub width: u32,
    pub access: Access,
    pub reset: u64,
    pub fields: Vec<FieldModel>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    fn parse(s: &str) -> Self {
        match s {
            "ro" => Access::ReadOnly,
            "wo" => Access::WriteOnly,
            _ => Access::ReadWrite,
        }
    }

    pub fn is_readable(&self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldModel {
    pub name: String,
    pub lsb: u32,
    pub msb: u32,
    pub width: u32,
    /// Mask already shifted into register position.
    pub mask: u64,
}

#[derive(Clone, Debug)]
pub struct OpModel {
    pub method: String,
    pub doc: String,
    pub register: String,
    pub lowered: OpLowered,
}

/// Operation descriptors lowered to single register accesses. The policy
/// template emits these mechanically; no formula lives in the template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpLowered {
    /// Read-modify-write setting every bit of the field.
    Set { offset: u64, mask: u64 },
    /// Read-modify-write clearing every bit of the field.
    Clear { offset: u64, mask: u64 },
    /// Read-modify-write replacing the field with a caller-supplied value.
    WriteField { offset: u64, mask: u64, shift: u32 },
    /// Volatile read returning the field value.
    ReadField { offset: u64, mask: u64, shift: u32 },
    /// Whole-register volatile write of a caller-supplied value.
    WriteRegister { offset: u64 },
    /// Write `CLOCK_HZ / (scale * rate)` into the field.
    BaudDivisor {
        offset: u64,
        mask: u64,
        shift: u32,
        scale: u64,
    },
}

/// Fields that must be present after the full tier merge, whichever tier
/// supplied them.
const REQUIRED_MERGED: &[&str] = &[
    "architecture",
    "endianness",
    "register_case",
    "mcus",
    "memory",
    "clocks",
    "peripherals",
    "pins",
    "register_blocks",
];

/// Fold tier documents in precedence order, least specific first. Top-level
/// fields replace wholesale.
fn merge_docs(layers: &[&Value]) -> Value {
    let mut merged = serde_json::Map::new();
    for layer in layers {
        if let Some(obj) = layer.as_object() {
            for (k, v) in obj {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(merged)
}

fn check_required(merged: &Value) -> Result<(), ResolveError> {
    for field in REQUIRED_MERGED {
        if merged.get(field).is_none() {
            return Err(ResolveError::MissingRequiredField {
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

/// Merge the vendor and family tiers for `family`, apply any peripheral-tier
/// overrides, and precompute the render model for `mcu`.
pub fn resolve(set: &MetadataSet, family: &str, mcu: &str) -> Result<ResolvedConfig, ResolveError> {
    let family_raw = set.family(family).ok_or_else(|| ResolveError::UnknownFamily {
        family: family.to_string(),
    })?;
    let vendor_name = family_raw.document["vendor"].as_str().unwrap_or_default();
    let vendor_raw = set
        .vendor(vendor_name)
        .ok_or_else(|| ResolveError::UnknownVendor {
            vendor: vendor_name.to_string(),
            family: family.to_string(),
        })?;

    let merged = merge_docs(&[&vendor_raw.document, &family_raw.document]);
    check_required(&merged)?;
    let view: FamilyView =
        serde_json::from_value(merged).map_err(|e| ResolveError::Malformed {
            detail: e.to_string(),
        })?;

    if !view.families.iter().any(|f| f == family) {
        return Err(ResolveError::NotInVendorCatalog {
            vendor: view.vendor.clone(),
            family: family.to_string(),
        });
    }
    if !view.mcus.iter().any(|m| m == mcu) {
        return Err(ResolveError::UnknownMcu {
            family: family.to_string(),
            mcu: mcu.to_string(),
        });
    }

    let pins = view
        .pins
        .iter()
        .map(|p| {
            let (port, index) = parse_pin_name(&p.pin)?;
            Ok(PinFunction {
                pin: p.pin.clone(),
                port,
                index,
                signal: p.signal.clone(),
                alternate: p.alternate,
            })
        })
        .collect::<Result<Vec<_>, ResolveError>>()?;

    let vector_table = build_vector_table(&view.interrupts)?;

    let mut peripherals = Vec::with_capacity(view.peripherals.len());
    for p in &view.peripherals {
        let block_decl = view
            .register_blocks
            .get(&p.kind)
            .ok_or_else(|| ResolveError::UnknownRegisterBlock {
                peripheral: p.name.clone(),
                kind: p.kind.clone(),
            })?;
        let op_decls = view.operations.get(&p.kind).map(|v| v.as_slice());

        // Peripheral-tier override: registers/size/operations replace the
        // family's declarations wholesale, for this kind only.
        let (block_decl, op_decls) = apply_override(set, family, &p.kind, block_decl, op_decls)?;

        let block = layout_block(&p.kind, view.register_case, &block_decl)?;
        let operations = op_decls
            .iter()
            .map(|op| lower_op(&p.kind, op, &block))
            .collect::<Result<Vec<_>, _>>()?;

        peripherals.push(ResolvedPeripheral {
            name: p.name.clone(),
            kind: p.kind.clone(),
            base_address: p.base_address,
            clock_domain: p.clock_domain.clone(),
            clock_hz: view.clocks.get(&p.clock_domain).map(|c| c.frequency_hz),
            signals: p.signals.clone(),
            block,
            operations,
        });
    }

    Ok(ResolvedConfig {
        vendor: view.vendor,
        family: view.family,
        mcu: mcu.to_string(),
        architecture: view.architecture,
        endianness: view.endianness,
        register_case: view.register_case,
        memory: view.memory,
        features: view.features,
        clocks: view.clocks,
        pins,
        vector_table,
        peripherals,
    })
}

fn apply_override(
    set: &MetadataSet,
    family: &str,
    kind: &str,
    block: &RegisterBlockDecl,
    ops: Option<&[OperationDecl]>,
) -> Result<(RegisterBlockDecl, Vec<OperationDecl>), ResolveError> {
    let mut block = block.clone();
    let mut ops: Vec<OperationDecl> = ops.unwrap_or_default().to_vec();

    if let Some(raw) = set.peripheral_override(family, kind) {
        let over: PeripheralView =
            serde_json::from_value(raw.document.clone()).map_err(|e| ResolveError::Malformed {
                detail: e.to_string(),
            })?;
        if let Some(size) = over.size {
            block.size = size;
        }
        if let Some(registers) = over.registers {
            block.registers = registers;
        }
        if let Some(operations) = over.operations {
            ops = operations;
        }
    }

    Ok((block, ops))
}

fn parse_pin_name(pin: &str) -> Result<(char, u8), ResolveError> {
    let malformed = || ResolveError::MalformedPinName {
        pin: pin.to_string(),
    };
    let rest = pin.strip_prefix('P').ok_or_else(malformed)?;
    let mut chars = rest.chars();
    let port = chars.next().ok_or_else(malformed)?;
    if !port.is_ascii_uppercase() {
        return Err(malformed());
    }
    let index = chars.as_str().parse::<u8>().map_err(|_| malformed())?;
    Ok((port, index))
}

fn build_vector_table(interrupts: &[InterruptDecl]) -> Result<Vec<VectorSlot>, ResolveError> {
    let mut sorted: Vec<&InterruptDecl> = interrupts.iter().collect();
    sorted.sort_by_key(|i| i.value);
    for pair in sorted.windows(2) {
        if pair[0].value == pair[1].value {
            return Err(ResolveError::DuplicateInterrupt {
                a: pair[0].name.clone(),
                b: pair[1].name.clone(),
                value: pair[0].value,
            });
        }
    }

    let mut slots = Vec::new();
    for irq in sorted {
        while slots.len() < irq.value as usize {
            slots.push(VectorSlot::Reserved);
        }
        slots.push(VectorSlot::Device {
            name: irq.name.clone(),
            value: irq.value,
        });
    }
    Ok(slots)
}

fn apply_case(case: RegisterCase, name: &str) -> String {
    match case {
        RegisterCase::Upper => name.to_sanitized_upper_case().into_owned(),
        RegisterCase::Pascal => name.to_sanitized_pascal_case().into_owned(),
        RegisterCase::Snake => name.to_sanitized_snake_case().into_owned(),
    }
}

fn lower_register(
    kind: &str,
    case: RegisterCase,
    decl: &RegisterDecl,
) -> Result<RegisterModel, ResolveError> {
    let mut fields = Vec::with_capacity(decl.fields.len());
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for f in &decl.fields {
        if f.lsb > f.msb || f.msb >= decl.width {
            return Err(ResolveError::FieldOutOfRange {
                register: decl.name.clone(),
                field: f.name.clone(),
                lsb: f.lsb,
                msb: f.msb,
                width: decl.width,
            });
        }
        let sanitized = f.name.to_sanitized_upper_case().into_owned();
        if let Some(prev) = seen.insert(sanitized.clone(), f.name.clone()) {
            return Err(ResolveError::SanitizedNameCollision {
                kind: kind.to_string(),
                a: prev,
                b: f.name.clone(),
                sanitized,
            });
        }
        let width = f.msb - f.lsb + 1;
        let mask = (((1u128 << width) - 1) as u64) << f.lsb;
        fields.push(FieldModel {
            name: f.name.clone(),
            lsb: f.lsb,
            msb: f.msb,
            width,
            mask,
        });
    }

    Ok(RegisterModel {
        name: decl.name.clone(),
        label: apply_case(case, &decl.name),
        offset: decl.offset,
        width: decl.width,
        access: Access::parse(&decl.access),
        reset: decl.reset,
        fields,
    })
}

/// Sort registers, group exact-overlap registers into unions, materialize
/// reserved padding for gaps and the trailing span up to the declared size.
fn layout_block(
    kind: &str,
    case: RegisterCase,
    decl: &RegisterBlockDecl,
) -> Result<RegisterBlockModel, ResolveError> {
    let mut registers = decl
        .registers
        .iter()
        .map(|r| lower_register(kind, case, r))
        .collect::<Result<Vec<_>, _>>()?;
    registers.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.name.cmp(&b.name)));

    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for r in &registers {
        let sanitized = r.name.to_sanitized_snake_case().into_owned();
        if let Some(prev) = seen.insert(sanitized.clone(), r.name.clone()) {
            return Err(ResolveError::SanitizedNameCollision {
                kind: kind.to_string(),
                a: prev,
                b: r.name.clone(),
                sanitized,
            });
        }
    }

    let mut items = Vec::new();
    let mut cursor = 0u64;
    let mut pad_index = 0usize;
    let mut i = 0usize;
    while i < registers.len() {
        let offset = registers[i].offset;
        let mut group = vec![registers[i].clone()];
        while i + 1 < registers.len() && registers[i + 1].offset == offset {
            i += 1;
            group.push(registers[i].clone());
        }
        i += 1;

        let width = group[0].width;
        if let Some(odd) = group.iter().find(|r| r.width != width) {
            return Err(ResolveError::RegisterOverlap {
                kind: kind.to_string(),
                a: group[0].name.clone(),
                b: odd.name.clone(),
            });
        }
        if offset < cursor {
            let prev = previous_register_name(&items);
            return Err(ResolveError::RegisterOverlap {
                kind: kind.to_string(),
                a: prev,
                b: group[0].name.clone(),
            });
        }
        if offset > cursor {
            items.push(BlockItem::Padding {
                index: pad_index,
                bytes: offset - cursor,
            });
            pad_index += 1;
        }

        cursor = offset + u64::from(width / BITS_PER_BYTE);
        if group.len() == 1 {
            items.push(BlockItem::Register(group.pop().unwrap()));
        } else {
            items.push(BlockItem::Union {
                offset,
                width,
                registers: group,
            });
        }
    }

    if cursor > decl.size {
        return Err(ResolveError::BlockSizeTooSmall {
            kind: kind.to_string(),
            declared: decl.size,
            required: cursor,
        });
    }
    if cursor < decl.size {
        items.push(BlockItem::Padding {
            index: pad_index,
            bytes: decl.size - cursor,
        });
    }

    Ok(RegisterBlockModel {
        kind: kind.to_string(),
        size: decl.size,
        items,
    })
}

fn previous_register_name(items: &[BlockItem]) -> String {
    for item in items.iter().rev() {
        match item {
            BlockItem::Register(r) => return r.name.clone(),
            BlockItem::Union { registers, .. } => return registers[0].name.clone(),
            BlockItem::Padding { .. } => continue,
        }
    }
    String::new()
}

fn find_register<'a>(
    block: &'a RegisterBlockModel,
    name: &str,
) -> Option<&'a RegisterModel> {
    block.items.iter().find_map(|item| match item {
        BlockItem::Register(r) if r.name == name => Some(r),
        BlockItem::Union { registers, .. } => registers.iter().find(|r| r.name == name),
        _ => None,
    })
}

fn lower_op(
    kind: &str,
    decl: &OperationDecl,
    block: &RegisterBlockModel,
) -> Result<OpModel, ResolveError> {
    let invalid = |detail: String| ResolveError::InvalidOperation {
        kind: kind.to_string(),
        op: decl.name.clone(),
        detail,
    };

    let register = find_register(block, &decl.register)
        .ok_or_else(|| invalid(format!("unknown register `{}`", decl.register)))?;

    let field = match &decl.field {
        Some(name) => Some(
            register
                .fields
                .iter()
                .find(|f| &f.name == name)
                .ok_or_else(|| {
                    invalid(format!(
                        "unknown field `{name}` in register `{}`",
                        register.name
                    ))
                })?,
        ),
        None => None,
    };

    let need_field = || {
        field.ok_or_else(|| invalid(format!("`{}` operations require a field", decl.kind)))
    };
    let need_write = || {
        if register.access.is_writable() {
            Ok(())
        } else {
            Err(invalid(format!(
                "register `{}` is read-only",
                register.name
            )))
        }
    };
    let need_read = || {
        if register.access.is_readable() {
            Ok(())
        } else {
            Err(invalid(format!(
                "register `{}` is write-only",
                register.name
            )))
        }
    };

    let lowered = match decl.kind.as_str() {
        "set" => {
            need_write()?;
            let f = need_field()?;
            OpLowered::Set {
                offset: register.offset,
                mask: f.mask,
            }
        }
        "clear" => {
            need_write()?;
            let f = need_field()?;
            OpLowered::Clear {
                offset: register.offset,
                mask: f.mask,
            }
        }
        "write_field" => {
            need_write()?;
            let f = need_field()?;
            OpLowered::WriteField {
                offset: register.offset,
                mask: f.mask,
                shift: f.lsb,
            }
        }
        "read_field" => {
            need_read()?;
            let f = need_field()?;
            OpLowered::ReadField {
                offset: register.offset,
                mask: f.mask,
                shift: f.lsb,
            }
        }
        "write_register" => {
            need_write()?;
            OpLowered::WriteRegister {
                offset: register.offset,
            }
        }
        "baud_divisor" => {
            need_write()?;
            let f = need_field()?;
            OpLowered::BaudDivisor {
                offset: register.offset,
                mask: f.mask,
                shift: f.lsb,
                scale: decl.divisor.unwrap_or(16),
            }
        }
        other => return Err(invalid(format!("unknown operation kind `{other}`"))),
    };

    let doc = decl.doc.clone().unwrap_or_else(|| match &decl.field {
        Some(f) => format!("{} `{}.{}`", decl.kind.replace('_', " "), register.name, f),
        None => format!("{} `{}`", decl.kind.replace('_', " "), register.name),
    });

    Ok(OpModel {
        method: decl.name.to_sanitized_snake_case().into_owned(),
        doc,
        register: decl.register.clone(),
        lowered,
    })
}

/// Post-merge invariant checks that the per-tier schemas cannot express.
pub fn validate(cfg: &ResolvedConfig) -> Result<(), ResolveError> {
    if cfg.memory.stack_size == 0 {
        return Err(ResolveError::InvalidStackSize { found: 0 });
    }

    for (domain, clock) in &cfg.clocks {
        if let Some(max) = clock.max_hz {
            if clock.frequency_hz > max {
                return Err(ResolveError::ClockOutOfRange {
                    domain: domain.clone(),
                    frequency_hz: clock.frequency_hz,
                    max_hz: max,
                });
            }
        }
    }

    for p in &cfg.peripherals {
        if p.clock_hz.is_none() {
            return Err(ResolveError::UnknownClockDomain {
                peripheral: p.name.clone(),
                domain: p.clock_domain.clone(),
            });
        }
        for signal in &p.signals {
            if !cfg.pins.iter().any(|pin| &pin.signal == signal) {
                return Err(ResolveError::PinFunctionNotFound {
                    peripheral: p.name.clone(),
                    signal: signal.clone(),
                });
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testutil::write_tree;
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn load_set(dir: &Path) -> MetadataSet {
        write_tree(dir);
        MetadataSet::load(dir).unwrap()
    }

    #[test]
    fn family_overrides_vendor_scalar() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let cfg = resolve(&set, "mini", "MINI1").unwrap();
        // Vendor says upper, family says pascal; most specific wins.
        assert_eq!(cfg.register_case, crate::config::RegisterCase::Pascal);
        // Vendor-only fields survive the merge untouched.
        assert_eq!(cfg.architecture, "armv7-m");
    }

    #[test]
    fn missing_required_field_after_merge() {
        let merged = merge_docs(&[
            &json!({"architecture": "armv7-m"}),
            &json!({"family": "mini"}),
        ]);
        let err = check_required(&merged).unwrap_err();
        assert!(matches!(err, ResolveError::MissingRequiredField { field }
            if field == "endianness"));
    }

    #[test]
    fn unknown_mcu_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        assert!(matches!(
            resolve(&set, "mini", "MAXI9").unwrap_err(),
            ResolveError::UnknownMcu { .. }
        ));
    }

    #[test]
    fn layout_inserts_padding_and_trailing_reserve() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let cfg = resolve(&set, "mini", "MINI1").unwrap();
        let block = &cfg.peripherals[0].block;
        assert_eq!(block.size, 0x1c);
        // SR, DR, BRR, CR1 are contiguous (0x00..0x10); declared size 0x1c
        // leaves a trailing reserved span.
        match block.items.last().unwrap() {
            BlockItem::Padding { bytes, .. } => assert_eq!(*bytes, 0xc),
            other => panic!("expected trailing padding, got {other:?}"),
        }
    }

    #[test]
    fn field_masks_are_shifted() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let cfg = resolve(&set, "mini", "MINI1").unwrap();
        let block = &cfg.peripherals[0].block;
        let sr = match &block.items[0] {
            BlockItem::Register(r) => r,
            other => panic!("expected SR first, got {other:?}"),
        };
        assert_eq!(sr.name, "SR");
        let txe = sr.fields.iter().find(|f| f.name == "TXE").unwrap();
        assert_eq!(txe.mask, 1 << 7);
        assert_eq!(txe.width, 1);
    }

    #[test]
    fn operations_lower_to_register_accesses() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let cfg = resolve(&set, "mini", "MINI1").unwrap();
        let ops = &cfg.peripherals[0].operations;

        let enable = ops.iter().find(|o| o.method == "enable").unwrap();
        assert_eq!(
            enable.lowered,
            OpLowered::Set {
                offset: 0x0c,
                mask: 1 << 13
            }
        );

        let baud = ops.iter().find(|o| o.method == "set_baud").unwrap();
        assert_eq!(
            baud.lowered,
            OpLowered::BaudDivisor {
                offset: 0x08,
                mask: 0xffff,
                shift: 0,
                scale: 16
            }
        );
    }

    #[test]
    fn write_op_on_read_only_register_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let mut family: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("families/mini.json")).unwrap(),
        )
        .unwrap();
        family["operations"]["usart"][0] = json!({
            "name": "poke_status", "register": "SR", "field": "TXE", "kind": "set"
        });
        std::fs::write(dir.path().join("families/mini.json"), family.to_string()).unwrap();
        let set = MetadataSet::load(dir.path()).unwrap();
        assert!(matches!(
            resolve(&set, "mini", "MINI1").unwrap_err(),
            ResolveError::InvalidOperation { .. }
        ));
    }

    #[test]
    fn vector_table_expands_reserved_slots() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let cfg = resolve(&set, "mini", "MINI1").unwrap();
        assert_eq!(cfg.vector_table.len(), 38);
        assert_eq!(
            cfg.vector_table[6],
            VectorSlot::Device {
                name: "EXTI0".to_string(),
                value: 6
            }
        );
        assert_eq!(cfg.vector_table[7], VectorSlot::Reserved);
        assert_eq!(
            cfg.vector_table[37],
            VectorSlot::Device {
                name: "USART1".to_string(),
                value: 37
            }
        );
    }

    #[test]
    fn validate_rejects_zero_stack() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let mut cfg = resolve(&set, "mini", "MINI1").unwrap();
        cfg.memory.stack_size = 0;
        assert!(matches!(
            validate(&cfg).unwrap_err(),
            ResolveError::InvalidStackSize { found: 0 }
        ));
    }

    #[test]
    fn validate_cross_checks_pin_functions() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let mut cfg = resolve(&set, "mini", "MINI1").unwrap();
        cfg.peripherals[0].signals.push("USART1_CK".to_string());
        let err = validate(&cfg).unwrap_err();
        assert!(matches!(err, ResolveError::PinFunctionNotFound { signal, .. }
            if signal == "USART1_CK"));
    }

    #[test]
    fn validate_rejects_unknown_clock_domain() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_set(dir.path());
        let mut cfg = resolve(&set, "mini", "MINI1").unwrap();
        cfg.peripherals[0].clock_hz = None;
        assert!(matches!(
            validate(&cfg).unwrap_err(),
            ResolveError::UnknownClockDomain { .. }
        ));
    }

    #[test]
    fn overlapping_registers_with_same_offset_form_a_union() {
        let kind = "uart";
        let decl = RegisterBlockDecl {
            size: 0x8,
            registers: vec![
                reg("RHR", 0x0, "ro"),
                reg("THR", 0x0, "wo"),
                reg("CR", 0x4, "rw"),
            ],
        };
        let block = layout_block(kind, RegisterCase::Upper, &decl).unwrap();
        match &block.items[0] {
            BlockItem::Union { registers, .. } => {
                assert_eq!(registers.len(), 2);
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn partial_overlap_is_an_error() {
        let decl = RegisterBlockDecl {
            size: 0x8,
            registers: vec![reg("A", 0x0, "rw"), reg("B", 0x2, "rw")],
        };
        assert!(matches!(
            layout_block("uart", RegisterCase::Upper, &decl).unwrap_err(),
            ResolveError::RegisterOverlap { .. }
        ));
    }

    #[test]
    fn sanitized_collision_is_detected() {
        let decl = RegisterBlockDecl {
            size: 0x8,
            registers: vec![reg("CR-1", 0x0, "rw"), reg("CR 1", 0x4, "rw")],
        };
        assert!(matches!(
            layout_block("uart", RegisterCase::Upper, &decl).unwrap_err(),
            ResolveError::SanitizedNameCollision { .. }
        ));
    }

    #[test]
    fn block_smaller_than_registers_is_rejected() {
        let decl = RegisterBlockDecl {
            size: 0x4,
            registers: vec![reg("A", 0x0, "rw"), reg("B", 0x4, "rw")],
        };
        assert!(matches!(
            layout_block("uart", RegisterCase::Upper, &decl).unwrap_err(),
            ResolveError::BlockSizeTooSmall { .. }
        ));
    }

    fn reg(name: &str, offset: u64, access: &str) -> RegisterDecl {
        serde_json::from_value(json!({
            "name": name,
            "offset": offset,
            "access": access
        }))
        .unwrap()
    }

    #[test]
    fn peripheral_tier_overrides_family_registers() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        std::fs::create_dir_all(dir.path().join("peripherals")).unwrap();
        std::fs::write(
            dir.path().join("peripherals/mini-usart.json"),
            json!({
                "family": "mini",
                "peripheral": "usart",
                "size": "0x20",
                "registers": [
                    {"name": "CR1", "offset": "0x00", "fields": [
                        {"name": "UE", "lsb": 0, "msb": 0}
                    ]}
                ],
                "operations": [
                    {"name": "enable", "register": "CR1", "field": "UE", "kind": "set"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let set = MetadataSet::load(dir.path()).unwrap();
        let cfg = resolve(&set, "mini", "MINI1").unwrap();
        let block = &cfg.peripherals[0].block;
        // Wholesale replacement: one register plus trailing padding.
        assert_eq!(block.size, 0x20);
        let regs: Vec<_> = block
            .items
            .iter()
            .filter(|i| matches!(i, BlockItem::Register(_)))
            .collect();
        assert_eq!(regs.len(), 1);
        let enable = &cfg.peripherals[0].operations[0];
        assert_eq!(
            enable.lowered,
            OpLowered::Set {
                offset: 0x0,
                mask: 1
            }
        );
    }
}
