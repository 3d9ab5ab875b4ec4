//! Structural schema checks for each metadata tier.
//!
//! The rules are declarative path/type tables walked against the raw JSON
//! document. Only structure is checked here; cross-field constraints (clock
//! limits, pin references, name collisions) belong to the resolver, which
//! sees the merged configuration.

use std::path::Path;

use serde_json::Value;

use super::{parse_hex, SchemaError, Tier};

enum Expected {
    Object,
    Array,
    Str,
    Bool,
    UInt,
    /// Unsigned integer or `0x`-prefixed string.
    Hex,
    OneOf(&'static [&'static str]),
}

impl Expected {
    fn name(&self) -> &'static str {
        match self {
            Expected::Object => "object",
            Expected::Array => "array",
            Expected::Str => "string",
            Expected::Bool => "boolean",
            Expected::UInt => "unsigned integer",
            Expected::Hex => "unsigned integer or hex string",
            Expected::OneOf(_) => "enumerated string",
        }
    }

    fn matches(&self, v: &Value) -> bool {
        match self {
            Expected::Object => v.is_object(),
            Expected::Array => v.is_array(),
            Expected::Str => v.is_string(),
            Expected::Bool => v.is_boolean(),
            Expected::UInt => v.is_u64(),
            Expected::Hex => v.is_u64() || v.as_str().is_some_and(|s| parse_hex(s).is_some()),
            Expected::OneOf(names) => v.as_str().is_some_and(|s| names.contains(&s)),
        }
    }
}

struct Rule {
    /// Dotted path. `key[]` expands an array, `{}` expands every value of an
    /// object, `{}[]` does both.
    path: &'static str,
    expected: Expected,
    required: bool,
}

const fn req(path: &'static str, expected: Expected) -> Rule {
    Rule {
        path,
        expected,
        required: true,
    }
}

const fn opt(path: &'static str, expected: Expected) -> Rule {
    Rule {
        path,
        expected,
        required: false,
    }
}

const ENDIANNESS: &[&str] = &["little", "big"];
const REGISTER_CASES: &[&str] = &["upper", "pascal", "snake"];
const ACCESS: &[&str] = &["ro", "wo", "rw"];
const OP_KINDS: &[&str] = &[
    "set",
    "clear",
    "write_field",
    "read_field",
    "write_register",
    "baud_divisor",
];

const VENDOR_RULES: &[Rule] = &[
    req("vendor", Expected::Str),
    req("architecture", Expected::Str),
    req("endianness", Expected::OneOf(ENDIANNESS)),
    req("register_case", Expected::OneOf(REGISTER_CASES)),
    req("families", Expected::Array),
    req("families[]", Expected::Str),
];

const FAMILY_RULES: &[Rule] = &[
    req("family", Expected::Str),
    req("vendor", Expected::Str),
    req("mcus", Expected::Array),
    req("mcus[]", Expected::Str),
    req("memory", Expected::Object),
    req("memory.flash", Expected::Object),
    req("memory.flash.base", Expected::Hex),
    req("memory.flash.size", Expected::Hex),
    req("memory.sram", Expected::Object),
    req("memory.sram.base", Expected::Hex),
    req("memory.sram.size", Expected::Hex),
    req("memory.stack_size", Expected::UInt),
    opt("features", Expected::Object),
    opt("features.fpu", Expected::Bool),
    opt("features.cache", Expected::Bool),
    opt("features.mpu", Expected::Bool),
    req("clocks", Expected::Object),
    req("clocks.{}", Expected::Object),
    req("clocks.{}.frequency_hz", Expected::UInt),
    opt("clocks.{}.max_hz", Expected::UInt),
    req("peripherals", Expected::Array),
    req("peripherals[]", Expected::Object),
    req("peripherals[].name", Expected::Str),
    req("peripherals[].kind", Expected::Str),
    req("peripherals[].base_address", Expected::Hex),
    req("peripherals[].clock_domain", Expected::Str),
    opt("peripherals[].signals", Expected::Array),
    opt("peripherals[].signals[]", Expected::Str),
    req("pins", Expected::Array),
    req("pins[]", Expected::Object),
    req("pins[].pin", Expected::Str),
    req("pins[].signal", Expected::Str),
    opt("pins[].alternate", Expected::UInt),
    opt("interrupts", Expected::Array),
    req("interrupts[].name", Expected::Str),
    req("interrupts[].value", Expected::UInt),
    req("register_blocks", Expected::Object),
    req("register_blocks.{}", Expected::Object),
    req("register_blocks.{}.size", Expected::Hex),
    req("register_blocks.{}.registers", Expected::Array),
    req("register_blocks.{}.registers[]", Expected::Object),
    req("register_blocks.{}.registers[].name", Expected::Str),
    req("register_blocks.{}.registers[].offset", Expected::Hex),
    opt("register_blocks.{}.registers[].width", Expected::UInt),
    opt("register_blocks.{}.registers[].access", Expected::OneOf(ACCESS)),
    opt("register_blocks.{}.registers[].reset", Expected::Hex),
    opt("register_blocks.{}.registers[].fields", Expected::Array),
    req("register_blocks.{}.registers[].fields[].name", Expected::Str),
    req("register_blocks.{}.registers[].fields[].lsb", Expected::UInt),
    req("register_blocks.{}.registers[].fields[].msb", Expected::UInt),
    opt("operations", Expected::Object),
    opt("operations.{}", Expected::Array),
    req("operations.{}[].name", Expected::Str),
    req("operations.{}[].register", Expected::Str),
    req("operations.{}[].kind", Expected::OneOf(OP_KINDS)),
    opt("operations.{}[].field", Expected::Str),
    opt("operations.{}[].divisor", Expected::UInt),
    opt("operations.{}[].doc", Expected::Str),
];

const PERIPHERAL_RULES: &[Rule] = &[
    req("family", Expected::Str),
    req("peripheral", Expected::Str),
    opt("size", Expected::Hex),
    opt("registers", Expected::Array),
    req("registers[].name", Expected::Str),
    req("registers[].offset", Expected::Hex),
    opt("registers[].width", Expected::UInt),
    opt("registers[].access", Expected::OneOf(ACCESS)),
    opt("registers[].reset", Expected::Hex),
    opt("registers[].fields", Expected::Array),
    req("registers[].fields[].name", Expected::Str),
    req("registers[].fields[].lsb", Expected::UInt),
    req("registers[].fields[].msb", Expected::UInt),
    opt("operations", Expected::Array),
    req("operations[].name", Expected::Str),
    req("operations[].register", Expected::Str),
    req("operations[].kind", Expected::OneOf(OP_KINDS)),
    opt("operations[].field", Expected::Str),
    opt("operations[].divisor", Expected::UInt),
    opt("operations[].doc", Expected::Str),
];

/// Validate `doc` against the rules of `tier`, reporting the first violation
/// with its file and dotted field path.
pub fn check(tier: Tier, doc: &Value, file: &Path) -> Result<(), SchemaError> {
    if !doc.is_object() {
        return Err(SchemaError::Mismatch {
            file: file.to_path_buf(),
            path: "$".to_string(),
            expected: "object",
            found: type_name(doc).to_string(),
        });
    }

    let rules = match tier {
        Tier::Vendor => VENDOR_RULES,
        Tier::Family => FAMILY_RULES,
        Tier::Peripheral => PERIPHERAL_RULES,
    };

    for rule in rules {
        check_rule(doc, rule, file)?;
    }
    Ok(())
}

fn check_rule(doc: &Value, rule: &Rule, file: &Path) -> Result<(), SchemaError> {
    let segments: Vec<&str> = rule.path.split('.').collect();
    let mut frontier: Vec<(String, &Value)> = vec![(String::new(), doc)];

    for (i, seg) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let mut next: Vec<(String, &Value)> = Vec::new();

        for (prefix, value) in &frontier {
            if let Some(rest) = seg.strip_prefix("{}") {
                let expand_arrays = rest == "[]";
                let Some(map) = value.as_object() else {
                    // The rule for the parent key reports the type mismatch.
                    continue;
                };
                for (key, child) in map {
                    let path = join(prefix, key);
                    if expand_arrays {
                        expand_array(child, &path, &mut next, file)?;
                    } else {
                        next.push((path, child));
                    }
                }
                continue;
            }

            let (key, wild) = match seg.strip_suffix("[]") {
                Some(k) => (k, true),
                None => (*seg, false),
            };

            let Some(map) = value.as_object() else {
                return Err(SchemaError::Mismatch {
                    file: file.to_path_buf(),
                    path: prefix.clone(),
                    expected: "object",
                    found: type_name(value).to_string(),
                });
            };

            match map.get(key) {
                Some(child) if wild => expand_array(child, &join(prefix, key), &mut next, file)?,
                Some(child) => next.push((join(prefix, key), child)),
                None if rule.required && last => {
                    return Err(SchemaError::Missing {
                        file: file.to_path_buf(),
                        path: join(prefix, key),
                        expected: rule.expected.name(),
                    });
                }
                // Missing ancestors are governed by their own rules.
                None => {}
            }
        }

        frontier = next;
    }

    for (path, value) in frontier {
        if !rule.expected.matches(value) {
            return Err(SchemaError::Mismatch {
                file: file.to_path_buf(),
                path,
                expected: rule.expected.name(),
                found: type_name(value).to_string(),
            });
        }
    }
    Ok(())
}

fn expand_array<'v>(
    value: &'v Value,
    path: &str,
    out: &mut Vec<(String, &'v Value)>,
    file: &Path,
) -> Result<(), SchemaError> {
    let Some(items) = value.as_array() else {
        return Err(SchemaError::Mismatch {
            file: file.to_path_buf(),
            path: path.to_string(),
            expected: "array",
            found: type_name(value).to_string(),
        });
    };
    for (idx, item) in items.iter().enumerate() {
        out.push((format!("{path}[{idx}]"), item));
    }
    Ok(())
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
