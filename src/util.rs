use std::borrow::Cow;
use std::io::{self, Write};
use std::path::Path;

use inflections::Inflect;
use proc_macro2::{Ident, Literal, Span};

pub const BITS_PER_BYTE: u32 = 8;

/// Replace every character that is not valid in an identifier with `_`.
/// Vendor metadata is allowed to carry hyphens, spaces and brackets in
/// register and signal names.
fn scrub(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub trait ToSanitizedPascalCase {
    fn to_sanitized_pascal_case(&self) -> Cow<str>;
}

pub trait ToSanitizedUpperCase {
    fn to_sanitized_upper_case(&self) -> Cow<str>;
}

pub trait ToSanitizedSnakeCase {
    fn to_sanitized_snake_case(&self) -> Cow<str>;
}

impl ToSanitizedSnakeCase for str {
    fn to_sanitized_snake_case(&self) -> Cow<str> {
        macro_rules! keywords {
            ($s:expr, $($kw:ident),+,) => {
                Cow::from(match &$s.to_lowercase()[..] {
                    $(stringify!($kw) => concat!(stringify!($kw), "_")),+,
                    _ => return Cow::from($s.to_snake_case())
                })
            }
        }

        let s = scrub(self);

        match s.chars().next().unwrap_or('\0') {
            '0'..='9' => Cow::from(format!("_{}", s.to_snake_case())),
            _ => {
                keywords! {
                    s,
                    abstract,
                    as,
                    become,
                    box,
                    break,
                    const,
                    continue,
                    crate,
                    do,
                    dyn,
                    else,
                    enum,
                    extern,
                    false,
                    final,
                    fn,
                    for,
                    if,
                    impl,
                    in,
                    let,
                    loop,
                    macro,
                    match,
                    mod,
                    move,
                    mut,
                    override,
                    priv,
                    pub,
                    ref,
                    return,
                    self,
                    static,
                    struct,
                    super,
                    trait,
                    true,
                    try,
                    type,
                    typeof,
                    unsafe,
                    unsized,
                    use,
                    virtual,
                    where,
                    while,
                    yield,
                }
            }
        }
    }
}

impl ToSanitizedUpperCase for str {
    fn to_sanitized_upper_case(&self) -> Cow<str> {
        let s = scrub(self);

        match s.chars().next().unwrap_or('\0') {
            '0'..='9' => Cow::from(format!("_{}", s.to_upper_case())),
            _ => Cow::from(s.to_upper_case()),
        }
    }
}

impl ToSanitizedPascalCase for str {
    fn to_sanitized_pascal_case(&self) -> Cow<str> {
        let s = scrub(self);

        match s.chars().next().unwrap_or('\0') {
            '0'..='9' => Cow::from(format!("_{}", s.to_pascal_case())),
            _ => Cow::from(s.to_pascal_case()),
        }
    }
}

pub fn respace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `0x`-prefixed hex with `_` separators every four digits, the way addresses
/// read in a reference manual.
pub fn hex(n: u64) -> String {
    let (h4, h3, h2, h1) = (
        (n >> 48) & 0xffff,
        (n >> 32) & 0xffff,
        (n >> 16) & 0xffff,
        n & 0xffff,
    );
    if h4 != 0 {
        format!("0x{h4:04x}_{h3:04x}_{h2:04x}_{h1:04x}")
    } else if h3 != 0 {
        format!("0x{h3:04x}_{h2:04x}_{h1:04x}")
    } else if h2 != 0 {
        format!("0x{h2:04x}_{h1:04x}")
    } else {
        format!("0x{h1:04x}")
    }
}

/// Turns `n` into an unsuffixed literal.
pub fn unsuffixed(n: u64) -> Literal {
    Literal::u64_unsuffixed(n)
}

pub fn ident(s: &str) -> Ident {
    Ident::new(s, Span::call_site())
}

/// Write `contents` to `path` through a temporary file in the destination
/// directory followed by an atomic rename. A crash at any point leaves either
/// the previous file or the new one at `path`, never a truncated mix.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
