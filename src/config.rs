use anyhow::{bail, Result};
use std::path::PathBuf;

/// Settings for one generation run, assembled from the command line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Config {
    /// Root of the metadata tree (`vendors/`, `families/`, `peripherals/`).
    pub metadata_dir: PathBuf,
    /// Root of the generated output tree.
    pub output_dir: PathBuf,
    /// Restrict generation to one family. `None` generates every family
    /// found in the metadata tree.
    pub family: Option<String>,
    /// Restrict generation to one MCU variant within the selected family.
    pub mcu: Option<String>,
    /// Render everything, write nothing, report would-be output paths.
    pub dry_run: bool,
    /// Render and syntax-check everything, write nothing.
    pub validate_only: bool,
    /// Abort the batch at the first failing target instead of collecting
    /// failures across the whole run.
    pub fail_fast: bool,
    /// Log each stage and file as it completes.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_dir: PathBuf::from("metadata"),
            output_dir: PathBuf::from("out"),
            family: None,
            mcu: None,
            dry_run: false,
            validate_only: false,
            fail_fast: false,
            verbose: false,
        }
    }
}

/// Naming convention for generated register identifiers, declared by the
/// vendor tier and overridable per family.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, serde::Deserialize)]
pub enum RegisterCase {
    #[default]
    #[serde(rename = "upper")]
    Upper,
    #[serde(rename = "pascal")]
    Pascal,
    #[serde(rename = "snake")]
    Snake,
}

impl RegisterCase {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "upper" => RegisterCase::Upper,
            "pascal" => RegisterCase::Pascal,
            "snake" => RegisterCase::Snake,
            _ => bail!("unknown register case {}", s),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_case_parse() {
        assert_eq!(RegisterCase::parse("upper").unwrap(), RegisterCase::Upper);
        assert!(RegisterCase::parse("camel").is_err());
    }
}
