//! Generation orchestration: target expansion, stage sequencing, atomic
//! output and per-target failure accounting.
//!
//! Stages run in one hard-wired order (pins, registers, policies, startup,
//! linker) walked from a const array. The pin stage's product is a required
//! argument of the policy and startup steps, so a dependent artifact cannot
//! be rendered before pin generation has succeeded; there is no call order
//! that produces a policy with a dangling pin reference.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use thiserror::Error;

use crate::config::Config;
use crate::metadata::{MetadataSet, SchemaError};
use crate::render::{self, PinArtifacts, RenderError, TemplateContext};
use crate::resolve::{self, ResolveError, ResolvedConfig};
use crate::util::{atomic_write, ToSanitizedSnakeCase};

/// Marker file dropped into every generated directory so tooling and
/// developers can tell generated-and-overwritable content from hand-written
/// code.
pub const GENERATED_SENTINEL: &str = ".halgen-generated";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("writing `{}`: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pin stage did not complete for {mcu}; {stage} targets were not generated")]
    PinStageFailed { mcu: String, stage: &'static str },
}

impl Error {
    /// Taxonomy bucket for user-facing reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Schema(_) => "schema",
            Error::Resolve(_) => "resolve",
            Error::Render(_) => "render",
            Error::Write { .. } => "write",
            Error::PinStageFailed { .. } => "ordering",
        }
    }
}

/// Generation stages in their only legal execution order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    Pins,
    Registers,
    Policies,
    Startup,
    Linker,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Pins,
        Stage::Registers,
        Stage::Policies,
        Stage::Startup,
        Stage::Linker,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Pins => "pins",
            Stage::Registers => "registers",
            Stage::Policies => "policies",
            Stage::Startup => "startup",
            Stage::Linker => "linker",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ArtifactKind {
    /// Placeholder for failures that precede any artifact (metadata did not
    /// resolve); blocks every other target of the MCU.
    Resolution,
    PinTable,
    RegisterBlock { kind: String },
    HardwarePolicy { peripheral: String },
    Startup,
    DeviceX,
    LinkerScript,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArtifactKind::Resolution => write!(f, "resolve"),
            ArtifactKind::PinTable => write!(f, "pin-table"),
            ArtifactKind::RegisterBlock { kind } => write!(f, "register-block:{kind}"),
            ArtifactKind::HardwarePolicy { peripheral } => {
                write!(f, "hardware-policy:{peripheral}")
            }
            ArtifactKind::Startup => write!(f, "startup"),
            ArtifactKind::DeviceX => write!(f, "device.x"),
            ArtifactKind::LinkerScript => write!(f, "memory.x"),
        }
    }
}

/// One (family, MCU variant, artifact kind) unit of work.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GenerationTarget {
    pub family: String,
    pub mcu: String,
    pub kind: ArtifactKind,
}

impl fmt::Display for GenerationTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{}", self.family, self.mcu, self.kind)
    }
}

#[derive(Debug)]
pub enum Outcome {
    Written(PathBuf),
    /// Dry run: the path the artifact would have been written to.
    WouldWrite(PathBuf),
    /// Validate-only: rendered and syntax-checked, nothing written.
    Validated,
    Failed(Error),
}

#[derive(Debug)]
pub struct TargetReport {
    pub target: GenerationTarget,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct GenerationReport {
    pub targets: Vec<TargetReport>,
}

impl GenerationReport {
    fn record(&mut self, target: GenerationTarget, outcome: Outcome) {
        match &outcome {
            Outcome::Written(path) => debug!("{target}: wrote {}", path.display()),
            Outcome::WouldWrite(path) => debug!("{target}: would write {}", path.display()),
            Outcome::Validated => debug!("{target}: validated"),
            Outcome::Failed(e) => error!("{target}: {} error: {e}", e.kind()),
        }
        self.targets.push(TargetReport { target, outcome });
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, Outcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn written(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, Outcome::Written(_)))
            .count()
    }

    pub fn log_summary(&self) {
        let failed = self.failures().count();
        info!(
            "{} targets, {} written, {} failed",
            self.targets.len(),
            self.written(),
            failed
        );
        for t in self.failures() {
            if let Outcome::Failed(e) = &t.outcome {
                error!("{}: [{}] {e}", t.target, e.kind());
            }
        }
    }
}

/// Generate every selected target. Selector errors (unknown family or MCU)
/// abort immediately; per-target failures are recorded in the report, and
/// `fail_fast` stops the batch at the first one.
pub fn generate(set: &MetadataSet, config: &Config) -> Result<GenerationReport, Error> {
    let mut report = GenerationReport::default();

    let families: Vec<String> = match &config.family {
        Some(f) => {
            if set.family(f).is_none() {
                return Err(ResolveError::UnknownFamily { family: f.clone() }.into());
            }
            vec![f.clone()]
        }
        None => set.family_names().map(String::from).collect(),
    };

    'families: for family in &families {
        let mut mcus = mcu_catalog(set, family)?;
        if let Some(selected) = &config.mcu {
            if !mcus.iter().any(|m| m == selected) {
                return Err(ResolveError::UnknownMcu {
                    family: family.clone(),
                    mcu: selected.clone(),
                }
                .into());
            }
            mcus.retain(|m| m == selected);
        }

        for mcu in &mcus {
            if config.verbose {
                info!("generating {family}/{mcu}");
            }
            generate_mcu(set, config, family, mcu, &mut report);
            if config.fail_fast && report.has_failures() {
                break 'families;
            }
        }
    }

    Ok(report)
}

fn mcu_catalog(set: &MetadataSet, family: &str) -> Result<Vec<String>, Error> {
    let raw = set
        .family(family)
        .ok_or_else(|| ResolveError::UnknownFamily {
            family: family.to_string(),
        })?;
    // The family schema guarantees `mcus` is an array of strings.
    Ok(raw.document["mcus"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default())
}

fn target(family: &str, mcu: &str, kind: ArtifactKind) -> GenerationTarget {
    GenerationTarget {
        family: family.to_string(),
        mcu: mcu.to_string(),
        kind,
    }
}

fn generate_mcu(
    set: &MetadataSet,
    config: &Config,
    family: &str,
    mcu: &str,
    report: &mut GenerationReport,
) {
    let cfg = match resolve::resolve(set, family, mcu).and_then(|c| {
        resolve::validate(&c)?;
        Ok(c)
    }) {
        Ok(cfg) => cfg,
        Err(e) => {
            report.record(target(family, mcu, ArtifactKind::Resolution), Outcome::Failed(e.into()));
            return;
        }
    };

    let out_dir = config.output_dir.join(family).join(mcu);
    let mut pins: Option<PinArtifacts> = None;

    for stage in Stage::ALL {
        if config.verbose {
            debug!("{family}/{mcu}: stage {}", stage.name());
        }
        match stage {
            Stage::Pins => pins = run_pins(&cfg, config, &out_dir, report),
            Stage::Registers => run_registers(&cfg, config, &out_dir, report),
            Stage::Policies => match &pins {
                Some(pins) => run_policies(&cfg, pins, config, &out_dir, report),
                None => {
                    for p in &cfg.peripherals {
                        report.record(
                            target(
                                &cfg.family,
                                &cfg.mcu,
                                ArtifactKind::HardwarePolicy {
                                    peripheral: p.name.clone(),
                                },
                            ),
                            Outcome::Failed(Error::PinStageFailed {
                                mcu: cfg.mcu.clone(),
                                stage: "hardware-policy",
                            }),
                        );
                    }
                }
            },
            Stage::Startup => match &pins {
                Some(_) => run_startup(&cfg, config, &out_dir, report),
                None => {
                    for kind in [ArtifactKind::Startup, ArtifactKind::DeviceX] {
                        report.record(
                            target(&cfg.family, &cfg.mcu, kind),
                            Outcome::Failed(Error::PinStageFailed {
                                mcu: cfg.mcu.clone(),
                                stage: "startup",
                            }),
                        );
                    }
                }
            },
            Stage::Linker => run_linker(&cfg, config, &out_dir, report),
        }
        if config.fail_fast && report.has_failures() {
            return;
        }
    }
}

/// Render and persist the pin table. Returns the in-memory pin artifacts
/// only on full success: a pin table that failed to land on disk must not
/// unblock the stages that reference it.
fn run_pins(
    cfg: &ResolvedConfig,
    config: &Config,
    out_dir: &Path,
    report: &mut GenerationReport,
) -> Option<PinArtifacts> {
    let t = target(&cfg.family, &cfg.mcu, ArtifactKind::PinTable);
    let ctx = TemplateContext::device(cfg);
    match render::render("pin-table", &ctx) {
        Ok(text) => {
            let ok = write_artifact(t, &out_dir.join("pins.rs"), &text, config, report);
            ok.then(|| PinArtifacts::from_config(cfg))
        }
        Err(e) => {
            report.record(t, Outcome::Failed(e.into()));
            None
        }
    }
}

fn run_registers(
    cfg: &ResolvedConfig,
    config: &Config,
    out_dir: &Path,
    report: &mut GenerationReport,
) {
    let kinds: BTreeSet<&str> = cfg.peripherals.iter().map(|p| p.kind.as_str()).collect();
    for kind in kinds {
        let p = cfg
            .peripherals
            .iter()
            .find(|p| p.kind == kind)
            .expect("kind came from this list");
        let t = target(
            &cfg.family,
            &cfg.mcu,
            ArtifactKind::RegisterBlock {
                kind: kind.to_string(),
            },
        );
        let ctx = TemplateContext::for_block(cfg, p);
        match render::render("register-block", &ctx) {
            Ok(text) => {
                let file = format!("{}.rs", kind.to_sanitized_snake_case());
                write_artifact(t, &out_dir.join("registers").join(file), &text, config, report);
            }
            Err(e) => report.record(t, Outcome::Failed(e.into())),
        }
    }
}

fn run_policies(
    cfg: &ResolvedConfig,
    pins: &PinArtifacts,
    config: &Config,
    out_dir: &Path,
    report: &mut GenerationReport,
) {
    for p in &cfg.peripherals {
        let t = target(
            &cfg.family,
            &cfg.mcu,
            ArtifactKind::HardwarePolicy {
                peripheral: p.name.clone(),
            },
        );
        let ctx = TemplateContext::for_peripheral(cfg, p, pins);
        match render::render("hardware-policy", &ctx) {
            Ok(text) => {
                let file = format!("{}.rs", p.name.to_sanitized_snake_case());
                write_artifact(t, &out_dir.join("policies").join(file), &text, config, report);
            }
            Err(e) => report.record(t, Outcome::Failed(e.into())),
        }
    }
}

fn run_startup(
    cfg: &ResolvedConfig,
    config: &Config,
    out_dir: &Path,
    report: &mut GenerationReport,
) {
    let ctx = TemplateContext::device(cfg);

    let t = target(&cfg.family, &cfg.mcu, ArtifactKind::Startup);
    match render::render("startup", &ctx) {
        Ok(text) => {
            write_artifact(t, &out_dir.join("startup.rs"), &text, config, report);
        }
        Err(e) => report.record(t, Outcome::Failed(e.into())),
    }

    let t = target(&cfg.family, &cfg.mcu, ArtifactKind::DeviceX);
    match render::render("device-x", &ctx) {
        Ok(text) => {
            write_artifact(t, &out_dir.join("device.x"), &text, config, report);
        }
        Err(e) => report.record(t, Outcome::Failed(e.into())),
    }
}

fn run_linker(
    cfg: &ResolvedConfig,
    config: &Config,
    out_dir: &Path,
    report: &mut GenerationReport,
) {
    let t = target(&cfg.family, &cfg.mcu, ArtifactKind::LinkerScript);
    let ctx = TemplateContext::device(cfg);
    match render::render("linker-script", &ctx) {
        Ok(text) => {
            write_artifact(t, &out_dir.join("memory.x"), &text, config, report);
        }
        Err(e) => report.record(t, Outcome::Failed(e.into())),
    }
}

/// Persist one rendered artifact according to the run mode. Returns whether
/// the target ended in a non-failure outcome.
fn write_artifact(
    t: GenerationTarget,
    path: &Path,
    text: &str,
    config: &Config,
    report: &mut GenerationReport,
) -> bool {
    if config.dry_run {
        report.record(t, Outcome::WouldWrite(path.to_path_buf()));
        return true;
    }
    if config.validate_only {
        report.record(t, Outcome::Validated);
        return true;
    }

    match persist(path, text) {
        Ok(()) => {
            report.record(t, Outcome::Written(path.to_path_buf()));
            true
        }
        Err(source) => {
            report.record(
                t,
                Outcome::Failed(Error::Write {
                    path: path.to_path_buf(),
                    source,
                }),
            );
            false
        }
    }
}

fn persist(path: &Path, text: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    mark_generated(dir)?;
    atomic_write(path, text.as_bytes())
}

fn mark_generated(dir: &Path) -> io::Result<()> {
    let marker = dir.join(GENERATED_SENTINEL);
    if !marker.exists() {
        atomic_write(
            &marker,
            b"This directory is generated by halgen. Do not edit by hand; regeneration overwrites it.\n",
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::testutil::write_tree;

    fn setup() -> (tempfile::TempDir, MetadataSet) {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path().join("metadata").as_path());
        let set = MetadataSet::load(&dir.path().join("metadata")).unwrap();
        (dir, set)
    }

    fn config_for(dir: &Path) -> Config {
        Config {
            metadata_dir: dir.join("metadata"),
            output_dir: dir.join("out"),
            ..Config::default()
        }
    }

    #[test]
    fn full_run_writes_every_artifact() {
        let (dir, set) = setup();
        let config = config_for(dir.path());
        let report = generate(&set, &config).unwrap();

        assert!(!report.has_failures());
        let base = dir.path().join("out/mini/MINI1");
        for file in [
            "pins.rs",
            "registers/usart.rs",
            "policies/usart1.rs",
            "startup.rs",
            "device.x",
            "memory.x",
        ] {
            assert!(base.join(file).is_file(), "missing {file}");
        }
        assert!(base.join(GENERATED_SENTINEL).is_file());
        // Two MCU variants in the fixture family.
        assert!(dir.path().join("out/mini/MINI2/pins.rs").is_file());
    }

    #[test]
    fn pin_table_is_generated_before_dependent_targets() {
        let (dir, set) = setup();
        let config = config_for(dir.path());
        let report = generate(&set, &config).unwrap();

        let order: Vec<&ArtifactKind> = report
            .targets
            .iter()
            .filter(|t| t.target.mcu == "MINI1")
            .map(|t| &t.target.kind)
            .collect();
        let pin_idx = order
            .iter()
            .position(|k| **k == ArtifactKind::PinTable)
            .unwrap();
        let policy_idx = order
            .iter()
            .position(|k| matches!(k, ArtifactKind::HardwarePolicy { .. }))
            .unwrap();
        let startup_idx = order
            .iter()
            .position(|k| **k == ArtifactKind::Startup)
            .unwrap();
        assert!(pin_idx < policy_idx);
        assert!(pin_idx < startup_idx);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (dir, set) = setup();
        let config = Config {
            dry_run: true,
            ..config_for(dir.path())
        };
        let report = generate(&set, &config).unwrap();

        assert!(!report.has_failures());
        assert!(report
            .targets
            .iter()
            .all(|t| matches!(t.outcome, Outcome::WouldWrite(_))));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn validate_only_writes_nothing_but_surfaces_errors() {
        let (dir, set) = setup();
        let config = Config {
            validate_only: true,
            ..config_for(dir.path())
        };
        let report = generate(&set, &config).unwrap();
        assert!(!report.has_failures());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn rerun_is_byte_identical() {
        let (dir, set) = setup();
        let config = config_for(dir.path());
        generate(&set, &config).unwrap();

        let snapshot = |root: &Path| {
            let mut files = Vec::new();
            let mut stack = vec![root.to_path_buf()];
            while let Some(p) = stack.pop() {
                for entry in fs::read_dir(&p).unwrap() {
                    let path = entry.unwrap().path();
                    if path.is_dir() {
                        stack.push(path);
                    } else {
                        files.push((path.clone(), fs::read(&path).unwrap()));
                    }
                }
            }
            files.sort();
            files
        };

        let first = snapshot(&dir.path().join("out"));
        generate(&set, &config).unwrap();
        let second = snapshot(&dir.path().join("out"));
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_family_selector_is_a_hard_error() {
        let (dir, set) = setup();
        let config = Config {
            family: Some("maxi".to_string()),
            ..config_for(dir.path())
        };
        assert!(matches!(
            generate(&set, &config).unwrap_err(),
            Error::Resolve(ResolveError::UnknownFamily { .. })
        ));
    }

    #[test]
    fn resolution_failure_is_attributed_and_collected() {
        let (dir, set) = setup();
        drop(set);
        // Break the family metadata after the schema check: an operation on
        // a register that does not exist resolves, then fails lowering.
        let family_path = dir.path().join("metadata/families/mini.json");
        let mut doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&family_path).unwrap()).unwrap();
        doc["operations"]["usart"][0]["register"] = serde_json::Value::from("NOPE");
        fs::write(&family_path, doc.to_string()).unwrap();

        let set = MetadataSet::load(&dir.path().join("metadata")).unwrap();
        let config = config_for(dir.path());
        let report = generate(&set, &config).unwrap();

        // Both MCU variants fail resolution; best-effort keeps going.
        assert_eq!(report.failures().count(), 2);
        assert!(report
            .failures()
            .all(|t| t.target.kind == ArtifactKind::Resolution));

        let fail_fast = Config {
            fail_fast: true,
            ..config_for(dir.path())
        };
        let report = generate(&set, &fail_fast).unwrap();
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn write_failure_blocks_dependent_stages() {
        let (dir, set) = setup();
        // Output root is a file: every directory creation fails, so the pin
        // write fails and dependent stages must report the ordering error.
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"").unwrap();
        let config = Config {
            output_dir: blocked,
            ..config_for(dir.path())
        };
        let report = generate(&set, &config).unwrap();

        assert!(report.failures().any(|t| {
            matches!(&t.outcome, Outcome::Failed(Error::Write { .. }))
                && t.target.kind == ArtifactKind::PinTable
        }));
        assert!(report.failures().any(|t| {
            matches!(&t.outcome, Outcome::Failed(Error::PinStageFailed { .. }))
                && matches!(t.target.kind, ArtifactKind::HardwarePolicy { .. })
        }));
    }

    #[test]
    fn mcu_selector_restricts_the_batch() {
        let (dir, set) = setup();
        let config = Config {
            family: Some("mini".to_string()),
            mcu: Some("MINI2".to_string()),
            ..config_for(dir.path())
        };
        let report = generate(&set, &config).unwrap();
        assert!(!report.has_failures());
        assert!(report.targets.iter().all(|t| t.target.mcu == "MINI2"));
        assert!(!dir.path().join("out/mini/MINI1").exists());
    }
}
