//! End-to-end runs over the metadata tree shipped with the crate.

use std::fs;
use std::path::{Path, PathBuf};

use halgen::generate::GENERATED_SENTINEL;
use halgen::{generate, Config, MetadataSet};

fn shipped_metadata() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("metadata")
}

fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
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
}

#[test]
fn full_batch_over_both_families() {
    let out = tempfile::tempdir().unwrap();
    let config = Config {
        metadata_dir: shipped_metadata(),
        output_dir: out.path().to_path_buf(),
        ..Config::default()
    };
    let set = MetadataSet::load(&config.metadata_dir).unwrap();
    let report = generate(&set, &config).unwrap();
    assert!(!report.has_failures());

    // Two families, four MCU variants, six artifacts minimum each.
    for mcu_dir in [
        "stm32f103/STM32F103C8",
        "stm32f103/STM32F103RB",
        "same70/ATSAME70Q21",
        "same70/ATSAME70N19",
    ] {
        let base = out.path().join(mcu_dir);
        assert!(base.join("pins.rs").is_file(), "{mcu_dir}: pins.rs");
        assert!(base.join("startup.rs").is_file(), "{mcu_dir}: startup.rs");
        assert!(base.join("device.x").is_file(), "{mcu_dir}: device.x");
        assert!(base.join("memory.x").is_file(), "{mcu_dir}: memory.x");
        assert!(base.join(GENERATED_SENTINEL).is_file(), "{mcu_dir}: sentinel");
    }

    // The peripheral-tier override adds tx_ready for the SAME70 UARTs only.
    let uart0 = fs::read_to_string(out.path().join("same70/ATSAME70Q21/policies/uart0.rs")).unwrap();
    assert!(uart0.contains("pub fn tx_ready()"));
    assert!(uart0.contains("pub fn set_loopback(value: u32)"));
    let usart1 =
        fs::read_to_string(out.path().join("stm32f103/STM32F103C8/policies/usart1.rs")).unwrap();
    assert!(!usart1.contains("set_loopback"));
    assert!(usart1.contains("pub fn set_baud(rate: u32)"));

    // Register blocks carry the compile-time size assertion.
    let uart_regs =
        fs::read_to_string(out.path().join("same70/ATSAME70Q21/registers/uart.rs")).unwrap();
    assert!(uart_regs.contains("size_of::<RegisterBlock>() == 0x28"));

    // The vector table and device.x agree on the device interrupts.
    let device_x = fs::read_to_string(out.path().join("same70/ATSAME70Q21/device.x")).unwrap();
    assert!(device_x.contains("PROVIDE(UART0 = DefaultHandler);"));
    let startup = fs::read_to_string(out.path().join("same70/ATSAME70Q21/startup.rs")).unwrap();
    assert!(startup.contains("Vector { handler: UART0 }"));
    // SAME70 has an FPU; STM32F103 does not.
    assert!(startup.contains("CPACR"));
    let startup_f1 =
        fs::read_to_string(out.path().join("stm32f103/STM32F103C8/startup.rs")).unwrap();
    assert!(!startup_f1.contains("CPACR"));
}

#[test]
fn second_run_is_byte_identical() {
    let out = tempfile::tempdir().unwrap();
    let config = Config {
        metadata_dir: shipped_metadata(),
        output_dir: out.path().to_path_buf(),
        ..Config::default()
    };
    let set = MetadataSet::load(&config.metadata_dir).unwrap();

    generate(&set, &config).unwrap();
    let first = snapshot(out.path());
    generate(&set, &config).unwrap();
    let second = snapshot(out.path());
    assert_eq!(first, second);
}

#[test]
fn dry_run_reports_paths_and_touches_nothing() {
    let out = tempfile::tempdir().unwrap();
    let output_dir = out.path().join("never-created");
    let config = Config {
        metadata_dir: shipped_metadata(),
        output_dir: output_dir.clone(),
        dry_run: true,
        ..Config::default()
    };
    let set = MetadataSet::load(&config.metadata_dir).unwrap();
    let report = generate(&set, &config).unwrap();
    assert!(!report.has_failures());
    assert!(!report.targets.is_empty());
    assert!(!output_dir.exists());
}

#[test]
fn validate_mode_surfaces_schema_errors_without_writing() {
    // Copy the shipped tree, then break one family file.
    let work = tempfile::tempdir().unwrap();
    let metadata = work.path().join("metadata");
    copy_tree(&shipped_metadata(), &metadata);

    let family_path = metadata.join("families/same70.json");
    let mut doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&family_path).unwrap()).unwrap();
    doc["memory"]
        .as_object_mut()
        .unwrap()
        .remove("stack_size");
    fs::write(&family_path, doc.to_string()).unwrap();

    let err = MetadataSet::load(&metadata).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("memory.stack_size"), "got: {message}");
    assert!(message.contains("same70.json"), "got: {message}");
}

fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let dest = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &dest);
        } else {
            fs::copy(entry.path(), &dest).unwrap();
        }
    }
}
