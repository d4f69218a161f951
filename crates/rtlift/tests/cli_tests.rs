//! CLI integration tests for rtlift.
//!
//! These tests run the rtlift binary against small raw code images
//! written to a temporary directory.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Get the path to the rtlift binary.
fn rtlift_bin() -> String {
    env!("CARGO_BIN_EXE_rtlift").to_string()
}

/// Run rtlift with the given arguments.
fn run_rtlift(args: &[&str]) -> Output {
    Command::new(rtlift_bin())
        .args(args)
        .output()
        .expect("Failed to execute rtlift")
}

/// Write a raw image and return its path.
fn write_image(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, bytes).expect("Failed to write image");
    path
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help() {
    let output = run_rtlift(&["--help"]);
    assert!(output.status.success(), "rtlift --help should succeed");
    let stdout = stdout_of(&output);
    assert!(stdout.contains("register transfer language"));
    assert!(stdout.contains("lift"));
    assert!(stdout.contains("scan"));
}

#[test]
fn test_archs_lists_builtin_architectures() {
    let output = run_rtlift(&["archs"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("x86-real-16"));
    assert!(stdout.contains("x86-protected-32"));
}

#[test]
fn test_regs_shows_registers_and_flags() {
    let output = run_rtlift(&["regs", "-A", "x86-real-16"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Pointer size:  16 bits"));
    assert!(stdout.contains("Stack pointer: sp"));
    assert!(stdout.contains(" ds "));
    assert!(stdout.contains("Flags"));
}

#[test]
fn test_unknown_architecture_fails() {
    let output = run_rtlift(&["regs", "-A", "m68k"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown architecture: m68k"));
    assert!(stderr.contains("x86-protected-32"));
}

// =============================================================================
// Lift Command Tests
// =============================================================================

#[test]
fn test_lift_protected_mode_text() {
    let dir = TempDir::new().unwrap();
    // xor eax, eax; ret
    let image = write_image(&dir, "zero.bin", &[0x31, 0xC0, 0xC3]);
    let output = run_rtlift(&["lift", image.to_str().unwrap(), "-b", "401000"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = stdout_of(&output);
    assert!(stdout.contains("fn00401000"));
    assert!(stdout.contains("00401000(2): eax = 0<32>;"));
    assert!(stdout.contains("00401002(1): return (4,0);"));
    assert!(!stdout.contains("warning"));
}

#[test]
fn test_lift_real_mode_copy_idiom() {
    let dir = TempDir::new().unwrap();
    // push cs; pop ds; ret
    let image = write_image(&dir, "dos.bin", &[0x0E, 0x1F, 0xC3]);
    let output = run_rtlift(&[
        "lift",
        image.to_str().unwrap(),
        "-A",
        "x86-real-16",
        "-b",
        "0800:0100",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = stdout_of(&output);
    assert!(stdout.contains("fn0800_0100"));
    assert!(stdout.contains("0800:0100(2): ds = cs;"));
}

#[test]
fn test_lift_json_output() {
    let dir = TempDir::new().unwrap();
    // mov eax, 1; ret 8
    let image = write_image(&dir, "ret8.bin", &[0xB8, 0x01, 0x00, 0x00, 0x00, 0xC2, 0x08, 0x00]);
    let output = run_rtlift(&["lift", image.to_str().unwrap(), "-b", "1000", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    let procedure = &json[0];
    assert_eq!(procedure["stack_delta"], 12);
    assert_eq!(procedure["partial"], false);
    assert_eq!(procedure["clusters"].as_array().unwrap().len(), 2);
    assert_eq!(procedure["clusters"][0]["statements"][0], "eax = 1<32>");
}

#[test]
fn test_lift_abort_policy_reports_error() {
    let dir = TempDir::new().unwrap();
    // adc eax, ebx; ret
    let image = write_image(&dir, "adc.bin", &[0x11, 0xD8, 0xC3]);

    let lenient = run_rtlift(&["lift", image.to_str().unwrap(), "-b", "1000"]);
    assert!(lenient.status.success());
    assert!(stdout_of(&lenient).contains("<invalid>"));

    let strict = run_rtlift(&["lift", image.to_str().unwrap(), "-b", "1000", "-p", "abort"]);
    assert!(!strict.status.success());
    let stderr = String::from_utf8_lossy(&strict.stderr);
    assert!(stderr.contains("Failed to lift procedure"));
}

#[test]
fn test_lift_multiple_entries() {
    let dir = TempDir::new().unwrap();
    // f0: nop; ret   f1: xor ecx, ecx; ret
    let image = write_image(&dir, "two.bin", &[0x90, 0xC3, 0x31, 0xC9, 0xC3]);
    let output = run_rtlift(&[
        "lift",
        image.to_str().unwrap(),
        "-b",
        "1000",
        "-e",
        "1000",
        "-e",
        "1002",
    ]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("fn00001000"));
    assert!(stdout.contains("fn00001002"));
    assert!(stdout.contains("ecx = 0<32>"));
}

#[test]
fn test_verbose_flag_logs_to_stderr() {
    let dir = TempDir::new().unwrap();
    let image = write_image(&dir, "nop.bin", &[0x90, 0xC3]);
    let path = image.to_str().unwrap();

    let quiet = Command::new(rtlift_bin())
        .args(["lift", path, "-b", "1000"])
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute rtlift");
    assert!(quiet.status.success());
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("loaded 2 byte(s)"));

    let verbose = Command::new(rtlift_bin())
        .args(["-vv", "lift", path, "-b", "1000"])
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute rtlift");
    assert!(verbose.status.success());
    let stderr = String::from_utf8_lossy(&verbose.stderr);
    assert!(stderr.contains("DEBUG"));
    assert!(stderr.contains("loaded 2 byte(s)"));
    assert!(stdout_of(&verbose).contains("fn00001000"));
}

#[test]
fn test_lift_missing_image_fails() {
    let output = run_rtlift(&["lift", "/nonexistent/image.bin", "-b", "1000"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read image"));
}

// =============================================================================
// Scan Command Tests
// =============================================================================

#[test]
fn test_scan_finds_calls() {
    let dir = TempDir::new().unwrap();
    // call 0x1008; nop x3; ret
    let image = write_image(&dir, "call.bin", &[0xE8, 0x03, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90, 0xC3]);
    let output = run_rtlift(&[
        "scan",
        image.to_str().unwrap(),
        "-b",
        "1000",
        "-t",
        "1008",
        "--calls",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_of(&output).trim(), "00001000");

    let jumps_only = run_rtlift(&[
        "scan",
        image.to_str().unwrap(),
        "-b",
        "1000",
        "-t",
        "1008",
        "--jumps",
    ]);
    assert!(jumps_only.status.success());
    assert!(stdout_of(&jumps_only).trim().is_empty());
}
