use std::fs::File;
use std::path::Path;

use lark_engine::script_harness::{load_fixture, run_fixture, HarnessOutput};

#[test]
fn paint_fixture_matches_golden() {
    assert_fixture_matches("tests/fixtures/script_harness/paint.json", "tests/fixtures/script_harness/paint.golden.json");
}

#[test]
fn input_echo_fixture_matches_golden() {
    assert_fixture_matches(
        "tests/fixtures/script_harness/input_echo.json",
        "tests/fixtures/script_harness/input_echo.golden.json",
    );
}

#[test]
fn paint_fixture_is_stable_across_runs() {
    let fixture = load_fixture("tests/fixtures/script_harness/paint.json").expect("load fixture");
    let first = run_fixture(&fixture).expect("run fixture first time");
    let second = run_fixture(&fixture).expect("run fixture second time");
    assert_eq!(first, second, "fixed time step should produce identical output across runs");
}

#[test]
fn tick_errors_surface_in_the_frame_that_raised_them() {
    let fixture = load_fixture("tests/fixtures/script_harness/runaway.json").expect("load fixture");
    let output = run_fixture(&fixture).expect("run fixture");
    assert_eq!(output.exit, "frame_limit");
    assert_eq!(output.frames, 4);
    assert_eq!(output.frames_run, 4);
    assert_eq!(output.final_state, "stopped");
    assert!(output.script_error.is_none(), "tick errors never escape start()");
    assert_eq!(output.errors.len(), 1);
    assert!(output.errors[0].starts_with("[tick]") && output.errors[0].contains("bad frame"));
    let failing: Vec<u64> = output.records.iter().filter(|r| !r.errors.is_empty()).map(|r| r.frame).collect();
    assert_eq!(failing, vec![2]);
}

#[test]
fn missing_script_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let fixture_path = dir.path().join("fixture.json");
    let script = dir.path().join("absent.rhai");
    std::fs::write(&fixture_path, serde_json::json!({ "script": script }).to_string()).expect("write fixture");
    let fixture = load_fixture(&fixture_path).expect("load fixture");
    let err = run_fixture(&fixture).expect_err("missing script must fail");
    assert!(format!("{err:#}").contains("absent.rhai"));
}

fn assert_fixture_matches(fixture_path: &str, golden_path: &str) {
    let fixture = load_fixture(fixture_path).expect("load fixture");
    let output = run_fixture(&fixture).expect("run fixture");
    let golden_file = File::open(Path::new(golden_path)).expect("open golden");
    let golden: HarnessOutput = serde_json::from_reader(golden_file).expect("parse golden");
    assert_eq!(output, golden, "fixture {} diverged from golden {}", fixture_path, golden_path);
}
