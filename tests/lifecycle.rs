mod common;

use common::{run_default, run_script, Setup};
use lark_engine::bridge::WorkerState;
use lark_engine::config::{ScriptConfig, TickErrorPolicy};
use lark_engine::host::HostExit;
use lark_engine::input::InputEvent;

#[test]
fn reentrant_start_fails_and_the_loop_keeps_running() {
    let session = run_default(
        r#"
        let second = "";
        register_tick(|| {
            if frame_count() == 1 {
                try { start(); } catch (err) { second = err; }
            }
            if frame_count() == 2 { stop(); }
        });
        start();
        "#,
    );
    session.result.as_ref().expect("script runs");
    assert!(session.string("second").contains("already running"), "got {:?}", session.string("second"));
    assert_eq!(session.runtime.frames_run(), 2);
    assert_eq!(session.state, WorkerState::Stopped);
}

#[test]
fn start_requires_a_callback() {
    let session = run_default("start();");
    let err = session.result.expect_err("start without callback must fail");
    assert!(format!("{err:#}").contains("before a tick callback"));
    assert_eq!(session.report.frames, 0, "no frame is published for a loop that never ran");
}

#[test]
fn stop_outside_the_loop_does_nothing() {
    let session = run_default(
        r#"
        stop();
        stop();
        let active = is_active();
        "#,
    );
    session.result.as_ref().expect("script runs");
    assert!(!session.flag("active"));
    assert_eq!(session.state, WorkerState::Idle);
}

#[test]
fn start_after_stop_is_rejected() {
    let session = run_default(
        r#"
        register_tick(|| stop());
        start();
        let again = "";
        try { start(); } catch (err) { again = err; }
        "#,
    );
    session.result.as_ref().expect("script runs");
    assert!(session.string("again").contains("state stopped"), "got {:?}", session.string("again"));
}

#[test]
fn latest_registered_callback_wins() {
    let session = run_default(
        r#"
        let which = "";
        register_tick(|| { which = "first"; stop(); });
        register_tick(|| { which = "second"; stop(); });
        start();
        "#,
    );
    session.result.as_ref().expect("script runs");
    assert_eq!(session.string("which"), "second");
}

#[test]
fn tick_errors_are_reported_and_the_loop_continues() {
    let session = run_default(
        r#"
        register_tick(|| {
            if frame_count() == 2 { throw "boom"; }
            if frame_count() == 4 { stop(); }
        });
        start();
        "#,
    );
    session.result.as_ref().expect("tick errors do not escape start()");
    assert_eq!(session.runtime.frames_run(), 4);
    assert_eq!(session.report.errors.len(), 1);
    assert!(session.report.errors[0].starts_with("[tick]"));
    assert!(session.report.errors[0].contains("boom"));
    let failing = session.report.records.iter().find(|r| !r.errors.is_empty()).expect("error recorded");
    assert_eq!(failing.frame, 2);
}

#[test]
fn stop_after_policy_ends_in_error_state() {
    let config = ScriptConfig {
        tick_error_policy: TickErrorPolicy::StopAfter { consecutive_failures: 2 },
        ..ScriptConfig::default()
    };
    let session = run_script(
        r#"
        register_tick(|| { throw "always"; });
        start();
        let after = is_active();
        "#,
        Setup { config, ..Setup::default() },
    );
    session.result.as_ref().expect("start() returns normally under stop_after");
    assert_eq!(session.runtime.frames_run(), 2);
    assert_eq!(session.state, WorkerState::Error);
    assert!(!session.flag("after"));
    assert_eq!(session.report.errors.len(), 2);
}

#[test]
fn host_frame_limit_ends_the_loop() {
    let session = run_script(
        r#"
        let ticks = 0;
        register_tick(|| { ticks += 1; });
        start();
        "#,
        Setup { frames: 5, ..Setup::default() },
    );
    session.result.as_ref().expect("script runs");
    assert_eq!(session.report.exit, HostExit::FrameLimit);
    assert_eq!(session.int("ticks"), 5);
    assert_eq!(session.state, WorkerState::Stopped);
}

#[test]
fn assets_cannot_be_registered_once_started() {
    let session = run_default(
        r#"
        let failure = "";
        register_tick(|| {
            try { load_image("late", "late.png"); } catch (err) { failure = err; }
            stop();
        });
        start();
        "#,
    );
    session.result.as_ref().expect("script runs");
    assert!(session.string("failure").contains("before start()"), "got {:?}", session.string("failure"));
}

#[test]
fn unknown_asset_is_a_script_error() {
    let session = run_default(
        r#"
        let failure = "";
        try { draw_image("ghost", 0, 0); } catch (err) { failure = err; }
        "#,
    );
    session.result.as_ref().expect("script runs");
    assert!(session.string("failure").contains("unknown asset 'ghost'"));
}

#[test]
fn key_pressed_fires_only_on_the_transition_frame() {
    let session = run_script(
        r#"
        let presses = [];
        let held = 0;
        register_tick(|| {
            if is_key_pressed("A") { presses.push(frame_count()); }
            if is_key_down("a") { held += 1; }
            if frame_count() == 4 { stop(); }
        });
        start();
        "#,
        Setup {
            inputs: vec![
                (2, InputEvent::KeyDown { key: "a".into() }),
                (3, InputEvent::KeyDown { key: "a".into() }),
            ],
            ..Setup::default()
        },
    );
    session.result.as_ref().expect("script runs");
    let presses = session.runtime.value::<rhai::Array>("presses").expect("presses array");
    let frames: Vec<i64> = presses.iter().map(|v| v.as_int().expect("int")).collect();
    assert_eq!(frames, vec![2], "held key must not re-trigger");
    assert_eq!(session.int("held"), 3);
}

#[test]
fn timing_uses_the_host_clock() {
    let session = run_default(
        r#"
        let first_dt = -1.0;
        let total = 0.0;
        register_tick(|| {
            if frame_count() == 1 { first_dt = delta_time(); }
            total = total_time();
            if frame_count() == 3 { stop(); }
        });
        start();
        "#,
    );
    session.result.as_ref().expect("script runs");
    assert_eq!(session.runtime.value::<f64>("first_dt"), Some(0.0));
    assert_eq!(session.runtime.value::<f64>("total"), Some(1.0));
}
