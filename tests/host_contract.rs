//! End-to-end exercises of the host surface: message routing, the silence
//! latch, and recovery, driven the way an embedding host would drive them.
//!
//! Run with: cargo test --test host_contract

use sigscript::{Atom, FaultKind, Processor};

const SCRIPT: &str = r#"
    fn thru(x, prev, n) { x }

    fn gain(x, prev, n, amount) { x * amount }

    fn smooth(x, prev, n) { (x + prev) * 0.5 }

    fn tuned(x, prev, n) {
        if has_param("wet") { x * param("wet") } else { x }
    }

    fn broken(x, prev, n) { 1.0 / 0.0 }
"#;

fn processor() -> Processor<String> {
    Processor::new(SCRIPT.to_string()).unwrap()
}

#[test]
fn gain_output_is_clamped() {
    let mut p = processor();
    p.on_block_setup(44100.0, 64);
    p.on_message(Some("gain"), &[]).unwrap();
    p.on_message(None, &[Atom::Num(2.0)]).unwrap();

    let input = [0.6, -0.6, 0.25];
    let mut out = [0.0; 3];
    p.process_block(&input, &mut out);
    assert_eq!(out, [1.0, -1.0, 0.5]);
}

#[test]
fn unknown_function_stays_on_previous_and_keeps_sound() {
    let mut p = processor();
    p.on_message(Some("thru"), &[]).unwrap();

    let err = p.on_message(Some("not_a_function"), &[]).unwrap_err();
    assert_eq!(err.kind(), FaultKind::UnknownFunction);

    let mut out = [0.0; 2];
    p.process_block(&[0.5, 0.25], &mut out);
    assert_eq!(out, [0.5, 0.25], "previous function keeps running");

    let diags = p.take_diagnostics();
    assert!(diags.iter().any(|d| d.kind == FaultKind::UnknownFunction));
}

#[test]
fn unknown_function_with_no_previous_is_silent() {
    let mut p = processor();
    assert!(p.on_message(Some("not_a_function"), &[]).is_err());

    let mut out = [1.0; 4];
    p.process_block(&[0.5; 4], &mut out);
    assert_eq!(out, [0.0; 4]);
}

#[test]
fn non_finite_result_latches_until_switch() {
    let mut p = processor();
    p.on_message(Some("broken"), &[]).unwrap();

    let mut out = [1.0; 4];
    p.process_block(&[0.5; 4], &mut out);
    assert_eq!(out, [0.0; 4], "fault zero-fills the block");

    // Still silent on later blocks, and no new fault is raised.
    p.take_diagnostics();
    p.process_block(&[0.5; 4], &mut out);
    assert_eq!(out, [0.0; 4]);
    assert!(p.take_diagnostics().is_empty(), "latched engine raises no faults");

    // Switching to a healthy function recovers.
    p.on_message(Some("thru"), &[]).unwrap();
    p.process_block(&[0.5; 4], &mut out);
    assert_eq!(out, [0.5; 4]);

    let diags = p.take_diagnostics();
    assert!(diags.is_empty(), "recovered engine is clean: {:?}", diags);
}

#[test]
fn invalid_result_reports_kind() {
    let mut p = processor();
    *p.source_mut() = "fn bad(x, prev, n) { \"not audio\" }".to_string();
    p.on_reload_request().unwrap();
    p.on_message(Some("bad"), &[]).unwrap();

    let mut out = [0.0; 2];
    p.process_block(&[0.5; 2], &mut out);
    let diags = p.take_diagnostics();
    assert!(diags.iter().any(|d| d.kind == FaultKind::InvalidResult));
}

#[test]
fn combined_switch_and_configure_message() {
    let mut p = processor();
    p.on_message(
        Some("tuned"),
        &[Atom::Sym("wet".to_string()), Atom::Num(0.5)],
    )
    .unwrap();

    let mut out = [0.0; 1];
    p.process_block(&[0.8], &mut out);
    assert_eq!(out, [0.4]);
}

#[test]
fn selector_falls_back_to_named_parameter() {
    let mut p = processor();
    p.on_message(Some("tuned"), &[]).unwrap();

    // "wet" is not a function, so this sets the parameter instead.
    p.on_message(Some("wet"), &[Atom::Num(0.25)]).unwrap();

    let mut out = [0.0; 1];
    p.process_block(&[0.8], &mut out);
    assert_eq!(out, [0.2]);
}

#[test]
fn positional_update_keeps_untouched_suffix() {
    let mut p = processor();
    p.on_message(None, &[Atom::Num(1.0), Atom::Num(2.0), Atom::Num(3.0)])
        .unwrap();
    p.on_message(None, &[Atom::Num(9.0)]).unwrap();
    assert_eq!(p.engine().positional(), &[9.0, 2.0, 3.0]);
}

#[test]
fn named_update_replaces_whole_table() {
    let mut p = processor();
    p.on_message(None, &[Atom::Sym("a".to_string()), Atom::Num(1.0)])
        .unwrap();
    p.on_message(None, &[Atom::Sym("b".to_string()), Atom::Num(2.0)])
        .unwrap();
    assert_eq!(p.engine().named_value("a"), None);
    assert_eq!(p.engine().named_value("b"), Some(2.0));
}

#[test]
fn reload_keeps_active_function_running() {
    let mut p = processor();
    p.on_message(Some("smooth"), &[]).unwrap();
    p.on_reload_request().unwrap();

    assert_eq!(p.engine().active_function(), Some("smooth"));
    let mut out = [0.0; 1];
    p.process_block(&[1.0], &mut out);
    assert_eq!(out, [0.5], "prev starts at zero after reload");
}

#[test]
fn double_reload_is_idempotent() {
    let mut p = processor();
    p.on_message(Some("gain"), &[]).unwrap();
    p.on_message(None, &[Atom::Num(2.0)]).unwrap();
    p.on_message(None, &[Atom::Sym("wet".to_string()), Atom::Num(0.3)])
        .unwrap();

    p.on_reload_request().unwrap();
    p.on_reload_request().unwrap();

    assert_eq!(p.engine().active_function(), Some("gain"));
    assert_eq!(p.engine().positional(), &[2.0]);
    assert_eq!(p.engine().named_value("wet"), Some(0.3));
    assert!(!p.engine().is_latched());
}

#[test]
fn reload_to_broken_source_latches_with_location() {
    let mut p = processor();
    p.on_message(Some("thru"), &[]).unwrap();

    *p.source_mut() = "fn thru(x, prev, n) {".to_string();
    assert!(p.on_reload_request().is_err());

    let mut out = [1.0; 2];
    p.process_block(&[0.5; 2], &mut out);
    assert_eq!(out, [0.0; 2]);

    let diags = p.take_diagnostics();
    let diag = diags
        .iter()
        .find(|d| d.kind == FaultKind::ScriptLoadFailed)
        .expect("load failure diagnostic");
    assert!(diag.location.is_some());

    // A second reload with good source recovers the same function.
    *p.source_mut() = SCRIPT.to_string();
    p.on_reload_request().unwrap();
    p.process_block(&[0.5; 2], &mut out);
    assert_eq!(out, [0.5; 2]);
}

#[test]
fn feedback_state_spans_blocks() {
    let mut p = processor();
    p.on_message(Some("smooth"), &[]).unwrap();

    let mut first = [0.0; 1];
    p.process_block(&[1.0], &mut first);
    assert_eq!(first, [0.5]);

    let mut second = [0.0; 1];
    p.process_block(&[0.5], &mut second);
    assert_eq!(second, [0.5], "previous output carries into the next block");
}
