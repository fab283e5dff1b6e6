use respite_core::{
    AbandonReason, ElementId, EngineConfig, InstanceStatus, PhaseEvent, SessionEvent, SessionId,
    SessionRunner, TransitionKind, WallClock,
};
use respite_testing::driver::{count_phase_completions, count_ticks, phase_events, pump_seconds};
use respite_testing::fixtures::{catalog, user, TestContext};
use std::time::Duration;

fn runner(session: &str, test: &TestContext) -> SessionRunner {
    SessionRunner::load(&catalog(), &SessionId::new(session), user(1), test.ctx.clone()).unwrap()
}

// ============================================================================
// Breathing
// ============================================================================

#[test]
fn test_square_breathing_runs_sixty_four_seconds() {
    let test = TestContext::new();
    let mut runner = runner("calm", &test);
    runner.start().unwrap();

    let events = pump_seconds(&mut runner, &test.clock, 63).unwrap();
    assert_eq!(count_ticks(&events), 63);
    assert_ne!(runner.status(), Some(InstanceStatus::Completed), "not done before t=64");

    let mut all = events;
    all.extend(pump_seconds(&mut runner, &test.clock, 1).unwrap());
    assert_eq!(count_ticks(&all), 64);
    assert_eq!(count_phase_completions(&all), 16);
    assert_eq!(runner.status(), Some(InstanceStatus::Completed));
    assert_eq!(
        runner.snapshot().unwrap().completed_at,
        Some(test.clock.now())
    );
}

#[test]
fn test_phase_names_repeat_in_authored_order() {
    let test = TestContext::new();
    let mut runner = runner("calm", &test);
    runner.start().unwrap();
    let events = pump_seconds(&mut runner, &test.clock, 64).unwrap();

    let names: Vec<String> = phase_events(&events)
        .into_iter()
        .filter_map(|e| match e {
            PhaseEvent::PhaseCompleted { phase_name, .. } => Some(phase_name),
            _ => None,
        })
        .collect();
    let authored = ["inhale", "hold", "exhale", "hold"];
    let expected: Vec<String> = authored
        .iter()
        .cycle()
        .take(16)
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names, expected);
}

#[test]
fn test_pause_and_resume_do_not_change_phase_stream() {
    let baseline = {
        let test = TestContext::new();
        let mut runner = runner("calm", &test);
        runner.start().unwrap();
        phase_events(&pump_seconds(&mut runner, &test.clock, 64).unwrap())
    };

    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..10 {
        let test = TestContext::new();
        let mut runner = runner("calm", &test);
        runner.start().unwrap();
        let pause_at = rng.u64(0..64);

        let mut events = pump_seconds(&mut runner, &test.clock, pause_at).unwrap();
        events.extend(runner.pause().unwrap());
        events.extend(runner.tick(Duration::from_secs(30)).unwrap());
        events.extend(runner.resume().unwrap());
        events.extend(pump_seconds(&mut runner, &test.clock, 64 - pause_at).unwrap());

        let stream: Vec<PhaseEvent> = phase_events(&events)
            .into_iter()
            .filter(|e| !e.is_marker())
            .collect();
        assert_eq!(stream, baseline, "pause at t={pause_at}");
        assert_eq!(runner.status(), Some(InstanceStatus::Completed));
    }
}

// ============================================================================
// Multi-element sessions
// ============================================================================

#[test]
fn test_abort_during_second_element() {
    let test = TestContext::new();
    let mut runner = runner("four-step", &test);
    runner.start().unwrap();
    pump_seconds(&mut runner, &test.clock, 15).unwrap();

    let aborted_at = test.clock.now();
    runner.abort(AbandonReason::UserStopped).unwrap();

    let snapshot = runner.snapshot().unwrap();
    assert_eq!(snapshot.status, InstanceStatus::Abandoned);
    assert_eq!(snapshot.current_element_index, 1);
    assert_eq!(snapshot.completed_elements, vec![ElementId::new("e0")]);
    assert_eq!(snapshot.completed_at, Some(aborted_at));
    assert_eq!(snapshot.abandon_reason, Some(AbandonReason::UserStopped));

    let outcome = runner.outcome().unwrap();
    assert_eq!(outcome.instance, *snapshot);
    assert_eq!(test.sink.last_snapshot().as_ref(), Some(snapshot));
}

#[test]
fn test_skipping_mandatory_element_annotates_but_completes() {
    let test = TestContext::new();
    let mut runner = runner("four-step", &test);
    runner.start().unwrap();
    runner.skip().unwrap();
    pump_seconds(&mut runner, &test.clock, 30).unwrap();

    assert_eq!(runner.status(), Some(InstanceStatus::Completed));
    let snapshot = runner.snapshot().unwrap();
    assert_eq!(snapshot.completed_elements.len(), 4);
    assert_eq!(snapshot.skipped_elements, vec![ElementId::new("e0")]);

    let outcome = runner.outcome().unwrap();
    assert!(outcome.flagged);
    assert_eq!(outcome.policy_violations().count(), 1);
}

#[test]
fn test_effectiveness_delta_from_ratings() {
    let test = TestContext::new();
    let mut runner = runner("four-step", &test);
    runner.record_craving_before(9).unwrap();
    runner.record_mood_before("anxious").unwrap();
    runner.start().unwrap();
    pump_seconds(&mut runner, &test.clock, 40).unwrap();
    assert_eq!(runner.outcome().unwrap().effectiveness_delta, None);

    runner.record_craving_after(3).unwrap();
    runner.record_mood_after("calm").unwrap();
    let outcome = runner.outcome().unwrap();
    assert_eq!(outcome.effectiveness_delta, Some(6));
    assert_eq!(outcome.instance.measurements.mood_before.as_deref(), Some("anxious"));
    assert_eq!(outcome.instance.measurements.mood_after.as_deref(), Some("calm"));
}

#[test]
fn test_repetition_workout_waits_for_bouts() {
    let test = TestContext::new();
    let mut runner = runner("workout", &test);
    runner.start().unwrap();

    // Work bouts never time out on their own.
    pump_seconds(&mut runner, &test.clock, 120).unwrap();
    assert_eq!(runner.snapshot().unwrap().current_element_index, 0);

    runner.complete_bout().unwrap();
    assert_eq!(runner.status(), Some(InstanceStatus::InProgress));
    pump_seconds(&mut runner, &test.clock, 5).unwrap();
    runner.complete_bout().unwrap();
    pump_seconds(&mut runner, &test.clock, 5).unwrap();
    let events = runner.complete_bout().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::ElementStarted { index: 1, .. }
    )));

    // Optional stretch skipped: no violation.
    runner.skip().unwrap();
    assert_eq!(runner.status(), Some(InstanceStatus::Completed));
    assert!(!runner.outcome().unwrap().flagged);
}

#[test]
fn test_every_transition_reaches_the_sink() {
    let test = TestContext::new();
    let mut runner = runner("four-step", &test);
    runner.start().unwrap();
    pump_seconds(&mut runner, &test.clock, 5).unwrap();
    runner.pause().unwrap();
    runner.resume().unwrap();
    pump_seconds(&mut runner, &test.clock, 35).unwrap();

    let kinds = test.sink.kinds();
    assert_eq!(kinds.first(), Some(&TransitionKind::Started));
    assert_eq!(kinds.last(), Some(&TransitionKind::Completed));
    assert!(kinds.contains(&TransitionKind::Paused));
    assert_eq!(
        kinds
            .iter()
            .filter(|k| matches!(k, TransitionKind::ElementEnded { .. }))
            .count(),
        4
    );
    let statuses = test.sink.statuses();
    assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
}

#[test]
fn test_pause_timeout_from_config() {
    let config = EngineConfig::from_json_str(r#"{"pauseTimeoutSeconds": 10}"#).unwrap();
    let test = TestContext::with_config(config);
    let mut runner = runner("four-step", &test);
    runner.start().unwrap();
    runner.pause().unwrap();
    pump_seconds(&mut runner, &test.clock, 11).unwrap();
    assert_eq!(runner.status(), Some(InstanceStatus::Abandoned));
    assert_eq!(
        runner.snapshot().unwrap().abandon_reason,
        Some(AbandonReason::Timeout)
    );
}

#[test]
fn test_sub_second_ticks_accumulate() {
    let test = TestContext::new();
    let mut runner = runner("four-step", &test);
    runner.start().unwrap();
    for _ in 0..39 {
        runner.tick(Duration::from_millis(250)).unwrap();
    }
    // 9.75s: first element still running
    assert_eq!(runner.snapshot().unwrap().current_element_index, 0);
    runner.tick(Duration::from_millis(250)).unwrap();
    assert_eq!(runner.snapshot().unwrap().current_element_index, 1);
}
