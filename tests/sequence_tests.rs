//! Task file and settings file handling
//!
//! These tests verify:
//! - Both delay encodings parse to the same step
//! - Unrecognized records are kept in place
//! - Files on disk load and save in the `actions:` shape

use std::fs;

use tempfile::TempDir;

use steamctl::{
    Action, ActionKind, ConfigError, Delay, DelayUnit, DeviceRef, DeviceRegistry, EngineError,
    Level, Polarity, Sequence, SequenceEntry, Settings, Step, StepError, check_sequence,
};

const SETTINGS: &str = r#"
settings:
  gpio:
    Steam: 17
    Hotwater: 27
    Vacuum: 22
  daemon:
    host: 10.10.23.231
  polarity: active_low
"#;

const TASK: &str = r#"
actions:
  - type: action
    action_type: start
    device: Steam
    level: med
  - type: delay
    amount: 5
    unit: seconds
  - "2m"
  - type: action
    action_type: stop
    device: All
"#;

// =============================================================================
// Settings
// =============================================================================

#[test]
fn test_settings_file_roundtrip_through_registry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.yaml");
    fs::write(&path, SETTINGS).unwrap();

    let settings = Settings::load_from_file(&path).unwrap();
    assert_eq!(settings.daemon.host, "10.10.23.231");
    assert_eq!(settings.daemon.port, 8888);
    assert_eq!(settings.polarity, Polarity::ActiveLow);

    let registry = DeviceRegistry::load(&settings).unwrap();
    let names: Vec<_> = registry
        .devices()
        .iter()
        .map(|d| d.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["Steam", "Hotwater", "Vacuum"]);
}

#[test]
fn test_missing_settings_file() {
    let dir = TempDir::new().unwrap();
    let err = Settings::load_from_file(dir.path().join("nope.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Missing { .. }));
}

#[test]
fn test_settings_without_gpio_block() {
    for text in ["settings: {}\n", "other: 1\n", "settings: [\n"] {
        let err = Settings::from_yaml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)), "{text:?}");
    }
}

// =============================================================================
// Task files
// =============================================================================

#[test]
fn test_task_file_parses_every_encoding() {
    let seq = Sequence::from_yaml_str(TASK).unwrap();
    let steps: Vec<_> = seq.steps().cloned().collect();

    assert_eq!(
        steps,
        vec![
            Step::Action(Action::start(
                DeviceRef::Named("Steam".to_string()),
                Some(Level::Med)
            )),
            Step::Delay(Delay::new(5, DelayUnit::Seconds).unwrap()),
            Step::Delay(Delay::new(2, DelayUnit::Minutes).unwrap()),
            Step::Action(Action::stop(DeviceRef::All)),
        ]
    );
    assert_eq!(seq.total_delay_seconds(), 125);
}

#[test]
fn test_legacy_and_structured_delays_agree() {
    let legacy = Sequence::from_yaml_str("- \"5m\"\n- \"30s\"\n").unwrap();
    let structured = Sequence::from_yaml_str(
        "actions:\n  - {type: delay, amount: 5, unit: min}\n  - {type: delay, amount: 30}\n",
    )
    .unwrap();
    assert_eq!(legacy, structured);

    let legacy_amount = Sequence::from_yaml_str("- {type: delay, amount: \"5m\"}\n").unwrap();
    assert_eq!(
        legacy_amount.steps().next(),
        Some(&Step::Delay(Delay::new(5, DelayUnit::Minutes).unwrap()))
    );
}

#[test]
fn test_json_task_is_accepted() {
    let seq = Sequence::from_yaml_str(
        r#"{"actions": [{"type": "action", "action_type": "start", "device": "vacuum"}]}"#,
    )
    .unwrap();
    match seq.steps().next() {
        Some(Step::Action(action)) => {
            assert_eq!(action.kind, ActionKind::Start);
            assert_eq!(action.intensity(), 255);
        }
        other => panic!("Expected action, got {:?}", other),
    }
}

#[test]
fn test_unrecognized_records_keep_their_position() {
    let seq = Sequence::from_yaml_str(
        r#"
actions:
  - {type: pause, amount: 3}
  - {type: action, action_type: start, device: Steam}
  - {type: delay, unit: min}
  - {type: delay, amount: 0}
  - {type: action, action_type: toggle, device: Steam}
  - {type: action, action_type: stop}
  - 42
"#,
    )
    .unwrap();

    assert_eq!(seq.len(), 7);
    let unrecognized: Vec<_> = seq
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, SequenceEntry::Unrecognized(StepError::UnknownStep { .. })))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(unrecognized, vec![0, 3, 4, 5, 6]);

    // A delay with no amount waits one unit
    assert!(matches!(
        &seq.entries()[2],
        SequenceEntry::Step(Step::Delay(d)) if *d == Delay::new(1, DelayUnit::Minutes).unwrap()
    ));
}

#[test]
fn test_unknown_level_and_unit_fall_back() {
    let seq = Sequence::from_yaml_str(
        r#"
- {type: action, action_type: start, device: Steam, level: turbo}
- {type: delay, amount: 7, unit: fortnights}
- {type: action, action_type: stop, device: Steam, level: min}
"#,
    )
    .unwrap();
    let steps: Vec<_> = seq.steps().cloned().collect();

    assert_eq!(
        steps,
        vec![
            Step::Action(Action::start(DeviceRef::Named("Steam".to_string()), None)),
            Step::Delay(Delay::new(7, DelayUnit::Seconds).unwrap()),
            Step::Action(Action::stop(DeviceRef::Named("Steam".to_string()))),
        ]
    );
}

#[test]
fn test_wrong_document_shape_is_an_error() {
    assert!(matches!(
        Sequence::from_yaml_str("actions: 5\n"),
        Err(EngineError::Task(_))
    ));
    assert!(matches!(
        Sequence::from_yaml_str("\"just text\"\n"),
        Err(EngineError::Task(_))
    ));
    assert!(Sequence::from_yaml_str("actions:\n").unwrap().is_empty());
}

#[test]
fn test_save_then_load_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks").join("c1.yaml");

    let original = Sequence::from_yaml_str(TASK).unwrap();
    original.save_to_file(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("actions:"));
    assert!(text.contains("action_type: start"));
    assert!(text.contains("unit: min"));

    let loaded = Sequence::load_from_file(&path).unwrap();
    assert_eq!(loaded, original);
}

#[test]
fn test_missing_task_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Sequence::load_from_file(dir.path().join("c9.yaml")),
        Err(EngineError::Io(_))
    ));
}

#[test]
fn test_check_sequence_against_settings() {
    let settings = Settings::from_yaml_str(SETTINGS).unwrap();
    let registry = DeviceRegistry::load(&settings).unwrap();
    let seq = Sequence::from_yaml_str(
        r#"
- {type: action, action_type: start, device: STEAM}
- {type: action, action_type: start, device: Kettle}
- {type: delay, amount: 1}
- {type: action, action_type: stop, device: all}
"#,
    )
    .unwrap();

    let problems = check_sequence(&seq, &registry);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].0, 1);
    assert_eq!(problems[0].1.kind(), "unknown_device");
}
