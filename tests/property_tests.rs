//! Property-based tests for steamctl
//!
//! These tests verify:
//! - Level mapping and delay conversion are total and fixed
//! - Device resolution ignores case
//! - Every step of a sequence is visited once, in order

use proptest::prelude::*;
use strum::IntoEnumIterator;

use steamctl::{
    Action, Delay, DelayUnit, DeviceRef, DeviceRegistry, Engine, Level, MemoryDriver, Polarity,
    Sequence, Step,
};

const NAMES: [&str; 4] = ["Steam", "Hotwater", "Vacuum", "Extract"];
const CHANNELS: [u32; 4] = [17, 27, 22, 23];

fn registry() -> DeviceRegistry {
    DeviceRegistry::from_pairs(NAMES.iter().copied().zip(CHANNELS)).unwrap()
}

/// Strategy for generating Level variants
fn level_strategy() -> impl Strategy<Value = Level> {
    prop_oneof![Just(Level::Min), Just(Level::Med), Just(Level::Max)]
}

fn unit_strategy() -> impl Strategy<Value = DelayUnit> {
    prop_oneof![
        Just(DelayUnit::Seconds),
        Just(DelayUnit::Minutes),
        Just(DelayUnit::Hours),
    ]
}

/// Random capitalisation of a string
fn recase(name: &str, mask: u64) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if mask & (1 << (i % 64)) != 0 {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

/// Action steps only, so sequences run instantly
fn action_strategy() -> impl Strategy<Value = Step> {
    (0..NAMES.len() + 1, any::<bool>(), proptest::option::of(level_strategy())).prop_map(
        |(device, is_start, level)| {
            let device = NAMES
                .get(device)
                .map_or(DeviceRef::All, |name| DeviceRef::parse(name));
            if is_start {
                Step::Action(Action::start(device, level))
            } else {
                Step::Action(Action::stop(device))
            }
        },
    )
}

proptest! {
    /// Level: Display -> parse round-trip, any capitalisation
    #[test]
    fn level_parse_ignores_case(level in level_strategy(), mask in any::<u64>()) {
        let text = recase(&level.to_string(), mask);
        let parsed: Level = text.parse().expect("Should parse");
        prop_assert_eq!(parsed, level);
    }

    /// Delay: seconds are amount times the unit factor
    #[test]
    fn delay_conversion(amount in 1u64..100_000, unit in unit_strategy()) {
        let delay = Delay::new(amount, unit).expect("positive amount");
        let factor = match unit {
            DelayUnit::Seconds => 1,
            DelayUnit::Minutes => 60,
            DelayUnit::Hours => 3600,
        };
        prop_assert_eq!(delay.seconds(), amount * factor);
        prop_assert_eq!(delay.duration().as_secs(), amount * factor);
    }

    /// Delay: anything that is not a known prefix is seconds
    #[test]
    fn unknown_unit_is_seconds(unit in "[a-z]{1,12}") {
        prop_assume!(
            !unit.starts_with("sec") && !unit.starts_with("min") && !unit.starts_with("hour")
        );
        prop_assert_eq!(DelayUnit::parse_lenient(&unit), DelayUnit::Seconds);
    }

    /// Legacy "<n>s" / "<n>m" strings match the structured form
    #[test]
    fn legacy_delay_matches_structured(amount in 1u64..10_000, minutes in any::<bool>()) {
        let (suffix, unit) = if minutes { ("m", DelayUnit::Minutes) } else { ("s", DelayUnit::Seconds) };
        let legacy = Delay::parse_legacy(&format!("{}{}", amount, suffix));
        prop_assert_eq!(legacy, Delay::new(amount, unit));
    }

    /// Resolution: any capitalisation finds the same channel
    #[test]
    fn resolution_ignores_case(index in 0..NAMES.len(), mask in any::<u64>()) {
        let reg = registry();
        let name = recase(NAMES[index], mask);
        let found = reg.resolve(&DeviceRef::parse(&name)).expect("known device");
        prop_assert_eq!(found.len(), 1);
        prop_assert_eq!(found[0].channel, CHANNELS[index]);
    }

    /// "all" in any capitalisation fans out in registry order
    #[test]
    fn all_fans_out_in_order(mask in any::<u64>()) {
        let reg = registry();
        let device = DeviceRef::parse(&recase("all", mask));
        prop_assert_eq!(&device, &DeviceRef::All);
        let channels: Vec<_> = reg.resolve(&device).unwrap().iter().map(|d| d.channel).collect();
        prop_assert_eq!(channels, CHANNELS.to_vec());
    }

    /// Execution: each step visited once, in order, with the expected writes
    #[test]
    fn steps_visited_in_order(steps in proptest::collection::vec(action_strategy(), 0..20)) {
        let driver = MemoryDriver::new();
        let engine = Engine::with_driver(registry(), Box::new(driver.clone()), Polarity::ActiveHigh)
            .expect("engine");
        driver.clear_ops();

        let report = engine.execute(&Sequence::new(steps.clone())).expect("run");
        prop_assert!(report.is_success());
        let indexes: Vec<_> = report.steps.iter().map(|s| s.index).collect();
        prop_assert_eq!(indexes, (0..steps.len()).collect::<Vec<_>>());

        let mut expected = Vec::new();
        for step in &steps {
            if let Step::Action(action) = step {
                let targets: Vec<u32> = match &action.device {
                    DeviceRef::All => CHANNELS.to_vec(),
                    DeviceRef::Named(name) => {
                        let i = NAMES.iter().position(|n| *n == name.as_str()).expect("known name");
                        vec![CHANNELS[i]]
                    }
                };
                for channel in targets {
                    expected.push((channel, action.intensity()));
                }
            }
        }
        prop_assert_eq!(driver.writes(), expected);
    }

    /// Polarity: active-low writes are the inverse of the logical value
    #[test]
    fn polarity_inverse(intensity in any::<u8>()) {
        prop_assert_eq!(Polarity::ActiveLow.apply(intensity), 255 - intensity);
        prop_assert_eq!(Polarity::ActiveHigh.apply(intensity), intensity);
        prop_assert_eq!(Polarity::ActiveLow.apply(Polarity::ActiveLow.apply(intensity)), intensity);
    }
}

#[test]
fn level_table_is_fixed() {
    let table: Vec<_> = Level::iter().map(|l| (l.to_string(), l.intensity())).collect();
    assert_eq!(
        table,
        vec![
            ("min".to_string(), 85),
            ("med".to_string(), 170),
            ("max".to_string(), 255),
        ]
    );
    assert_eq!(Level::intensity_or_max(None), 255);
}
