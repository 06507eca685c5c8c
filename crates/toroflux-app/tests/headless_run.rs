use std::fs;

use tempfile::tempdir;
use toroflux_app::{
    CommandSchedule, ConfigOverrides, ControlCommand, RunReport, load_config, run_headless,
};
use toroflux_core::{TorofluxConfig, WorldState};

fn small_world(seed: u64) -> WorldState {
    WorldState::new(TorofluxConfig {
        resolution: 12,
        agent_count: 6,
        rng_seed: Some(seed),
        ..TorofluxConfig::default()
    })
    .expect("world")
}

#[test]
fn report_records_every_frame_and_scheduled_commands() {
    let mut world = small_world(42);
    let mut schedule = CommandSchedule::new();
    schedule.schedule(5, ControlCommand::TriggerFlood);
    schedule.schedule(20, ControlCommand::Reset);

    let report = run_headless(&mut world, 30, &mut schedule).expect("run");

    assert_eq!(report.initial.frame, 0);
    assert_eq!(report.initial.tick, 0);
    assert_eq!(report.frames.len(), 30);
    assert_eq!(report.summary.frame_count, 30);
    assert_eq!(report.summary.floods_triggered, 1);
    assert_eq!(report.summary.resets, 1);
    assert!(schedule.is_empty());

    // Frames 5..=19 run under the flood; the reset before frame 20 clears it.
    assert!(report.frames[3].flood_intensity.is_none());
    assert!(report.frames[4].flood_intensity.is_some());
    assert!(report.frames[18].flood_intensity.is_some());
    assert!(report.frames[19].flood_intensity.is_none());
    assert_eq!(report.summary.flooded_frames, 15);

    // The world clock restarts after the reset while frame numbering does not.
    assert_eq!(report.frames[19].frame, 20);
    assert_eq!(report.frames[19].tick, 1);
    assert_eq!(report.summary.final_state.ticks, 11);
    assert!(report.summary.circulation_min <= report.summary.circulation_mean);
    assert!(report.summary.circulation_mean <= report.summary.circulation_max);
}

#[test]
fn seeded_runs_produce_identical_reports() {
    let run = |seed| {
        let mut world = small_world(seed);
        let mut schedule = CommandSchedule::new();
        schedule.schedule(3, ControlCommand::TriggerFlood);
        run_headless(&mut world, 12, &mut schedule).expect("run")
    };
    let a = run(7);
    let b = run(7);
    assert_eq!(a.frames, b.frames);
    assert_eq!(a.summary.final_state, b.summary.final_state);
}

#[test]
fn report_writes_pretty_json_into_nested_dir() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("reports").join("run.json");

    let mut world = small_world(3);
    let report = run_headless(&mut world, 8, &mut CommandSchedule::new()).expect("run");
    report.write_json(&path).expect("write report");

    let raw = fs::read_to_string(&path).expect("read report");
    assert!(raw.contains('\n'), "report should be pretty-printed");
    let parsed: RunReport = serde_json::from_str(&raw).expect("parse report");
    assert_eq!(parsed.frames.len(), 8);
    assert_eq!(parsed.summary.final_state.ticks, 8);
    assert_eq!(parsed.frames[7].tick, 8);
}

#[test]
fn config_file_and_overrides_combine() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"resolution": 10, "agent_count": 3, "flood": {"decay_rate": 0.5}}"#,
    )
    .expect("write config");

    let mut config = load_config(Some(&path)).expect("load config");
    assert_eq!(config.resolution, 10);
    assert_eq!(config.flood.decay_rate, 0.5);
    ConfigOverrides {
        agents: Some(5),
        seed: Some(1),
        ..ConfigOverrides::default()
    }
    .apply(&mut config);

    let world = WorldState::new(config).expect("world");
    assert_eq!(world.agent_count(), 5);
    assert_eq!(world.field().resolution(), 10);
}

#[test]
fn malformed_config_is_reported_with_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").expect("write config");
    let err = load_config(Some(&path)).expect_err("parse failure");
    assert!(format!("{err:#}").contains("broken.json"));
}

#[test]
fn late_commands_are_left_unapplied() {
    let mut world = small_world(5);
    let mut schedule = CommandSchedule::new();
    schedule.schedule(50, ControlCommand::TriggerFlood);
    let report = run_headless(&mut world, 10, &mut schedule).expect("run");
    assert_eq!(report.summary.floods_triggered, 0);
    assert_eq!(schedule.len(), 1);
}
