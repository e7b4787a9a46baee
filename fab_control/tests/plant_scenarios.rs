//! Plant scenarios over the simulated bus, loaded from a config directory.
//!
//! Verifies:
//! 1. A conveyor line runs to its stop sensor and ends with every station free.
//! 2. A sensor timeout stops the motor, parks the line in PROBLEM and the
//!    line finishes after an operator resume.
//! 3. Two lines on sibling stations never drive their machines at once.

use fab_common::io::bus::{IoBus, IoValue};
use fab_common::station::{LineId, StationId, StationStatus};
use fab_control::config::ConfigDir;
use fab_control::line::LineStatus;
use fab_control::plant::Plant;
use fab_hal::{SimBus, SimDriver};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

const CONFIG: &str = r#"
[shared]
service_name = "fab-test"

[timing]
line_tick_ms = 5
sim_period_ms = 1
"#;

struct Rig {
    _dir: TempDir,
    _driver: SimDriver,
    bus: Arc<SimBus>,
    plant: Plant,
}

fn rig(io: &str, plant: &str) -> Rig {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.toml"), CONFIG).unwrap();
    fs::write(dir.path().join("io.toml"), io).unwrap();
    fs::write(dir.path().join("plant.toml"), plant).unwrap();

    let config = ConfigDir::load(dir.path()).unwrap();
    let bus = Arc::new(SimBus::new(&config.io).unwrap());
    let driver = SimDriver::start(Arc::clone(&bus), config.app.timing.sim_period());
    let plant = Plant::from_config_dir(&config, Arc::clone(&bus) as Arc<dyn IoBus>).unwrap();
    Rig {
        _dir: dir,
        _driver: driver,
        bus,
        plant,
    }
}

fn wait_for(what: &str, limit: Duration, done: impl Fn() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < limit, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// (on, off) times of every run of an output.
fn runs(bus: &SimBus, point: &str) -> Vec<(Duration, Duration)> {
    let history = bus.history(point);
    history
        .chunks(2)
        .filter_map(|pair| match pair {
            [on, off] if on.value.as_bool() && !off.value.as_bool() => Some((on.at, off.at)),
            _ => None,
        })
        .collect()
}

const CONVEYOR_IO: &str = r#"
[[points]]
name = "CB1_FWD"
type = "do"

[[points]]
name = "CB1_BWD"
type = "do"

[[points]]
name = "CB1_END"
type = "di"
initial = true
"#;

const CONVEYOR_PLANT: &str = r#"
[[stations]]
name = "CB1"

[machines.cb1]
kind = "conveyor"
station = "CB1"
motor = "CB1"
sensors = [{ name = "CB1_END", kind = "light_barrier" }]

[[lines]]
name = "main"
start_at = "feed"

[[lines.steps]]
name = "feed"
machine = "cb1"
op = { kind = "run_to_stop_sensor", direction = "FWD", sensor = "CB1_END", timeout_ms = TIMEOUT }
finish = true
"#;

// ─── Test 1: conveyor runs to its stop sensor ───────────────────────

#[test]
fn conveyor_line_runs_to_stop_sensor() {
    let io = format!(
        "{CONVEYOR_IO}
[[reactions]]
output = \"CB1_FWD\"
trigger = true
delay_s = 0.3
input = \"CB1_END\"
result = false
"
    );
    let mut rig = rig(&io, &CONVEYOR_PLANT.replace("TIMEOUT", "1000"));
    rig.plant.start().unwrap();
    wait_for("line end", Duration::from_secs(3), || rig.plant.is_finished());

    let main = LineId::from("main");
    assert_eq!(rig.plant.line_status(&main), Some(LineStatus::End));
    let runs = runs(&rig.bus, "CB1_FWD");
    assert_eq!(runs.len(), 1);
    let (on, off) = runs[0];
    assert!(off - on >= Duration::from_millis(290), "ran {:?}", off - on);
    assert!(off - on < Duration::from_millis(900), "ran {:?}", off - on);
    assert_eq!(rig.plant.snapshot().held().count(), 0);
    rig.plant.shutdown();
}

// ─── Test 2: timeout, cleanup, resume ───────────────────────────────

#[test]
fn sensor_timeout_stops_motor_until_resume() {
    let mut rig = rig(CONVEYOR_IO, &CONVEYOR_PLANT.replace("TIMEOUT", "100"));
    let main = LineId::from("main");
    rig.plant.start().unwrap();
    wait_for("line problem", Duration::from_secs(2), || {
        rig.plant.line_status(&main) == Some(LineStatus::Problem)
    });

    // Motor stopped by the failed operation itself.
    assert_eq!(runs(&rig.bus, "CB1_FWD").len(), 1);
    assert!(!rig.bus.read_bool("CB1_FWD").unwrap());
    assert_eq!(
        rig.plant.registry().status(&StationId::from("CB1")),
        Some(StationStatus::Problem)
    );
    let snapshot = rig.plant.snapshot();
    let line = snapshot.line("main").unwrap();
    assert!(line.error.as_deref().unwrap_or_default().contains("CB1_END"));

    // Operator puts the product in place and resumes.
    rig.bus.inject("CB1_END", IoValue::Bool(false)).unwrap();
    rig.plant.resume(&main).unwrap();
    wait_for("line end", Duration::from_secs(2), || rig.plant.is_finished());
    assert_eq!(rig.plant.line_status(&main), Some(LineStatus::End));
    // Product already at the sensor: no second run.
    assert_eq!(runs(&rig.bus, "CB1_FWD").len(), 1);
    rig.plant.shutdown();
}

// ─── Test 3: sibling stations are exclusive ─────────────────────────

#[test]
fn sibling_stations_serialize_two_lines() {
    let io = r#"
[[points]]
name = "CA_FWD"
type = "do"

[[points]]
name = "CA_BWD"
type = "do"

[[points]]
name = "CB_FWD"
type = "do"

[[points]]
name = "CB_BWD"
type = "do"
"#;
    let plant = r#"
[[stations]]
name = "GR_A"
group = "GR"

[[stations]]
name = "GR_B"
group = "GR"

[machines.ca]
kind = "conveyor"
station = "GR_A"
motor = "CA"

[machines.cb]
kind = "conveyor"
station = "GR_B"
motor = "CB"

[[lines]]
name = "x"
start_at = "run"

[[lines.steps]]
name = "run"
machine = "ca"
op = { kind = "run_for_time", direction = "FWD", duration_ms = 80 }
finish = true

[[lines]]
name = "y"
start_at = "run"

[[lines.steps]]
name = "run"
machine = "cb"
op = { kind = "run_for_time", direction = "FWD", duration_ms = 80 }
finish = true
"#;
    let mut rig = rig(io, plant);
    rig.plant.start().unwrap();
    wait_for("both lines", Duration::from_secs(3), || rig.plant.is_finished());

    let a = runs(&rig.bus, "CA_FWD");
    let b = runs(&rig.bus, "CB_FWD");
    assert_eq!((a.len(), b.len()), (1, 1));
    let ((a_on, a_off), (b_on, b_off)) = (a[0], b[0]);
    assert!(a_off <= b_on || b_off <= a_on, "overlap: {a:?} {b:?}");
    assert_eq!(rig.plant.snapshot().held().count(), 0);
    rig.plant.shutdown();
}
