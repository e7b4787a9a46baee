//! High-bay warehouse crane.
//!
//! The crane has a horizontal and a vertical axis and a cantilever that
//! extends under a carrier. Every transfer is a pick followed by a place:
//!
//! ```text
//!  pick (h, v):   move (h, v)        extend   lift to v - lift   retract
//!  place (h, v):  move (h, v - lift) extend   lower to v         retract
//! ```
//!
//! The inventory is updated only after the physical transfer succeeded.

use crate::actuator::Actuator;
use crate::axis::Axis;
use crate::config::WarehouseConfig;
use crate::inventory::{Bay, BayContent, Inventory, SharedInventory};
use crate::machine::{MachineController, MachineKind, Operation, Outcome};
use crate::sensor::{CounterJumpPolicy, Sensor};
use crate::task::join_all;
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::io::bus::IoBus;
use fab_common::io::point::{Direction, SensorKind};
use fab_common::position::AxisKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::info;

/// Crane fork with front and back end switches.
#[derive(Debug)]
struct Cantilever {
    actuator: Actuator,
    front: Sensor,
    back: Sensor,
    timeout: Duration,
}

impl Cantilever {
    fn extend(&self) -> FactoryResult<()> {
        self.actuator
            .run_to_sensor(Direction::Fwd, &self.front, Duration::ZERO, self.timeout)
    }

    fn retract(&self) -> FactoryResult<()> {
        self.actuator
            .run_to_sensor(Direction::Bwd, &self.back, Duration::ZERO, self.timeout)
    }
}

/// Warehouse controller.
#[derive(Debug)]
pub struct Warehouse {
    name: String,
    horizontal: Arc<Axis>,
    vertical: Arc<Axis>,
    cantilever: Cantilever,
    columns: [i64; 3],
    rows: [i64; 3],
    conveyor: [i64; 2],
    lift: i64,
    inventory: SharedInventory,
    position: AtomicU32,
}

impl Warehouse {
    /// Build from configuration over an already loaded rack.
    pub fn from_config(
        bus: &Arc<dyn IoBus>,
        name: impl Into<String>,
        config: &WarehouseConfig,
        jump_policy: CounterJumpPolicy,
        inventory: SharedInventory,
    ) -> Self {
        let name = name.into();
        let c = &config.cantilever;
        Self {
            horizontal: Arc::new(Axis::from_config(
                bus,
                format!("{name}-hor"),
                &config.horizontal,
                jump_policy,
            )),
            vertical: Arc::new(Axis::from_config(
                bus,
                format!("{name}-ver"),
                &config.vertical,
                jump_policy,
            )),
            cantilever: Cantilever {
                actuator: Actuator::new(Arc::clone(bus), c.actuator.as_str()),
                front: Sensor::new(Arc::clone(bus), c.front.as_str(), SensorKind::RefSwitch),
                back: Sensor::new(Arc::clone(bus), c.back.as_str(), SensorKind::RefSwitch),
                timeout: Duration::from_millis(c.timeout_ms),
            },
            columns: config.columns,
            rows: config.rows,
            conveyor: config.conveyor,
            lift: config.lift,
            inventory,
            position: AtomicU32::new(0),
            name,
        }
    }

    /// Copy of the current rack content.
    pub fn inventory(&self) -> Inventory {
        self.inventory.lock().clone()
    }

    fn bay_position(&self, bay: Bay) -> (i64, i64) {
        (self.columns[bay.col], self.rows[bay.row])
    }

    fn move_to(&self, horizontal: i64, vertical: i64) -> FactoryResult<()> {
        let h = self.horizontal.spawn_move(Some(horizontal))?;
        let v = match self.vertical.spawn_move(Some(vertical)) {
            Ok(task) => task,
            Err(e) => {
                let _ = h.join();
                return Err(e);
            }
        };
        join_all(vec![h, v]).map(|_| ())
    }

    fn pick(&self, (h, v): (i64, i64)) -> FactoryResult<()> {
        self.move_to(h, v)?;
        self.cantilever.extend()?;
        self.vertical.move_to(Some(v - self.lift))?;
        self.cantilever.retract()
    }

    fn place(&self, (h, v): (i64, i64)) -> FactoryResult<()> {
        self.move_to(h, v - self.lift)?;
        self.cantilever.extend()?;
        self.vertical.move_to(Some(v))?;
        self.cantilever.retract()
    }

    fn conveyor_position(&self) -> (i64, i64) {
        (self.conveyor[0], self.conveyor[1])
    }

    /// Retract the cantilever and home both axes.
    pub fn init(&self, to_end: bool) -> FactoryResult<Outcome> {
        self.cantilever.retract()?;
        self.vertical.home()?;
        self.horizontal.home()?;
        info!("{}: initialized", self.name);
        Ok(if to_end { Outcome::End } else { Outcome::Continue })
    }

    /// Take the item on the conveyor into the first empty bay.
    fn store(&self, content: BayContent) -> FactoryResult<Bay> {
        let bay = self.inventory.lock().free_bay()?;
        info!("{}: storing {} in bay {}", self.name, content, bay);
        self.pick(self.conveyor_position())?;
        self.place(self.bay_position(bay))?;
        self.inventory.lock().set(bay, content)?;
        Ok(bay)
    }

    /// Bring the item of `content` to the conveyor.
    fn retrieve(&self, content: BayContent) -> FactoryResult<Bay> {
        let bay = {
            let inventory = self.inventory.lock();
            match &content {
                BayContent::Product(color) => inventory.product_bay(color)?,
                _ => inventory.carrier_bay()?,
            }
        };
        info!("{}: retrieving {} from bay {}", self.name, content, bay);
        self.pick(self.bay_position(bay))?;
        self.place(self.conveyor_position())?;
        self.inventory.lock().set(bay, BayContent::Empty)?;
        Ok(bay)
    }

    fn color<'a>(&self, color: &'a Option<String>, op: &Operation) -> FactoryResult<&'a str> {
        color.as_deref().ok_or_else(|| {
            FactoryError::Config(format!("{}: {op} needs a product colour", self.name))
        })
    }

    fn run(&self, op: &Operation) -> FactoryResult<Outcome> {
        match op {
            Operation::Init { to_end } => return self.init(*to_end),
            Operation::MoveAxis { axis, target } => match axis {
                AxisKind::Horizontal => self.horizontal.move_to(Some(*target))?,
                AxisKind::Vertical => self.vertical.move_to(Some(*target))?,
                AxisKind::Rotation => {
                    return Err(FactoryError::InvalidValue(format!(
                        "{} has no rotation axis",
                        self.name
                    )));
                }
            },
            Operation::Store { color } => {
                let color = self.color(color, op)?;
                self.store(BayContent::Product(color.to_string()))?;
            }
            Operation::Retrieve { color } => {
                let color = self.color(color, op)?;
                self.retrieve(BayContent::Product(color.to_string()))?;
            }
            Operation::StoreCarrier => {
                self.store(BayContent::Carrier)?;
            }
            Operation::RetrieveCarrier => {
                self.retrieve(BayContent::Carrier)?;
            }
            other => return Err(self.unsupported(other)),
        }
        Ok(Outcome::Continue)
    }
}

impl MachineController for Warehouse {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MachineKind {
        MachineKind::Warehouse
    }

    fn execute(&self, op: &Operation) -> FactoryResult<Outcome> {
        let outcome = self.run(op)?;
        if outcome == Outcome::Continue {
            self.position.fetch_add(1, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    fn position(&self) -> u32 {
        self.position.load(Ordering::SeqCst)
    }

    fn detail(&self) -> Option<String> {
        let inventory = self.inventory.lock();
        Some(format!(
            "{} empty, {} carriers",
            inventory.count(&BayContent::Empty),
            inventory.count(&BayContent::Carrier)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_hal::{SimBus, SimDriver};
    use std::fs;
    use tempfile::TempDir;

    const IO: &str = r#"
[[points]]
name = "WH_HOR_FWD"
type = "do"

[[points]]
name = "WH_HOR_BWD"
type = "do"

[[points]]
name = "WH_HOR_ENC"
type = "counter"

[[points]]
name = "WH_HOR_REF"
type = "di"

[[points]]
name = "WH_VER_DOWN"
type = "do"

[[points]]
name = "WH_VER_UP"
type = "do"

[[points]]
name = "WH_VER_ENC"
type = "counter"

[[points]]
name = "WH_VER_REF"
type = "di"

[[points]]
name = "WH_CANT_FWD"
type = "do"

[[points]]
name = "WH_CANT_BWD"
type = "do"

[[points]]
name = "WH_CANT_FRONT"
type = "di"

[[points]]
name = "WH_CANT_BACK"
type = "di"
initial = true

[[reactions]]
output = "WH_CANT_FWD"
trigger = true
delay_s = 0.01
input = "WH_CANT_FRONT"
result = true

[[reactions]]
output = "WH_CANT_FWD"
trigger = true
delay_s = 0.001
input = "WH_CANT_BACK"
result = false

[[reactions]]
output = "WH_CANT_BWD"
trigger = true
delay_s = 0.01
input = "WH_CANT_BACK"
result = true

[[reactions]]
output = "WH_CANT_BWD"
trigger = true
delay_s = 0.001
input = "WH_CANT_FRONT"
result = false

[[axes]]
name = "WH_HOR"
increase = "WH_HOR_FWD"
decrease = "WH_HOR_BWD"
encoder = "WH_HOR_ENC"
ref_switch = "WH_HOR_REF"
speed = 4.0
max = 1000.0

[[axes]]
name = "WH_VER"
increase = "WH_VER_DOWN"
decrease = "WH_VER_UP"
encoder = "WH_VER_ENC"
ref_switch = "WH_VER_REF"
speed = 4.0
max = 1000.0
"#;

    const WAREHOUSE: &str = r#"
station = "HBW"
horizontal = { actuator = "WH_HOR", encoder = "WH_HOR_ENC", ref_switch = "WH_HOR_REF", home = "BWD" }
vertical = { actuator = "WH_VER", encoder = "WH_VER_ENC", ref_switch = "WH_VER_REF", home = "UP" }
cantilever = { actuator = "WH_CANT", front = "WH_CANT_FRONT", back = "WH_CANT_BACK", timeout_ms = 500 }
columns = [100, 200, 300]
rows = [150, 250, 350]
conveyor = [450, 200]
lift = 80
inventory = "inventory.json"
"#;

    fn warehouse(dir: &TempDir, rack: &str) -> (Arc<SimBus>, SimDriver, Warehouse) {
        let path = dir.path().join("inventory.json");
        fs::write(&path, rack).unwrap();
        let bus = Arc::new(SimBus::from_toml(IO).unwrap());
        let driver = SimDriver::start(bus.clone(), Duration::from_millis(1));
        let config: WarehouseConfig = toml::from_str(WAREHOUSE).unwrap();
        let dyn_bus: Arc<dyn IoBus> = bus.clone();
        let inventory = Inventory::load_shared(path).unwrap();
        let wh = Warehouse::from_config(
            &dyn_bus,
            "hbw",
            &config,
            CounterJumpPolicy::Absorb,
            inventory,
        );
        (bus, driver, wh)
    }

    const RACK: &str = r#"{"bays": [["Carrier", "RED", "Empty"],
                                     ["Empty", "Empty", "Empty"],
                                     ["Empty", "Empty", "Empty"]]}"#;

    #[test]
    fn store_then_retrieve_updates_rack_after_motion() {
        let dir = TempDir::new().unwrap();
        let (bus, _driver, wh) = warehouse(&dir, RACK);
        wh.execute(&Operation::Init { to_end: false }).unwrap();

        wh.execute(&Operation::Store {
            color: Some("WHITE".into()),
        })
        .unwrap();
        let stored = Inventory::load(dir.path().join("inventory.json")).unwrap();
        assert_eq!(
            stored.get(Bay { row: 0, col: 2 }),
            &BayContent::Product("WHITE".into())
        );

        wh.execute(&Operation::Retrieve {
            color: Some("RED".into()),
        })
        .unwrap();
        let after = wh.inventory();
        assert_eq!(after.get(Bay { row: 0, col: 1 }), &BayContent::Empty);
        assert_eq!(wh.position(), 3);

        // Two transfers, each with two extend/retract cycles.
        let extends = bus
            .history("WH_CANT_FWD")
            .iter()
            .filter(|r| r.value.as_bool())
            .count();
        assert_eq!(extends, 4);
        assert!(bus.read_bool("WH_CANT_BACK").unwrap());
    }

    #[test]
    fn stored_product_comes_back_from_the_same_bay() {
        const NO_RED: &str = r#"{"bays": [["Carrier", "WHITE", "Empty"],
                                           ["BLUE", "Empty", "Empty"],
                                           ["Empty", "Empty", "Empty"]]}"#;
        let dir = TempDir::new().unwrap();
        let (_bus, _driver, wh) = warehouse(&dir, NO_RED);
        let path = dir.path().join("inventory.json");
        assert!(wh.inventory().product_bay("RED").is_err());

        let stored = wh.store(BayContent::Product("RED".into())).unwrap();
        assert_eq!(stored, Bay { row: 0, col: 2 });
        assert_eq!(
            Inventory::load(&path).unwrap().get(stored),
            &BayContent::Product("RED".into())
        );

        let retrieved = wh.retrieve(BayContent::Product("RED".into())).unwrap();
        assert_eq!(retrieved, stored);
        let disk = Inventory::load(&path).unwrap();
        assert_eq!(disk.get(stored), &BayContent::Empty);
        assert!(disk.product_bay("RED").is_err());
        assert_eq!(wh.inventory().get(stored), &BayContent::Empty);
    }

    #[test]
    fn carrier_round_trip() {
        let dir = TempDir::new().unwrap();
        let (_bus, _driver, wh) = warehouse(&dir, RACK);
        wh.execute(&Operation::RetrieveCarrier).unwrap();
        assert_eq!(wh.inventory().carrier_bay().ok(), None);
        wh.execute(&Operation::StoreCarrier).unwrap();
        assert_eq!(
            wh.inventory().carrier_bay().unwrap(),
            Bay { row: 0, col: 0 }
        );
    }

    #[test]
    fn failed_lookup_moves_nothing() {
        let dir = TempDir::new().unwrap();
        let (bus, _driver, wh) = warehouse(&dir, RACK);
        let err = wh
            .execute(&Operation::Retrieve {
                color: Some("BLUE".into()),
            })
            .unwrap_err();
        assert!(matches!(err, FactoryError::Inventory(_)));
        assert!(bus.writes().is_empty());
        assert!(matches!(
            wh.execute(&Operation::Store { color: None }),
            Err(FactoryError::Config(_))
        ));
        assert_eq!(wh.position(), 0);
    }

    #[test]
    fn rotation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (_bus, _driver, wh) = warehouse(&dir, RACK);
        let err = wh
            .execute(&Operation::MoveAxis {
                axis: AxisKind::Rotation,
                target: 100,
            })
            .unwrap_err();
        assert!(matches!(err, FactoryError::InvalidValue(_)));
        assert!(matches!(
            wh.execute(&Operation::GetProduct {
                vertical: 10,
                check_sensor: None
            }),
            Err(FactoryError::Unsupported { .. })
        ));
    }
}
