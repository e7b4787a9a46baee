//! Machine controller construction.
//!
//! Lines never build controllers themselves: they ask a
//! [`ControllerFactory`] once the machine's station is claimed, so no
//! controller exists for a station its line does not own.
//!
//! Every warehouse built for one inventory file gets the same rack handle.

use crate::config::{MachineConfig, PlantConfig};
use crate::conveyor::Conveyor;
use crate::inventory::{Inventory, SharedInventory};
use crate::machine::MachineController;
use crate::robot::Robot3D;
use crate::sensor::CounterJumpPolicy;
use crate::warehouse::Warehouse;
use fab_common::error::{FactoryError, FactoryResult};
use fab_common::io::bus::IoBus;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Source of machine controllers.
pub trait ControllerFactory: Send + Sync {
    /// Build the controller of machine `name`.
    fn build(&self, name: &str) -> FactoryResult<Arc<dyn MachineController>>;
}

/// Builds controllers from `plant.toml` machine definitions.
pub struct MachineFactory {
    bus: Arc<dyn IoBus>,
    machines: BTreeMap<String, MachineConfig>,
    jump_policy: CounterJumpPolicy,
    base_dir: PathBuf,
    inventories: Mutex<HashMap<PathBuf, SharedInventory>>,
}

impl MachineFactory {
    /// `base_dir` resolves relative paths such as inventory files.
    pub fn new(bus: Arc<dyn IoBus>, plant: &PlantConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            machines: plant.machines.clone(),
            jump_policy: plant.counter_jump_policy,
            base_dir: base_dir.into(),
            inventories: Mutex::new(HashMap::new()),
        }
    }

    /// Rack of `path`, loaded on first use.
    fn inventory(&self, path: &Path) -> FactoryResult<SharedInventory> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        let mut inventories = self.inventories.lock();
        if let Some(inventory) = inventories.get(&path) {
            return Ok(Arc::clone(inventory));
        }
        let inventory = Inventory::load_shared(&path)?;
        inventories.insert(path, Arc::clone(&inventory));
        Ok(inventory)
    }
}

impl ControllerFactory for MachineFactory {
    fn build(&self, name: &str) -> FactoryResult<Arc<dyn MachineController>> {
        let config = self
            .machines
            .get(name)
            .ok_or_else(|| FactoryError::Config(format!("unknown machine {name}")))?;
        debug!("building {} controller {name}", config.kind());
        let controller: Arc<dyn MachineController> = match config {
            MachineConfig::Conveyor(c) => Arc::new(Conveyor::from_config(&self.bus, name, c)),
            MachineConfig::Robot(c) => {
                Arc::new(Robot3D::from_config(&self.bus, name, c, self.jump_policy))
            }
            MachineConfig::Warehouse(c) => Arc::new(Warehouse::from_config(
                &self.bus,
                name,
                c,
                self.jump_policy,
                self.inventory(&c.inventory)?,
            )),
        };
        Ok(controller)
    }
}

impl std::fmt::Debug for MachineFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineFactory")
            .field("machines", &self.machines.keys().collect::<Vec<_>>())
            .field("base_dir", &self.base_dir)
            .finish()
    }
}
