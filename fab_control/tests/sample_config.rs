//! The shipped `config/` directory loads and resolves.

use fab_control::config::{ConfigDir, MachineConfig};
use fab_control::inventory::{BayContent, Inventory};
use fab_control::line::LineGraph;
use fab_control::machine::MachineKind;
use std::path::PathBuf;

fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../config")
}

#[test]
fn sample_plant_resolves() {
    let config = ConfigDir::load(&config_dir()).unwrap();
    assert_eq!(config.app.shared.service_name, "fab-plant-01");

    let kinds: Vec<MachineKind> = config.plant.machines.values().map(MachineConfig::kind).collect();
    assert!(kinds.contains(&MachineKind::Conveyor));
    assert!(kinds.contains(&MachineKind::Robot));
    assert!(kinds.contains(&MachineKind::Warehouse));

    for line in &config.plant.lines {
        let graph = LineGraph::resolve(line, &config.plant).unwrap();
        assert!(!graph.steps().is_empty(), "{}", line.name);
    }
}

#[test]
fn sample_inventory_has_products_to_retrieve() {
    let config = ConfigDir::load(&config_dir()).unwrap();
    let Some(MachineConfig::Warehouse(hbw)) = config.plant.machines.get("hbw") else {
        panic!("sample plant has no warehouse");
    };
    let inventory = Inventory::load(config.resolve(&hbw.inventory)).unwrap();
    assert!(inventory.product_bay("RED").is_ok());
    assert!(inventory.count(&BayContent::Empty) > 0);
}
