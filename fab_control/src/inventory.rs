//! Warehouse bay inventory.
//!
//! A 3×3 rack persisted as JSON:
//!
//! ```json
//! {"bays": [["RED", "Empty", "Carrier"],
//!           ["Empty", "WHITE", "Empty"],
//!           ["BLUE", "Empty", "Empty"]]}
//! ```
//!
//! Rows are listed top to bottom, columns left to right. A change
//! re-reads the file, updates the one bay and writes a temporary file
//! that is renamed over the inventory file. Warehouses of one rack share
//! a single [`SharedInventory`].

use fab_common::error::FactoryError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Rack size in both directions.
pub const RACK_SIZE: usize = 3;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("inventory {} is malformed: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no empty bay left")]
    NoEmptyBay,

    #[error("no bay holds {0}")]
    NotFound(BayContent),

    #[error("bay ({row}, {col}) is outside the rack")]
    InvalidBay { row: usize, col: usize },
}

impl From<InventoryError> for FactoryError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::InvalidBay { .. } => FactoryError::InvalidValue(e.to_string()),
            other => FactoryError::Inventory(other.to_string()),
        }
    }
}

/// Content of one bay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BayContent {
    #[default]
    Empty,
    /// An empty carrier without product.
    Carrier,
    /// A carrier holding a product of this colour.
    Product(String),
}

impl From<String> for BayContent {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Empty" => Self::Empty,
            "Carrier" => Self::Carrier,
            _ => Self::Product(s),
        }
    }
}

impl From<BayContent> for String {
    fn from(c: BayContent) -> Self {
        match c {
            BayContent::Empty => "Empty".to_string(),
            BayContent::Carrier => "Carrier".to_string(),
            BayContent::Product(color) => color,
        }
    }
}

impl fmt::Display for BayContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Carrier => f.write_str("Carrier"),
            Self::Product(color) => write!(f, "product {color}"),
        }
    }
}

/// Bay coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bay {
    pub row: usize,
    pub col: usize,
}

impl Bay {
    pub fn new(row: usize, col: usize) -> Result<Self, InventoryError> {
        if row >= RACK_SIZE || col >= RACK_SIZE {
            return Err(InventoryError::InvalidBay { row, col });
        }
        Ok(Self { row, col })
    }

    /// All bays in search order.
    pub fn all() -> impl Iterator<Item = Bay> {
        (0..RACK_SIZE).flat_map(|row| (0..RACK_SIZE).map(move |col| Bay { row, col }))
    }
}

impl fmt::Display for Bay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

type Rack = [[BayContent; RACK_SIZE]; RACK_SIZE];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct InventoryFile {
    bays: Rack,
}

/// One rack, shared by every warehouse controller built for it.
pub type SharedInventory = Arc<Mutex<Inventory>>;

fn read_rack(path: &Path) -> Result<Rack, InventoryError> {
    let content = fs::read_to_string(path).map_err(|source| InventoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: InventoryFile =
        serde_json::from_str(&content).map_err(|source| InventoryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(file.bays)
}

fn write_rack(path: &Path, bays: &Rack) -> Result<(), InventoryError> {
    let io_err = |source| InventoryError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = InventoryFile { bays: bays.clone() };
    let json = serde_json::to_string_pretty(&file).map_err(|source| InventoryError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let mut temp = path.to_path_buf().into_os_string();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, json).map_err(io_err)?;
    fs::rename(&temp, path).map_err(io_err)?;
    debug!("inventory saved to {}", path.display());
    Ok(())
}

/// Persistent rack content.
#[derive(Debug, Clone)]
pub struct Inventory {
    path: PathBuf,
    bays: Rack,
}

impl Inventory {
    /// Read the inventory file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, InventoryError> {
        let path = path.into();
        let bays = read_rack(&path)?;
        info!("inventory loaded from {}", path.display());
        Ok(Self { path, bays })
    }

    /// Load `path` into a rack handle that can be shared.
    pub fn load_shared(path: impl Into<PathBuf>) -> Result<SharedInventory, InventoryError> {
        Self::load(path).map(|inv| Arc::new(Mutex::new(inv)))
    }

    /// Empty rack bound to `path`, not yet written.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bays: Default::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the rack atomically.
    pub fn save(&self) -> Result<(), InventoryError> {
        write_rack(&self.path, &self.bays)
    }

    pub fn get(&self, bay: Bay) -> &BayContent {
        &self.bays[bay.row][bay.col]
    }

    /// Change one bay and persist it.
    ///
    /// Bays written by someone else since the last read are kept. The
    /// in-memory rack only changes once the file is written.
    pub fn set(&mut self, bay: Bay, content: BayContent) -> Result<(), InventoryError> {
        let mut bays = match read_rack(&self.path) {
            Ok(bays) => bays,
            Err(InventoryError::Io { ref source, .. })
                if source.kind() == io::ErrorKind::NotFound =>
            {
                self.bays.clone()
            }
            Err(e) => return Err(e),
        };
        info!("bay {bay}: {} -> {content}", bays[bay.row][bay.col]);
        bays[bay.row][bay.col] = content;
        write_rack(&self.path, &bays)?;
        self.bays = bays;
        Ok(())
    }

    /// First bay holding `content`.
    pub fn find(&self, content: &BayContent) -> Option<Bay> {
        Bay::all().find(|b| self.get(*b) == content)
    }

    /// Bay that receives the next stored item.
    pub fn free_bay(&self) -> Result<Bay, InventoryError> {
        self.find(&BayContent::Empty).ok_or(InventoryError::NoEmptyBay)
    }

    /// Bay holding a product of `color`.
    pub fn product_bay(&self, color: &str) -> Result<Bay, InventoryError> {
        let wanted = BayContent::Product(color.to_string());
        self.find(&wanted).ok_or(InventoryError::NotFound(wanted))
    }

    /// Bay holding an empty carrier.
    pub fn carrier_bay(&self) -> Result<Bay, InventoryError> {
        self.find(&BayContent::Carrier)
            .ok_or(InventoryError::NotFound(BayContent::Carrier))
    }

    /// Number of bays holding `content`.
    pub fn count(&self, content: &BayContent) -> usize {
        Bay::all().filter(|b| self.get(*b) == content).count()
    }
}
