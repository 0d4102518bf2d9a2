//! Store façade and configuration
//!
//! ```ignore
//! use acstore::{OpenMode, Schema, Store};
//!
//! let mut store = Store::open("evidence.acs", OpenMode::Create, schema)?;
//! let mut entry = store.schema().create("file_entry")?;
//! entry.set_attribute("path", "/etc/passwd")?;
//! let id = store.write(&mut entry)?;
//! store.close()?;
//! ```

mod config;
mod facade;

pub use config::{ConfigError, ProfilingConfig, StoreConfig};
pub use facade::{ContainerScan, Store};
