pub mod blob;
pub mod commands;
pub mod events;
pub mod history;
pub mod models;
pub mod selection;
pub mod session;

pub use blob::ImageBlob;
pub use history::EditHistory;
pub use selection::{Hotspot, PercentGeometry, Region, Selection};
