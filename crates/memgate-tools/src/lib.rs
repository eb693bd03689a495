pub mod dispatch;
pub mod maps;
pub mod schema;
pub mod sticker;

pub use dispatch::{call_tool, list_tools, ToolContext};
pub use maps::MapsClient;
