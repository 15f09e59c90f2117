pub mod commands;
pub mod progress;
pub mod ui;
pub mod util;

pub use progress::ConsoleProgress;
pub use util::{CommandContext, load_config, non_blank};
