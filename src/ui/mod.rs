pub mod app;
pub mod render;
pub mod state;

pub use app::ChatApp;
pub use state::{ChatState, Timeline, merge};
