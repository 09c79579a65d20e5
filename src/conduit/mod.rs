mod app;
pub mod bindings;
pub mod command;
pub mod planner;

pub use app::ConduitApp;
