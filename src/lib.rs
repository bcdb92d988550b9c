pub mod action;
pub mod actuator;
pub mod config;
pub mod face;
pub mod gait;
pub mod gesture;
pub mod joint;
pub mod messages;
pub mod runtime;
