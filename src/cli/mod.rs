pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod execute;
pub mod interactive;
pub mod runtime;
