pub mod action;
pub mod api;
pub mod bash;
pub mod computer;
pub mod config;
pub mod context;
pub mod display;
pub mod editor;
pub mod mcp;
pub mod result;
pub mod scaling;
pub mod shell;
