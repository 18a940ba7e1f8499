pub mod config;
pub mod mem_model;
pub mod top;
