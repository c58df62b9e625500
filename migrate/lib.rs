pub mod conn;
pub mod diff;
pub mod exec;
pub mod migration;
pub mod plan;
pub mod report;
pub mod store;
mod sql_writer;
