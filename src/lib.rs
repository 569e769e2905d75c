pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod input;
pub mod ledger;
pub mod logging;
pub mod mapping;
pub mod osdf;
pub mod output;
pub mod query;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod retrieve;
pub mod sink;
pub mod submit;
