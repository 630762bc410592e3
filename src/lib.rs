pub mod code_gen;
pub mod config;
pub mod event_log;
pub mod kv;
pub mod mapping_store;
pub mod model;
pub mod url_service;
pub mod validation;
