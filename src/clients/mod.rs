// src/clients/mod.rs

pub mod autocomplete;
pub mod crawl;
pub mod vinfast;
