// src/workers/mod.rs

pub mod add_gg_data;
pub mod add_mapping;
pub mod crawl_places;
pub mod evse_powers;
pub mod import_master;
pub mod import_waze;
pub mod sync_vinfast;
