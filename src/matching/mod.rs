// src/matching/mod.rs
pub mod geo;
pub mod resolver;
pub mod text;
