// src/utils/mod.rs

pub mod credentials;
pub mod jwt;
