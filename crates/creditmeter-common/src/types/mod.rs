//! Core data types for Creditmeter

pub mod account;
pub mod feature;
pub mod identity;
pub mod payment;
pub mod plan;
pub mod usage;
