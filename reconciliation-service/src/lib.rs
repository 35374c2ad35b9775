//! Reconciliation Service - daily settlement reconciliation between the
//! payment platform and external payment channels.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
