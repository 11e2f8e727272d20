//! Recurring billing for multi-tenant stores: subscription renewals, sales
//! commission calculation and collection, and the ledger of every charge
//! attempt.

pub mod config;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
