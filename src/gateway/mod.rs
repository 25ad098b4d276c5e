//! Gateway Payment Flow
//!
//! `client` talks to the external processor; `reconciler` owns the local
//! transaction ledger and its Pending -> Confirmed/Failed lifecycle.

pub mod client;
pub mod reconciler;

#[cfg(test)]
mod reconciler_tests;

pub use client::{GatewayError, GatewayInit, GatewayVerdict, HttpGateway, PaymentGateway};
pub use reconciler::{GatewayReconciler, ReconcileError, VerifyOutcome};
