//! # drudge-rs
//!
//! Postgres-backed durable job queue: competing workers, atomic
//! reservation, crash recovery.
//!
//! A job is one row in the `job` table and its lifecycle state is derived
//! from that row's fields, never stored. Workers claim jobs with
//! single-statement `FOR UPDATE SKIP LOCKED` updates, record outcomes as
//! JSON, and get woken by `LISTEN`/`NOTIFY` with polling as the fallback.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod telemetry;
pub mod worker;
