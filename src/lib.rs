//! Virtual Try-On Job Pipeline
//!
//! This library provides the core functionality for the tryon-pipeline
//! service: it submits try-on and video jobs to pluggable generative-image
//! providers, follows asynchronous provider tasks to completion, and stores the
//! resulting media in R2.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
