//! Integration tests for wheelsmith

mod cache;
mod cli;
mod common;
mod engine;
mod registry;
