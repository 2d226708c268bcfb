#[path = "../support/mod.rs"]
mod support;

mod commit_delivery;
mod executor;
mod harvest;
