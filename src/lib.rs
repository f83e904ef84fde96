pub mod batching;
pub mod heuristic;
pub mod models;
pub mod parse;
pub mod problem;
pub mod solution;
pub mod validation;

#[cfg(test)]
mod fixtures;
