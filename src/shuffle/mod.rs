//! Oblivious shuffle of secret-shared vectors.

pub mod benes;
mod engine;

pub use engine::ObliviousShuffleEngine;
