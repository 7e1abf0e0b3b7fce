//! Token encryption at rest and state-parameter signing.

mod engine;

pub use engine::CryptoEngine;

#[cfg(test)]
pub(crate) use engine::tests::test_engine;
