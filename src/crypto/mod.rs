mod engine;

pub use engine::{CryptoEngine, STATE_TTL_SECS};

#[cfg(test)]
pub(crate) use engine::test_engine;
