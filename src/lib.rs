//! A Bitcask-style embedded key-value store: an append-only, log-structured
//! on-disk layout fronted by an in-memory hash index.
//!
//! The crate is the storage core only — no network service, client, CLI, or
//! logger installation live here (those are an embedding binary's job). This
//! library calls `log::debug!`/`log::trace!` at its own call sites and
//! expects the embedder to install a subscriber.
//!
//! ```no_run
//! use bitcdb_core::{Engine, EngineConfig};
//!
//! let config = EngineConfig::new("/tmp/bitcdb-example");
//! let engine = Engine::open(config)?;
//! engine.store("hello", "world")?;
//! assert_eq!(engine.retrieve("hello")?, Some("world".to_string()));
//! # Ok::<(), bitcdb_core::EngineError>(())
//! ```

mod codec;
mod config;
mod engine;
mod error;
mod keydir;
mod naming;
mod segment;

pub use config::EngineConfig;
pub use engine::{Engine, MergeOutcome};
pub use error::{CodecError, EngineError, NamingError, SegmentError};

/// Sentinel value written in place of a deleted key's value. A `delete`
/// writes a normal data record carrying this value; readers above the
/// engine boundary (`Engine::retrieve`) map it back to "absent".
pub const TOMBSTONE: &str = "\u{0}bitcdb-tombstone\u{0}";

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use tempfile::tempdir;

    type TestResult = Result<(), Box<dyn Error>>;

    // S1, end to end through the public crate surface rather than `engine`'s
    // internals.
    #[test]
    fn public_api_smoke_test() -> TestResult {
        let dir = tempdir()?;
        let engine = Engine::open(EngineConfig::new(dir.path()))?;

        engine.store("a", "1")?;
        engine.store("b", "2")?;
        assert_eq!(engine.retrieve("a")?, Some("1".to_string()));
        assert_eq!(engine.retrieve("b")?, Some("2".to_string()));
        assert!(engine.delete("a")?);
        assert_eq!(engine.retrieve("a")?, None);
        Ok(())
    }

    #[test]
    fn tombstone_value_is_never_returned_directly_test() -> TestResult {
        let dir = tempdir()?;
        let engine = Engine::open(EngineConfig::new(dir.path()))?;
        engine.store("k", "v")?;
        engine.delete("k")?;
        // The raw tombstone sentinel must never leak out of `retrieve`.
        assert_ne!(engine.retrieve("k")?, Some(TOMBSTONE.to_string()));
        assert_eq!(engine.retrieve("k")?, None);
        Ok(())
    }
}
