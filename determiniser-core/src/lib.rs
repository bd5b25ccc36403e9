use thiserror::Error;

pub mod bag;
pub mod config;
pub mod entropy;
pub mod fractions;
pub mod host;
pub mod intercept;
pub mod schema;
pub mod state;
pub mod value;

pub use config::{parse_desired, GlobalConfig, JsonFileStore, KvStore};
pub use entropy::{EntropySlot, SequenceOverride};
pub use fractions::{compute_fractions, synthesize, BagSnapshot};
pub use host::{Host, Routine};
pub use intercept::{Engine, EngineSettings, RackFields};
pub use schema::{derive_schema, DrawSchema};
pub use state::StateStore;
pub use value::Value;

/// Identifier code a draw produces. Letter tiles use their character code
/// ('A' is 65); the blank tile is '?' (63), the same code the host uses.
pub type TileCode = u16;

/// Character code of the blank tile ('?').
pub const BLANK_CODE: TileCode = 63;

#[derive(Debug, Error)]
pub enum DeterminiserError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("routine '{name}' is not defined by the host")]
    MissingRoutine { name: String },

    #[error("host call '{name}' failed: {message}")]
    HostCall { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, DeterminiserError>;
