//! Runtime shared by both backends.
//!
//! An [`Instance`] owns the model data, the `$res` object holding getter
//! results and, for optimizing programs, the dependency ledger and the
//! persistent state that lets a setter rebuild only what it touched.
pub(crate) mod error;
pub(crate) mod eval;
pub(crate) mod instance;
pub(crate) mod keysets;
pub(crate) mod ledger;
pub(crate) mod primitives;
pub(crate) mod store;
pub(crate) mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use eval::Stats;
pub use instance::Instance;
pub use value::{ContainerId, Value};
