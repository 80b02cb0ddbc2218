pub mod ast;
pub mod backend;
pub mod declaration;
pub mod error;
pub mod program;
pub mod runtime;
pub mod script;
pub mod split;
pub mod tagging;
pub mod token;
