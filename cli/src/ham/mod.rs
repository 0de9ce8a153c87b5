//! The `Hammer` script frontend: lexer, parser, expander, evaluator,
//! and makedep ingestion.

pub mod eval;
pub mod expand;
pub mod makedep;
pub mod model;
pub mod parser;
pub mod tokenizer;

pub use eval::{EvalOptions, Evaluator};
pub use model::{Block, Error};

/// Read and parse a script file.
pub fn load(path: &str) -> Result<Block, Error> {
    let source = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.into(),
        source,
    })?;
    parser::parse(path, &source)
}
