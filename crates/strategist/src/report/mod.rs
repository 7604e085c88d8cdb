//! Report assembly and storage.

mod assembler;
mod writer;

pub use assembler::{slugify, Report, ReportAssembler};
pub use writer::{ReportWriter, WrittenReport};
