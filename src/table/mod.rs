//! Typed table support: extraction, schema inference, coercion, writing,
//! and the schema registry.

pub mod extractor;
pub mod inferrer;
pub mod registry;
pub mod schema;
pub mod writer;

pub use extractor::{extract_pages, stitch_continuations, ContinuationOracle, PageExtraction, RawTable};
pub use inferrer::SchemaInferrer;
pub use registry::SchemaRegistry;
pub use schema::{coerce_cell, CellValue, SemanticType, TableSchema};
pub use writer::write_table;
