//! slidedown: an HTTP gateway that turns PPT/PPTX uploads into zipped
//! Markdown by delegating to external converters (pptx2md, docling, marker,
//! markitdown, Aspose.Slides).

pub mod archive;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod inspect;
pub mod orchestrator;
pub mod registry;
pub mod util;
pub mod workspace;
