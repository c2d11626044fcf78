#![cfg_attr(feature = "strict", deny(warnings))]

mod chunk_size;
mod dataset;
mod element_loader;
mod error;
mod fetch_scheduler;
pub mod filter;
mod grid_decoder;
mod instance_session;
mod progress;
mod table_assembler;
mod table_reconstructor;

pub use chunk_size::ChunkSizeEstimator;
pub use dataset::Dataset;
pub use element_loader::{ElementLoader, fetch_with_limit_fallback};
pub use error::{Result, TableReconstructionError};
pub use fetch_scheduler::{FetchPlan, FetchScheduler, host_concurrency, worker_count};
pub use filter::{ElementOperator, FilterUniverse, Selection, SelectionWarning};
pub use grid_decoder::{ATTRIBUTE_FORM_SEPARATOR, CellValue, Column, ColumnKind, DecodedChunk, GridDecoder, LabelMap};
pub use instance_session::{InstanceHandle, InstanceSession, PageFetcher, SessionState};
pub use progress::{NoOpProgressUpdater, ProgressUpdater};
pub use table_assembler::{Table, TableAssembler, TableMembership};
pub use table_reconstructor::TableReconstructor;
