/*!
 * Core building blocks: chunk geometry, sizing, memory pressure, and
 * the streaming statistics primitives
 */

pub mod accumulator;
pub mod chunk_sizer;
pub mod histogram;
pub mod layout;
pub mod memory;
pub mod reservoir;

pub use accumulator::{DimensionAccumulator, DimensionStatistics};
pub use chunk_sizer::{run_chunk_size, ChunkSizer, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use histogram::{Gap, Mode, StreamingHistogram};
pub use layout::{Chunk, DataspaceShape, Layout};
pub use memory::{MemoryPressureMonitor, MemoryReader, PressureLevel, ProcessMemoryReader};
pub use reservoir::ReservoirSampler;
