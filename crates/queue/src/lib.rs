pub mod ack;
pub mod batch;
pub mod client;
pub mod consumer;
pub mod drain;
pub mod error;
pub mod gate;
pub mod memory;
pub mod parser;
pub mod processor;
pub mod sqs;

pub use ack::{acknowledge, AckFailure, AckReport};
pub use batch::{Batch, DrainStop, ProcessedBatch};
pub use client::{QueueClient, QueueMessage};
pub use consumer::{BatchConsumer, ConsumerSettings, InvocationReport};
pub use drain::{collect_batch, drain, drain_pages, DrainLimits, DrainStep};
pub use error::{BatchError, QueueError};
pub use gate::{BatchGate, GateDecision};
pub use memory::{DepthMode, MemoryQueue, QueueStats};
pub use parser::{parse_batch, parse_envelope, Envelope};
pub use processor::{process_batch, BatchProcessor, LogProcessor, MemorySink, SinkRecord};
pub use sqs::SqsQueue;
