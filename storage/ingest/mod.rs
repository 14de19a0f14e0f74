pub mod buffer;
pub mod registry;
pub mod writer;

pub use buffer::PointBuffer;
pub use registry::DeviceRegistry;
pub use writer::IngestWriter;
