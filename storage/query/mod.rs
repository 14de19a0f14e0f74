pub mod cursor;
pub mod engine;
pub mod rows;

pub use cursor::{Cursor, CursorSource, PointCursor, PointRange, Position, SnapshotCursor, SnapshotHistory};
pub use engine::QueryEngine;
