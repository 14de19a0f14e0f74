use crate::error::{Result, StorageError};
use crate::ingest::writer::validate_point;
use crate::types::NewMetricPoint;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bounded in-process buffer that lets high-frequency pollers hand off
/// points and have them committed in batches
pub struct PointBuffer {
    buffer: Arc<RwLock<Vec<NewMetricPoint>>>,
    capacity: usize,
}

impl PointBuffer {
    /// Create a new point buffer with given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(Vec::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Validate and queue a point; full buffers reject instead of dropping
    pub async fn push(&self, point: NewMetricPoint) -> Result<()> {
        validate_point(&point)?;

        let mut buffer = self.buffer.write().await;

        if buffer.len() >= self.capacity {
            return Err(StorageError::BufferFull(self.capacity));
        }

        buffer.push(point);
        Ok(())
    }

    /// Drain all points from the buffer
    pub async fn drain(&self) -> Vec<NewMetricPoint> {
        let mut buffer = self.buffer.write().await;
        std::mem::take(&mut *buffer)
    }

    /// Put points that failed to commit back in front of newer arrivals.
    ///
    /// May exceed capacity briefly; `push` stays rejected until a flush
    /// brings the buffer back under it.
    pub async fn requeue(&self, mut points: Vec<NewMetricPoint>) {
        let mut buffer = self.buffer.write().await;
        points.append(&mut buffer);
        *buffer = points;
    }

    /// Get current buffer size
    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    /// Check if buffer is empty
    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;

    fn sample(value: f64) -> NewMetricPoint {
        NewMetricPoint::new(DeviceId(1), "2024-06-01T00:00:00Z", "temperature", value)
    }

    #[tokio::test]
    async fn test_buffer() {
        let buffer = PointBuffer::new(10);

        buffer.push(sample(1.0)).await.unwrap();
        assert_eq!(buffer.len().await, 1);

        let drained = buffer.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_buffer_full_rejects() {
        let buffer = PointBuffer::new(2);
        buffer.push(sample(1.0)).await.unwrap();
        buffer.push(sample(2.0)).await.unwrap();

        let err = buffer.push(sample(3.0)).await.unwrap_err();
        assert!(matches!(err, StorageError::BufferFull(2)));
        assert_eq!(buffer.len().await, 2);
    }

    #[tokio::test]
    async fn test_buffer_rejects_invalid_points() {
        let buffer = PointBuffer::new(2);
        let err = buffer.push(sample(f64::NAN)).await.unwrap_err();
        assert!(matches!(err, StorageError::ValidationError(_)));
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_requeue_preserves_order() {
        let buffer = PointBuffer::new(10);
        buffer.push(sample(1.0)).await.unwrap();
        let failed = buffer.drain().await;
        buffer.push(sample(2.0)).await.unwrap();

        buffer.requeue(failed).await;
        let values: Vec<f64> = buffer.drain().await.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }
}
