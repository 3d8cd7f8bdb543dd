use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

const QUERY_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

enum Readback {
    Idle,
    /// Resolve and copy were encoded into the frame being recorded.
    Encoded,
    Mapping(Receiver<bool>),
}

struct TimerResources {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    period_ns: f64,
    state: Readback,
}

/// Measures the duration of the accumulation pass with timestamp queries.
///
/// Without `TIMESTAMP_QUERY` every method is a no-op and [`GpuTimer::poll`]
/// never yields a value.
pub(crate) struct GpuTimer {
    inner: Option<TimerResources>,
}

impl GpuTimer {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        if !device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            tracing::debug!("timestamp queries unavailable; GPU timing disabled");
            return Self { inner: None };
        }

        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("accumulation timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp readback"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            inner: Some(TimerResources {
                query_set,
                resolve,
                readback,
                period_ns: queue.get_timestamp_period() as f64,
                state: Readback::Idle,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn timestamp_writes(&self) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        self.inner
            .as_ref()
            .map(|timer| wgpu::RenderPassTimestampWrites {
                query_set: &timer.query_set,
                beginning_of_pass_write_index: Some(0),
                end_of_pass_write_index: Some(1),
            })
    }

    /// Encodes the query resolve when no earlier readback is still in flight.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let Some(timer) = self.inner.as_mut() else {
            return;
        };
        if !matches!(timer.state, Readback::Idle) {
            return;
        }
        encoder.resolve_query_set(&timer.query_set, 0..2, &timer.resolve, 0);
        encoder.copy_buffer_to_buffer(&timer.resolve, 0, &timer.readback, 0, QUERY_BYTES);
        timer.state = Readback::Encoded;
    }

    /// Starts mapping the readback buffer once the resolving frame was submitted.
    pub fn after_submit(&mut self) {
        let Some(timer) = self.inner.as_mut() else {
            return;
        };
        if !matches!(timer.state, Readback::Encoded) {
            return;
        }
        let (tx, rx): (Sender<bool>, Receiver<bool>) = bounded(1);
        timer
            .readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result.is_ok());
            });
        timer.state = Readback::Mapping(rx);
    }

    /// Drops a resolve encoded into a frame that was never submitted.
    pub fn discard_encoded(&mut self) {
        if let Some(timer) = self.inner.as_mut() {
            if matches!(timer.state, Readback::Encoded) {
                timer.state = Readback::Idle;
            }
        }
    }

    /// Non-blocking: returns the pass duration once a readback has landed.
    pub fn poll(&mut self, device: &wgpu::Device) -> Option<Duration> {
        let timer = self.inner.as_mut()?;
        let Readback::Mapping(rx) = &timer.state else {
            return None;
        };
        let _ = device.poll(wgpu::PollType::Poll);
        let mapped = match rx.try_recv() {
            Ok(mapped) => mapped,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => false,
        };
        timer.state = Readback::Idle;
        if !mapped {
            tracing::debug!("timestamp readback failed to map");
            return None;
        }

        let elapsed_ticks = {
            let view = timer.readback.slice(..).get_mapped_range();
            let stamps: &[u64] = bytemuck::cast_slice(&view);
            stamps[1].saturating_sub(stamps[0])
        };
        timer.readback.unmap();
        Some(Duration::from_nanos(
            (elapsed_ticks as f64 * timer.period_ns) as u64,
        ))
    }
}
