// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bounded per-channel reading cache
//!
//! Holds the most recent K readings for each telemetry channel so that a
//! client joining mid-stream can be brought up to date with a snapshot.
//! The pipeline worker is the only writer; the publisher reads snapshots
//! from its accept path, so every operation takes the cache mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::models::{TelemetryChannel, TelemetryReading};

/// Fixed-capacity FIFO of readings per channel. Overflow drops the oldest
/// entry. Snapshots are independent copies; mutating one never touches the
/// cache contents.
pub struct TelemetryCache {
    capacity: usize,
    buffers: Mutex<HashMap<TelemetryChannel, VecDeque<TelemetryReading>>>,
}

impl TelemetryCache {
    pub fn new(capacity_per_channel: usize) -> Self {
        Self {
            capacity: capacity_per_channel,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Append a reading to the channel buffer, evicting the oldest entry
    /// once the buffer exceeds its capacity.
    pub fn store(&self, channel: TelemetryChannel, reading: TelemetryReading) {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers.entry(channel).or_default();
        buffer.push_back(reading);
        if buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    /// Ordered copy of the channel buffer, oldest reading first.
    pub fn snapshot(&self, channel: TelemetryChannel) -> Vec<TelemetryReading> {
        let buffers = self.buffers.lock().unwrap();
        buffers
            .get(&channel)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }
}
