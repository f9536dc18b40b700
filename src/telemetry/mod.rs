// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Telemetry domain types, the per-channel cache, and the wire codec.

pub mod cache;
pub mod codec;
pub mod models;

pub use cache::TelemetryCache;
pub use models::{TelemetryChannel, TelemetryFrame, TelemetryReading};
