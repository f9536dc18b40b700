// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Inbound command plane.

pub mod router;

pub use router::{DeviceCommandRouter, DiagnosticsProvider, ReloadSignal};
