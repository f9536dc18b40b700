// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus/TCP sensor access.

pub mod gateway;

pub use gateway::SensorGateway;
