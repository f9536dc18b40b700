// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! AquaRegulator backend library
//!
//! Bridges a Modbus/TCP sensor cluster and a MariaDB historical store with
//! remote operator clients. Three telemetry channels (realtime readings,
//! historical environment records, historical soil/air records) are
//! multiplexed over a single framed TCP carrier, and the same sockets accept
//! line-delimited JSON commands that mutate device registers.

pub mod command;
pub mod config;
pub mod daemon;
pub mod database;
pub mod monitoring;
pub mod pipeline;
pub mod publisher;
pub mod sensors;
pub mod telemetry;
pub mod video;
