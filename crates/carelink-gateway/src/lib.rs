// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP and WebSocket surface of the Carelink orchestrator.
//!
//! Thin layer over [`carelink_session::SessionStateMachine`]: handlers
//! translate HTTP to machine operations and machine errors to statuses,
//! and the WebSocket route bridges the notification hub to connected
//! clients.

pub mod handlers;
pub mod server;
pub mod ws;

pub use server::{GatewayState, ServerConfig, start_server};
