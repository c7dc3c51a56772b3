// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod credentials;
pub mod gateway;
pub mod host_resolver;
pub mod renderer;
pub mod telemetry;
pub mod token_endpoint;

pub use clock::ClockPort;
pub use credentials::CredentialSourcePort;
pub use gateway::RemoteJobGatewayPort;
pub use host_resolver::HostResolverPort;
pub use renderer::ScriptRendererPort;
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
pub use token_endpoint::{ClientSecret, TokenEndpointPort, TokenGrant, TokenResponse};
