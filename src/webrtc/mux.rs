//! Shared ICE multiplexing listeners
//!
//! Opened once when the manager starts and shared by every peer connection.
//! A configured port that cannot be bound aborts startup.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::Arc;

use tracing::{info, warn};
use webrtc::ice::udp_mux::{UDPMux, UDPMuxDefault, UDPMuxParams};

use crate::config::WebRtcConfig;
use crate::error::{AppError, Result};
use crate::utils::{bind_tcp_listener, bind_udp_socket};

pub struct IceMux {
    udp: Option<Arc<UDPMuxDefault>>,
    udp_port: Option<u16>,
    /// Held open so the port stays reserved. The WebRTC stack has no ICE-TCP
    /// transport, so no candidates are gathered on it.
    tcp: Option<TcpListener>,
}

impl IceMux {
    /// Bind the configured listeners; port 0 leaves a listener disabled
    pub async fn bind(config: &WebRtcConfig) -> Result<Self> {
        let ip: IpAddr = config.mux_address.parse().map_err(|e| {
            AppError::Config(format!("Invalid mux address '{}': {}", config.mux_address, e))
        })?;

        let mut udp_port = None;
        let udp = if config.udp_mux > 0 {
            let addr = SocketAddr::new(ip, config.udp_mux);
            let socket = bind_udp_socket(addr).map_err(|e| {
                AppError::Config(format!("Failed to bind UDP mux on {}: {}", addr, e))
            })?;
            udp_port = socket.local_addr().ok().map(|a| a.port());
            let socket = tokio::net::UdpSocket::from_std(socket).map_err(|e| {
                AppError::Config(format!("Failed to register UDP mux on {}: {}", addr, e))
            })?;
            info!("UDP mux listening on {}", addr);
            Some(UDPMuxDefault::new(UDPMuxParams::new(socket)))
        } else {
            None
        };

        let tcp = if config.tcp_mux > 0 {
            let addr = SocketAddr::new(ip, config.tcp_mux);
            let listener = bind_tcp_listener(addr).map_err(|e| {
                AppError::Config(format!("Failed to bind TCP mux on {}: {}", addr, e))
            })?;
            warn!(
                "TCP mux bound on {} but ICE-TCP candidates are not supported; only UDP is used",
                addr
            );
            Some(listener)
        } else {
            None
        };

        Ok(Self { udp, udp_port, tcp })
    }

    pub fn udp(&self) -> Option<Arc<UDPMuxDefault>> {
        self.udp.clone()
    }

    pub fn udp_port(&self) -> Option<u16> {
        self.udp_port
    }

    pub fn tcp_port(&self) -> Option<u16> {
        self.tcp
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }

    pub async fn close(&self) {
        if let Some(ref udp) = self.udp {
            if let Err(e) = udp.close().await {
                warn!("Failed to close UDP mux: {}", e);
            }
        }
    }
}
