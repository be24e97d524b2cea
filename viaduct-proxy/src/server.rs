//! One server per client-facing protocol version.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{error, info};

use viaduct_proto::mapping::Protocol;

use crate::service::Service;
use crate::session::Session;
use crate::transport::{Conn, Listener, dial};

/// Accepts transport sessions and spawns a [`Session`] per client.
pub struct Server {
    service: Arc<Service>,
    protocol: Protocol,
    listener: Arc<Listener>,
    sessions: RwLock<HashMap<u32, Arc<Session>>>,
}

impl Server {
    /// Wrap a bound listener.
    pub fn new(service: Arc<Service>, protocol: Protocol, listener: Listener) -> Arc<Self> {
        Arc::new(Self {
            service,
            protocol,
            listener: Arc::new(listener),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Sessions currently alive on this server.
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Accept until the service stops.
    pub async fn run(self: Arc<Self>) {
        info!(
            "[server] listening on {} for protocol {}",
            self.listener.local_addr(),
            self.protocol
        );
        loop {
            let accepted = tokio::select! {
                _ = self.service.cancelled_token().cancelled() => {
                    self.listener.close();
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };
            let Some(conn) = accepted else { break };
            info!("[server] new session from {}", conn.remote_addr());
            let server = self.clone();
            tokio::spawn(async move { server.handle_conn(conn).await });
        }
    }

    /// Dial upstream, run the session, tear everything down.
    async fn handle_conn(self: Arc<Self>, conn: Arc<Conn>) {
        let upstream_addr = self.service.config.endpoints.main_endpoint.clone();
        let up = match dial(&upstream_addr, self.service.stats.clone()).await {
            Ok(up) => up,
            Err(e) => {
                error!("[server] dial {upstream_addr} failed: {e}");
                self.listener.disconnect(&conn, 0);
                return;
            }
        };

        let id = conn.session_id();
        let session = Session::new(self.service.clone(), self.protocol.clone(), conn, up);
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).insert(id, session.clone());

        session.clone().run().await;

        // Propagate the upstream close reason through the listener's
        // disconnect so the client sees why.
        self.listener.disconnect(session.downstream(), session.upstream_close_reason());
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).remove(&id);
        info!("[server] session {id} closed");
    }
}
