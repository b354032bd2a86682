//! ICE candidate gathering for topology discovery.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

use snapmesh_shared::CandidateType;

use crate::error::NetError;

/// A parsed `candidate:` SDP attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub transport: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub kind: CandidateType,
    /// Local address behind a reflexive or relayed candidate.
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
}

impl FromStr for IceCandidate {
    type Err = NetError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = |reason: &str| NetError::Candidate(format!("{reason}: {line}"));

        let body = line.trim();
        let body = body.strip_prefix("a=").unwrap_or(body);
        let body = body.strip_prefix("candidate:").unwrap_or(body);

        let fields: Vec<&str> = body.split_whitespace().collect();
        if fields.len() < 8 || fields[6] != "typ" {
            return Err(bad("truncated candidate"));
        }

        let mut candidate = IceCandidate {
            foundation: fields[0].to_string(),
            component: fields[1].parse().map_err(|_| bad("bad component"))?,
            transport: fields[2].to_ascii_lowercase(),
            priority: fields[3].parse().map_err(|_| bad("bad priority"))?,
            ip: fields[4].to_string(),
            port: fields[5].parse().map_err(|_| bad("bad port"))?,
            kind: CandidateType::from_name(fields[7]).ok_or_else(|| bad("unknown candidate type"))?,
            related_address: None,
            related_port: None,
        };

        for pair in fields[8..].chunks_exact(2) {
            match pair[0] {
                "raddr" => candidate.related_address = Some(pair[1].to_string()),
                "rport" => {
                    candidate.related_port = Some(pair[1].parse().map_err(|_| bad("bad rport"))?)
                }
                _ => {}
            }
        }

        Ok(candidate)
    }
}

/// Source of raw local ICE candidate lines.
///
/// The returned channel yields one `candidate:` line per gathered candidate
/// and closes when gathering completes or gives up.
#[async_trait]
pub trait IceGatherer: Send + Sync {
    async fn gather(&self) -> Result<mpsc::Receiver<String>, NetError>;
}

/// Gathers candidates by opening a throwaway offer on a `webrtc` peer
/// connection configured with the given STUN/TURN servers.
pub struct WebRtcGatherer {
    ice_servers: Vec<String>,
    timeout: Duration,
}

impl WebRtcGatherer {
    pub fn new(ice_servers: Vec<String>, timeout: Duration) -> Self {
        Self {
            ice_servers,
            timeout,
        }
    }
}

#[async_trait]
impl IceGatherer for WebRtcGatherer {
    async fn gather(&self) -> Result<mpsc::Receiver<String>, NetError> {
        let api = APIBuilder::new().build();
        let mut config = RTCConfiguration::default();
        if !self.ice_servers.is_empty() {
            config.ice_servers = vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }];
        }
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let (tx, rx) = mpsc::channel(32);
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let sender = Arc::new(Mutex::new(Some(tx)));
        let gathering = Arc::clone(&sender);

        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sender = Arc::clone(&sender);
            let done_tx = done_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    // Gathering complete: dropping the sender closes the stream.
                    if let Ok(mut slot) = sender.lock() {
                        slot.take();
                    }
                    let _ = done_tx.try_send(());
                    return;
                };

                let line = match candidate.to_json() {
                    Ok(init) => init.candidate,
                    Err(e) => {
                        warn!(error = %e, "could not serialise local candidate");
                        return;
                    }
                };
                let tx = sender.lock().ok().and_then(|slot| slot.clone());
                if let Some(tx) = tx {
                    let _ = tx.send(line).await;
                }
            })
        }));

        // Data channel so the offer carries an m= section to gather for.
        pc.create_data_channel("gather", None).await?;
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;
        info!(servers = ?self.ice_servers, "ICE gathering started");

        let timeout = self.timeout;
        tokio::spawn(async move {
            finish_gathering(timeout, &mut done_rx, &gathering).await;
            if let Err(e) = pc.close().await {
                warn!(error = %e, "failed to close gathering peer connection");
            }
        });

        Ok(rx)
    }
}

/// Wait for gathering to complete or time out, then close the candidate
/// stream either way.
async fn finish_gathering(
    timeout: Duration,
    done: &mut mpsc::Receiver<()>,
    sender: &Mutex<Option<mpsc::Sender<String>>>,
) {
    if tokio::time::timeout(timeout, done.recv()).await.is_err() {
        debug!(timeout_secs = timeout.as_secs(), "ICE gathering timed out");
    }
    if let Ok(mut slot) = sender.lock() {
        slot.take();
    }
}
