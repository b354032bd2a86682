//! Best-effort NAT classification.
//!
//! A discovery run gathers local ICE candidates, classifies the NAT from the
//! reflexive ones and reports the resulting network chain to the room once.
//! Nothing else depends on the result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use snapmesh_shared::constants::{NORMAL_NAT, SYMMETRIC_NAT};
use snapmesh_shared::{CandidateType, NetworkChainEntry, PeerId, PeerUpdate, RoomId};

use crate::api::RoomApi;
use crate::error::NetError;
use crate::ice::{IceCandidate, IceGatherer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    GatheringCandidates,
    ClassifyingNat,
    Reported,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    /// One local port maps to a single external port.
    Normal,
    /// One local port maps to a different external port per destination.
    Symmetric,
}

impl NatType {
    pub fn label(self) -> &'static str {
        match self {
            NatType::Normal => NORMAL_NAT,
            NatType::Symmetric => SYMMETRIC_NAT,
        }
    }
}

/// Classify from reflexive candidates grouped by their related (local) port.
///
/// `None` when no reflexive candidate carries a related port.
pub fn classify_nat(candidates: &[IceCandidate]) -> Option<NatType> {
    let mut mappings: BTreeMap<u16, BTreeSet<u16>> = BTreeMap::new();
    for candidate in candidates.iter().filter(|c| c.kind.is_reflexive()) {
        if let Some(local_port) = candidate.related_port {
            mappings.entry(local_port).or_default().insert(candidate.port);
        }
    }

    if mappings.is_empty() {
        return None;
    }
    if mappings.values().any(|external| external.len() > 1) {
        Some(NatType::Symmetric)
    } else {
        Some(NatType::Normal)
    }
}

/// Ordered host -> NAT -> relay chain with duplicate hops removed.
pub fn network_chain(candidates: &[IceCandidate], nat: Option<NatType>) -> Vec<NetworkChainEntry> {
    let mut ordered: Vec<&IceCandidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| hop_rank(c.kind));

    let mut chain: Vec<NetworkChainEntry> = Vec::new();
    for candidate in ordered {
        let duplicate = chain.iter().any(|e| {
            e.ip == candidate.ip
                && e.port == candidate.port
                && e.transport == candidate.transport
                && e.kind == candidate.kind
        });
        if duplicate {
            continue;
        }

        let kind_name = kind_name(candidate.kind);
        let type_detail = match (candidate.kind.is_reflexive(), nat) {
            (true, Some(nat)) => format!("{kind_name} ({})", nat.label()),
            _ => kind_name.to_string(),
        };
        let label = match candidate.kind {
            CandidateType::Host => "Local",
            CandidateType::Srflx | CandidateType::Prflx => "NAT",
            CandidateType::Relay => "Relay",
        };

        chain.push(NetworkChainEntry {
            ip: candidate.ip.clone(),
            port: candidate.port,
            transport: candidate.transport.clone(),
            kind: candidate.kind,
            type_detail,
            label: label.to_string(),
        });
    }
    chain
}

fn hop_rank(kind: CandidateType) -> u8 {
    match kind {
        CandidateType::Host => 0,
        CandidateType::Srflx | CandidateType::Prflx => 1,
        CandidateType::Relay => 2,
    }
}

fn kind_name(kind: CandidateType) -> &'static str {
    match kind {
        CandidateType::Host => "host",
        CandidateType::Srflx => "srflx",
        CandidateType::Prflx => "prflx",
        CandidateType::Relay => "relay",
    }
}

/// One discovery run per session.
pub struct TopologyDiscovery {
    state: Mutex<DiscoveryState>,
    candidates: Mutex<Vec<IceCandidate>>,
    finalized: AtomicBool,
}

impl TopologyDiscovery {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DiscoveryState::GatheringCandidates),
            candidates: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state.lock().map(|s| *s).unwrap_or(DiscoveryState::Done)
    }

    fn set_state(&self, next: DiscoveryState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(from = ?*state, to = ?next, "topology discovery state");
            *state = next;
        }
    }

    /// Record one gathered candidate line. Unparseable lines and candidates
    /// arriving after finalisation are dropped.
    pub fn on_candidate(&self, line: &str) {
        if self.state() != DiscoveryState::GatheringCandidates {
            return;
        }
        match line.parse::<IceCandidate>() {
            Ok(candidate) => {
                if let Ok(mut candidates) = self.candidates.lock() {
                    candidates.push(candidate);
                }
            }
            Err(e) => debug!(error = %e, "ignoring candidate"),
        }
    }

    /// Classify and build the chain on gathering completion.
    ///
    /// Only the first call returns a chain; later completions return `None`
    /// so the chain is reported once.
    pub fn finalize(&self) -> Option<Vec<NetworkChainEntry>> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return None;
        }

        self.set_state(DiscoveryState::ClassifyingNat);
        let candidates = self
            .candidates
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        let nat = classify_nat(&candidates);
        let chain = network_chain(&candidates, nat);

        info!(
            candidates = candidates.len(),
            nat = nat.map(NatType::label).unwrap_or("unknown"),
            hops = chain.len(),
            "network topology classified"
        );
        Some(chain)
    }

    /// Gather, classify and report the chain for `peer_id`.
    ///
    /// Returns the reported chain, or `None` when this session already
    /// reported one.
    pub async fn run(
        &self,
        gatherer: &dyn IceGatherer,
        room_api: &dyn RoomApi,
        room_id: &RoomId,
        peer_id: &PeerId,
    ) -> Result<Option<Vec<NetworkChainEntry>>, NetError> {
        let mut lines = gatherer.gather().await?;
        while let Some(line) = lines.recv().await {
            self.on_candidate(&line);
        }

        let Some(chain) = self.finalize() else {
            return Ok(None);
        };

        let update = PeerUpdate {
            network_chain: Some(chain.clone()),
            ..Default::default()
        };
        let reported = room_api.update_peer(room_id, peer_id, &update).await;
        self.set_state(DiscoveryState::Reported);
        if let Err(e) = reported {
            warn!(peer = %peer_id.short(), error = %e, "failed to report network chain");
            self.set_state(DiscoveryState::Done);
            return Err(e);
        }
        self.set_state(DiscoveryState::Done);
        Ok(Some(chain))
    }
}

impl Default for TopologyDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
