//! Two-peer room registry
//!
//! Rooms are keyed by a short public identifier minted from an
//! ambiguity-free alphabet. Each room holds at most one host and one guest;
//! expiry is lazy (evicted on lookup) plus a periodic sweep.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use peerlink_shared::validate::is_valid_room_id;

/// Room identifier prefix.
pub const ROOM_ID_PREFIX: &str = "meet-";

/// Random characters in a minted room identifier.
pub const ROOM_ID_RANDOM_LEN: usize = 14;

// lowercase alphanumerics minus the visually ambiguous i, l, o, 0, 1
const ROOM_ID_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// Role of a broker-side participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomRole {
    /// Creator of the room.
    Host,
    /// Second participant.
    Guest,
}

impl RoomRole {
    /// Parse a role string; anything else is invalid.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "host" => Some(RoomRole::Host),
            "guest" => Some(RoomRole::Guest),
            _ => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomRole::Host => "host",
            RoomRole::Guest => "guest",
        }
    }
}

/// One rendezvous room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Public identifier.
    pub room_id: String,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Expiry time, unix milliseconds.
    pub expires_at: u64,
    /// Host slot.
    pub host_peer_id: Option<String>,
    /// Guest slot.
    pub guest_peer_id: Option<String>,
}

impl Room {
    /// Whether the room is still within its lifetime.
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at
    }

    /// Number of occupied slots.
    pub fn participant_count(&self) -> usize {
        usize::from(self.host_peer_id.is_some()) + usize::from(self.guest_peer_id.is_some())
    }

    fn slot(&self, role: RoomRole) -> &Option<String> {
        match role {
            RoomRole::Host => &self.host_peer_id,
            RoomRole::Guest => &self.guest_peer_id,
        }
    }

    fn slot_mut(&mut self, role: RoomRole) -> &mut Option<String> {
        match role {
            RoomRole::Host => &mut self.host_peer_id,
            RoomRole::Guest => &mut self.guest_peer_id,
        }
    }

    fn holds_peer(&self, peer_id: &str) -> bool {
        self.host_peer_id.as_deref() == Some(peer_id)
            || self.guest_peer_id.as_deref() == Some(peer_id)
    }
}

/// Admission decision for one join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    /// Admitted; the room as it stood at validation time.
    Ok(Box<Room>),
    /// No such room.
    RoomNotFound,
    /// The room exists but its lifetime is over.
    RoomExpired,
    /// The role is neither `host` nor `guest`.
    InvalidRole,
    /// The role slot is owned by a different peer.
    RoleTaken,
    /// Two distinct peers already occupy the room.
    RoomFull,
}

impl JoinDecision {
    /// Stable code for the decision (also the REST error code).
    pub fn code(&self) -> &'static str {
        match self {
            JoinDecision::Ok(_) => "OK",
            JoinDecision::RoomNotFound => "ROOM_NOT_FOUND",
            JoinDecision::RoomExpired => "ROOM_EXPIRED",
            JoinDecision::InvalidRole => "INVALID_ROLE",
            JoinDecision::RoleTaken => "ROLE_TAKEN",
            JoinDecision::RoomFull => "ROOM_FULL",
        }
    }
}

/// In-memory room store. Owned by the broker process.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a unique room and insert it.
    pub fn create_room(&self, now_ms: u64, ttl_seconds: u64) -> Room {
        let mut rooms = self.rooms.lock().unwrap();
        let room_id = loop {
            let candidate = mint_room_id();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        let room = Room {
            room_id: room_id.clone(),
            created_at: now_ms,
            expires_at: now_ms + ttl_seconds * 1_000,
            host_peer_id: None,
            guest_peer_id: None,
        };
        rooms.insert(room_id, room.clone());
        room
    }

    /// Look a room up, evicting it if expired.
    pub fn get_active_room(&self, room_id: &str, now_ms: u64) -> Option<Room> {
        let mut rooms = self.rooms.lock().unwrap();
        match rooms.get(room_id) {
            Some(room) if room.is_active(now_ms) => Some(room.clone()),
            Some(_) => {
                rooms.remove(room_id);
                None
            }
            None => None,
        }
    }

    /// Decide whether `(peer_id, role)` may join `room_id`.
    ///
    /// Re-joining a slot the same peer already owns is idempotent.
    pub fn validate_join(
        &self,
        room_id: &str,
        peer_id: &str,
        role: &str,
        now_ms: u64,
    ) -> JoinDecision {
        let Some(role) = RoomRole::parse(role) else {
            return JoinDecision::InvalidRole;
        };
        let mut rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get(room_id) else {
            return JoinDecision::RoomNotFound;
        };
        if !room.is_active(now_ms) {
            rooms.remove(room_id);
            return JoinDecision::RoomExpired;
        }
        if room.holds_peer(peer_id) {
            return JoinDecision::Ok(Box::new(room.clone()));
        }
        if room.participant_count() >= 2 {
            return JoinDecision::RoomFull;
        }
        if room.slot(role).is_some() {
            return JoinDecision::RoleTaken;
        }
        JoinDecision::Ok(Box::new(room.clone()))
    }

    /// Atomically validate and admit `(peer_id, role)` into `room_id`.
    ///
    /// Same decision table as [`RoomRegistry::validate_join`], but the slot
    /// write happens under the same lock acquisition, so two peers racing
    /// one empty slot cannot both win: the loser sees the occupied slot and
    /// gets `ROLE_TAKEN`/`ROOM_FULL`. A slot is never reassigned from one
    /// peer to another without an intervening remove.
    pub fn join(&self, room_id: &str, peer_id: &str, role: &str, now_ms: u64) -> JoinDecision {
        let Some(role) = RoomRole::parse(role) else {
            return JoinDecision::InvalidRole;
        };
        let mut rooms = self.rooms.lock().unwrap();
        let Some(room) = rooms.get_mut(room_id) else {
            return JoinDecision::RoomNotFound;
        };
        if !room.is_active(now_ms) {
            rooms.remove(room_id);
            return JoinDecision::RoomExpired;
        }
        if room.holds_peer(peer_id) {
            match room.slot(role).as_deref() {
                // re-join of the slot the peer already owns
                Some(owner) if owner == peer_id => {}
                Some(_) => return JoinDecision::RoleTaken,
                // the peer switches roles: vacate its old slot first
                None => {
                    if room.host_peer_id.as_deref() == Some(peer_id) {
                        room.host_peer_id = None;
                    }
                    if room.guest_peer_id.as_deref() == Some(peer_id) {
                        room.guest_peer_id = None;
                    }
                    *room.slot_mut(role) = Some(peer_id.to_string());
                }
            }
            return JoinDecision::Ok(Box::new(room.clone()));
        }
        if room.participant_count() >= 2 {
            return JoinDecision::RoomFull;
        }
        if room.slot(role).is_some() {
            return JoinDecision::RoleTaken;
        }
        *room.slot_mut(role) = Some(peer_id.to_string());
        JoinDecision::Ok(Box::new(room.clone()))
    }

    /// Put `peer_id` into its role slot. Returns the updated room, or `None`
    /// if the room is gone.
    pub fn add_participant(
        &self,
        room_id: &str,
        peer_id: &str,
        role: RoomRole,
    ) -> Option<Room> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms.get_mut(room_id)?;
        *room.slot_mut(role) = Some(peer_id.to_string());
        Some(room.clone())
    }

    /// Clear whichever slot `peer_id` occupies.
    pub fn remove_participant(&self, room_id: &str, peer_id: &str) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get_mut(room_id) {
            if room.host_peer_id.as_deref() == Some(peer_id) {
                room.host_peer_id = None;
            }
            if room.guest_peer_id.as_deref() == Some(peer_id) {
                room.guest_peer_id = None;
            }
        }
    }

    /// Evict every expired room and return their identifiers.
    pub fn cleanup_expired(&self, now_ms: u64) -> Vec<String> {
        let mut rooms = self.rooms.lock().unwrap();
        let expired: Vec<String> = rooms
            .iter()
            .filter(|(_, room)| !room.is_active(now_ms))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            rooms.remove(id);
        }
        expired
    }

    /// Number of stored rooms (for stats and tests).
    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }
}

fn mint_room_id() -> String {
    let mut rng = OsRng;
    let suffix: String = (0..ROOM_ID_RANDOM_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect();
    let room_id = format!("{ROOM_ID_PREFIX}{suffix}");
    debug_assert!(is_valid_room_id(&room_id));
    room_id
}
