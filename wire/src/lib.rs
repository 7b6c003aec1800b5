//! Shared space/booking model and JSON codec for the live availability channel.
//!
//! This crate owns the wire representation used by both the server and the
//! client sync agent. Field names follow the external camelCase contract that
//! UI and map collaborators consume read-only.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Response header carrying the registry state version on read endpoints.
pub const STATE_VERSION_HEADER: &str = "x-state-version";

/// Request header carrying the caller's external identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Request header carrying the administrative token for seat corrections.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Error returned by the message decoders.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text could not be parsed as a known JSON message.
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),
}

// =============================================================================
// SPACE
// =============================================================================

/// Category of a bookable workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    Library,
    Cafe,
    StudyRoom,
    Outdoor,
    Coworking,
    University,
}

impl SpaceType {
    /// Wire name of the type, e.g. `"study_room"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Cafe => "cafe",
            Self::StudyRoom => "study_room",
            Self::Outdoor => "outdoor",
            Self::Coworking => "coworking",
            Self::University => "university",
        }
    }

    /// Parse a wire name. Returns `None` for unknown names.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "library" => Some(Self::Library),
            "cafe" => Some(Self::Cafe),
            "study_room" => Some(Self::StudyRoom),
            "outdoor" => Some(Self::Outdoor),
            "coworking" => Some(Self::Coworking),
            "university" => Some(Self::University),
            _ => None,
        }
    }
}

/// Amenity flags shown on cards and used by client-side filters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Amenities {
    pub wifi: bool,
    pub quiet_zone: bool,
    pub power: bool,
    pub group_space: bool,
}

/// A bookable physical location with finite seat capacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SpaceType,
    pub total_seats: i32,
    pub available_seats: i32,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub amenities: Amenities,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Space {
    /// Seat count after applying `delta`, or `None` if the result would leave
    /// `[0, total_seats]`.
    #[must_use]
    pub fn seats_after(&self, delta: i32) -> Option<i32> {
        let next = self.available_seats.checked_add(delta)?;
        (0..=self.total_seats).contains(&next).then_some(next)
    }

    /// Whether the record satisfies `0 <= available_seats <= total_seats`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total_seats >= 0 && (0..=self.total_seats).contains(&self.available_seats)
    }
}

// =============================================================================
// BOOKING
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A reservation of one seat in a space for a time window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub space_id: i64,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub status: BookingStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Body of `POST /api/bookings`. Missing times are filled in by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub space_id: i64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
}

/// A space a user keeps on their shortlist.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: i64,
    pub user_id: String,
    pub space_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Current state of the space, filled in by the server when it still exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<Space>,
}

/// Body of `POST /api/favorites`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRequest {
    pub space_id: i64,
}

/// Body of `POST /api/admin/spaces/{id}/seats`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAdjustment {
    pub delta: i32,
}

/// JSON error body returned by every failing HTTP endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

// =============================================================================
// LIVE CHANNEL MESSAGES
// =============================================================================

/// Server → client message on the live channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Complete, version-stamped copy of every space. Sent once, first.
    Snapshot { version: u64, spaces: Vec<Space> },
    /// Only the records changed by the mutation that produced `version`.
    Delta { version: u64, spaces: Vec<Space> },
}

impl ServerMessage {
    #[must_use]
    pub fn version(&self) -> u64 {
        match self {
            Self::Snapshot { version, .. } | Self::Delta { version, .. } => *version,
        }
    }

    #[must_use]
    pub fn spaces(&self) -> &[Space] {
        match self {
            Self::Snapshot { spaces, .. } | Self::Delta { spaces, .. } => spaces,
        }
    }
}

/// Client → server message on the live channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Optimistic availability nudge. Never authoritative.
    Hint {
        #[serde(rename = "spaceId")]
        space_id: i64,
        #[serde(rename = "availableSeats")]
        available_seats: i32,
    },
}

/// Encode a live-channel message as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the value cannot be serialized.
pub fn encode_message<T: Serialize>(message: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a server message from JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON or unknown `type` tags.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a client message from JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed JSON or unknown `type` tags.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
