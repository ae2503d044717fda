use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle state of a helpdesk ticket, carried as a numeric code on the
/// wire. Codes outside the four standard states round-trip unchanged so the
/// pipeline never corrupts custom statuses it does not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketStatus {
    Open,
    Pending,
    Resolved,
    Closed,
    Other(u8),
}

impl TicketStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            2 => Self::Open,
            3 => Self::Pending,
            4 => Self::Resolved,
            5 => Self::Closed,
            other => Self::Other(other),
        }
    }

    pub fn as_code(self) -> u8 {
        match self {
            Self::Open => 2,
            Self::Pending => 3,
            Self::Resolved => 4,
            Self::Closed => 5,
            Self::Other(code) => code,
        }
    }

    /// Open and Pending tickets are the only consolidation candidates; every
    /// other status is left alone by both the sweeper and the merge planner.
    pub fn is_consolidation_candidate(self) -> bool {
        matches!(self, Self::Open | Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Other(_) => "other",
        }
    }
}

impl Serialize for TicketStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_code())
    }
}

impl<'de> Deserialize<'de> for TicketStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_code(u8::deserialize(deserializer)?))
    }
}

/// A helpdesk ticket as returned by the ticket endpoints. Timestamps stay in
/// their RFC 3339 wire form; parsing happens at the point of comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub requester_id: u64,
    pub status: TicketStatus,
    #[serde(default)]
    pub responder_id: Option<u64>,
    #[serde(default)]
    pub group_id: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub description_text: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A requester contact record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A support agent as listed under a group. `available` is the helpdesk's own
/// availability toggle; live presence comes from the time-tracking service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: u64,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub contact: AgentContact,
}

/// Partial update payload for `PUT /tickets/{id}`. Unset fields are omitted
/// entirely; `responder_id: Some(None)` serializes as an explicit null, which
/// is how the backend unassigns a ticket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TicketUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder_id: Option<Option<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl TicketUpdate {
    pub fn is_empty(&self) -> bool {
        self.requester_id.is_none()
            && self.responder_id.is_none()
            && self.group_id.is_none()
            && self.status.is_none()
            && self.tags.is_none()
    }
}

/// Renders the search query matching a requester's Open or Pending tickets.
/// The caller wraps the result in double quotes as the search endpoint
/// requires.
pub fn open_ticket_query(requester_id: u64) -> String {
    format!(
        "requester_id:{requester_id} AND (status:{} OR status:{})",
        TicketStatus::Open.as_code(),
        TicketStatus::Pending.as_code()
    )
}
