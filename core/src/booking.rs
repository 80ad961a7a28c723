//! The booking aggregate: booking, tickets, vehicles, payment attempts and
//! the append-only audit log.

use crate::error::{ReservationError, Result};
use crate::ledger::LedgerKey;
use crate::types::{
    ActorType, BookingId, CategoryCounts, Money, PaymentId, ScheduleId, UserId, VehicleType,
};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Status enums
// ============================================================================

/// Booking lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Capacity reserved, awaiting payment
    Pending,
    /// Paid
    Confirmed,
    /// Sailed
    Completed,
    /// Cancelled; capacity released
    Cancelled,
    /// Refund requested; capacity still held
    RefundPending,
    /// Refund approved; capacity released
    Refunded,
    /// Moved to another sailing; capacity released here
    Rescheduled,
}

impl BookingStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::RefundPending => "REFUND_PENDING",
            Self::Refunded => "REFUNDED",
            Self::Rescheduled => "RESCHEDULED",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            "REFUND_PENDING" => Some(Self::RefundPending),
            "REFUNDED" => Some(Self::Refunded),
            "RESCHEDULED" => Some(Self::Rescheduled),
            _ => None,
        }
    }

    /// Whether this booking still holds ledger capacity
    #[must_use]
    pub const fn holds_capacity(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Confirmed | Self::Completed | Self::RefundPending
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket usage status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Valid for boarding
    Active,
    /// Boarded
    Used,
    /// Void
    Cancelled,
}

impl TicketStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Used => "USED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "USED" => Some(Self::Used),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Boarding gate status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardingStatus {
    /// Not yet through the gate
    NotBoarded,
    /// Through the gate
    Boarded,
}

impl BoardingStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotBoarded => "NOT_BOARDED",
            Self::Boarded => "BOARDED",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_BOARDED" => Some(Self::NotBoarded),
            "BOARDED" => Some(Self::Boarded),
            _ => None,
        }
    }
}

/// Where a booking was made.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingChannel {
    /// Customer web / mobile
    Online,
    /// Ticket counter at the port
    Counter,
    /// Travel agent
    Agent,
}

impl BookingChannel {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Counter => "COUNTER",
            Self::Agent => "AGENT",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ONLINE" => Some(Self::Online),
            "COUNTER" => Some(Self::Counter),
            "AGENT" => Some(Self::Agent),
            _ => None,
        }
    }
}

// ============================================================================
// Request shapes
// ============================================================================

/// One passenger in a booking request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerDetails {
    /// Full name
    pub name: String,
    /// Identity document type (passport, national id, ...)
    pub id_type: Option<String>,
    /// Identity document number
    pub id_number: Option<String>,
}

impl PassengerDetails {
    /// A passenger with only a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_type: None,
            id_number: None,
        }
    }
}

/// One vehicle in a booking request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDetails {
    /// Vehicle class, which decides the ledger counter it consumes
    pub vehicle_type: VehicleType,
    /// Registration plate
    pub license_plate: String,
    /// Registered owner
    pub owner_name: Option<String>,
}

impl VehicleDetails {
    /// A vehicle with type and plate
    #[must_use]
    pub fn new(vehicle_type: VehicleType, license_plate: impl Into<String>) -> Self {
        Self {
            vehicle_type,
            license_plate: license_plate.into(),
            owner_name: None,
        }
    }
}

/// Everything needed to book one sailing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Customer
    pub user_id: UserId,
    /// Schedule to sail
    pub schedule_id: ScheduleId,
    /// Sailing date
    pub date: NaiveDate,
    /// Passengers, one ticket each
    pub passengers: Vec<PassengerDetails>,
    /// Vehicles
    pub vehicles: Vec<VehicleDetails>,
    /// Sales channel
    pub channel: BookingChannel,
}

impl BookingRequest {
    /// Checks request shape. Has no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Validation`] for an empty manifest, a blank
    /// passenger name or a blank license plate.
    pub fn validate(&self) -> Result<()> {
        if self.passengers.is_empty() {
            return Err(ReservationError::Validation(
                "a booking needs at least one passenger".to_string(),
            ));
        }
        if let Some(index) = self.passengers.iter().position(|p| p.name.trim().is_empty()) {
            return Err(ReservationError::Validation(format!(
                "passenger {} has no name",
                index + 1
            )));
        }
        if let Some(index) = self
            .vehicles
            .iter()
            .position(|v| v.license_plate.trim().is_empty())
        {
            return Err(ReservationError::Validation(format!(
                "vehicle {} has no license plate",
                index + 1
            )));
        }
        u32::try_from(self.passengers.len())
            .map_err(|_| ReservationError::Validation("too many passengers".to_string()))?;
        Ok(())
    }

    /// Ledger counters this request consumes.
    #[must_use]
    pub fn capacity_delta(&self) -> CategoryCounts {
        #[allow(clippy::cast_possible_truncation)] // bounded by validate()
        let passengers = self.passengers.len() as u32;
        CategoryCounts::from_manifest(passengers, self.vehicles.iter().map(|v| v.vehicle_type))
    }

    /// Ledger row this request targets.
    #[must_use]
    pub const fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.schedule_id, self.date)
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// One passenger seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket code
    pub ticket_code: String,
    /// Owning booking
    pub booking_id: BookingId,
    /// QR payload scanned at the gate
    pub qr_code: String,
    /// Passenger
    pub passenger: PassengerDetails,
    /// Gate status
    pub boarding_status: BoardingStatus,
    /// Usage status
    pub status: TicketStatus,
    /// Checked in at the counter or gate
    pub checked_in: bool,
    /// When the passenger boarded
    pub boarding_time: Option<DateTime<Utc>>,
}

/// One vehicle slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Owning booking
    pub booking_id: BookingId,
    /// Vehicle data
    pub details: VehicleDetails,
}

/// A booking with its owned tickets and vehicles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Identifier
    pub id: BookingId,
    /// Unique shareable code
    pub booking_code: String,
    /// Customer
    pub user_id: UserId,
    /// Schedule
    pub schedule_id: ScheduleId,
    /// Sailing date
    pub booking_date: NaiveDate,
    /// Number of passengers (equals tickets.len())
    pub passenger_count: u32,
    /// Number of vehicles (equals vehicles.len())
    pub vehicle_count: u32,
    /// Price fixed at booking time
    pub total_amount: Money,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Set on cancellation
    pub cancellation_reason: Option<String>,
    /// Sales channel
    pub channel: BookingChannel,
    /// Tickets in passenger order
    pub tickets: Vec<Ticket>,
    /// Vehicles in request order
    pub vehicles: Vec<Vehicle>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Builds a PENDING booking from a validated request.
    #[must_use]
    pub fn pending(
        request: &BookingRequest,
        booking_code: String,
        total_amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        let id = BookingId::new();
        let tickets = request
            .passengers
            .iter()
            .enumerate()
            .map(|(index, passenger)| {
                let ticket_code = ticket_code(&booking_code, index);
                Ticket {
                    qr_code: qr_payload(&ticket_code),
                    ticket_code,
                    booking_id: id,
                    passenger: passenger.clone(),
                    boarding_status: BoardingStatus::NotBoarded,
                    status: TicketStatus::Active,
                    checked_in: false,
                    boarding_time: None,
                }
            })
            .collect::<Vec<_>>();
        let vehicles = request
            .vehicles
            .iter()
            .map(|details| Vehicle {
                booking_id: id,
                details: details.clone(),
            })
            .collect::<Vec<_>>();

        #[allow(clippy::cast_possible_truncation)] // bounded by BookingRequest::validate
        let (passenger_count, vehicle_count) = (tickets.len() as u32, vehicles.len() as u32);
        Self {
            id,
            booking_code,
            user_id: request.user_id,
            schedule_id: request.schedule_id,
            booking_date: request.date,
            passenger_count,
            vehicle_count,
            total_amount,
            status: BookingStatus::Pending,
            cancellation_reason: None,
            channel: request.channel,
            tickets,
            vehicles,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ledger row this booking consumes.
    #[must_use]
    pub const fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.schedule_id, self.booking_date)
    }

    /// The exact counters this booking reserved.
    #[must_use]
    pub fn capacity_delta(&self) -> CategoryCounts {
        CategoryCounts::from_manifest(
            self.passenger_count,
            self.vehicles.iter().map(|v| v.details.vehicle_type),
        )
    }

    /// The request that would book the same manifest on another sailing.
    #[must_use]
    pub fn rebook_request(&self, schedule_id: ScheduleId, date: NaiveDate) -> BookingRequest {
        BookingRequest {
            user_id: self.user_id,
            schedule_id,
            date,
            passengers: self.tickets.iter().map(|t| t.passenger.clone()).collect(),
            vehicles: self.vehicles.iter().map(|v| v.details.clone()).collect(),
            channel: self.channel,
        }
    }
}

// ============================================================================
// Payments
// ============================================================================

/// Opaque reference issued by the payment collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentReference(pub String);

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome reported by the payment collaborator's callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    /// Funds captured
    Success,
    /// Declined or abandoned
    Failure,
}

/// Status of one payment attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Handed to the collaborator
    Initiated,
    /// Captured
    Paid,
    /// Declined
    Failed,
    /// Money returned
    Refunded,
}

impl PaymentStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(Self::Initiated),
            "PAID" => Some(Self::Paid),
            "FAILED" => Some(Self::Failed),
            "REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// One payment attempt in a booking's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Identifier
    pub id: PaymentId,
    /// Booking paid for
    pub booking_id: BookingId,
    /// Collaborator reference
    pub reference: PaymentReference,
    /// Amount requested
    pub amount: Money,
    /// Attempt status
    pub status: PaymentStatus,
    /// When initiated
    pub created_at: DateTime<Utc>,
    /// When the collaborator reported an outcome
    pub settled_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Audit log
// ============================================================================

/// One entry of a booking's append-only audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingLogEntry {
    /// Booking
    pub booking_id: BookingId,
    /// Status before (absent for the creation entry)
    pub previous_status: Option<BookingStatus>,
    /// Status after
    pub new_status: BookingStatus,
    /// Actor class
    pub changed_by_type: ActorType,
    /// Actor identity
    pub changed_by_id: Option<Uuid>,
    /// Free-form notes (cancellation reason, payment reference, ...)
    pub notes: Option<String>,
    /// When
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Codes
// ============================================================================

/// Letters and digits that survive being read aloud or handwritten.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A new booking code: `FB` followed by eight unambiguous characters.
#[must_use]
pub fn generate_booking_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut code = String::with_capacity(10);
    code.push_str("FB");
    for _ in 0..8 {
        let index = rng.gen_range(0..CODE_ALPHABET.len());
        code.push(char::from(CODE_ALPHABET[index]));
    }
    code
}

/// Ticket code for the passenger at `index` (zero-based).
#[must_use]
pub fn ticket_code(booking_code: &str, index: usize) -> String {
    format!("{booking_code}-{:02}", index + 1)
}

/// Payload encoded into the ticket's QR code.
#[must_use]
pub fn qr_payload(ticket_code: &str) -> String {
    format!("ferry:{ticket_code}")
}
