//! Value objects shared by every part of the reservation core.
//!
//! Identifiers are UUID newtypes, money is stored in integer cents, and
//! capacity is tracked per [`Category`] through [`CategoryCounts`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a recurring schedule
    ScheduleId
);
uuid_id!(
    /// Unique identifier for a route (origin/destination pair with pricing)
    RouteId
);
uuid_id!(
    /// Unique identifier for a ferry (vessel with per-category capacity)
    FerryId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a customer account
    UserId
);
uuid_id!(
    /// Unique identifier for a payment attempt
    PaymentId
);
uuid_id!(
    /// Unique identifier for a refund
    RefundId
);

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Capacity categories
// ============================================================================

/// Vehicle classes a ferry can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleType {
    /// Motorcycle
    Motorcycle,
    /// Passenger car
    Car,
    /// Bus
    Bus,
    /// Truck
    Truck,
}

impl VehicleType {
    /// Database / wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Motorcycle => "MOTORCYCLE",
            Self::Car => "CAR",
            Self::Bus => "BUS",
            Self::Truck => "TRUCK",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MOTORCYCLE" => Some(Self::Motorcycle),
            "CAR" => Some(Self::Car),
            "BUS" => Some(Self::Bus),
            "TRUCK" => Some(Self::Truck),
            _ => None,
        }
    }

    /// The ledger counter this vehicle consumes
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Motorcycle => Category::Motorcycle,
            Self::Car => Category::Car,
            Self::Bus => Category::Bus,
            Self::Truck => Category::Truck,
        }
    }
}

/// A capacity category tracked by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Passenger seats
    Passenger,
    /// Motorcycle slots
    Motorcycle,
    /// Car slots
    Car,
    /// Bus slots
    Bus,
    /// Truck slots
    Truck,
}

impl Category {
    /// Every category, in the order capacity checks are evaluated.
    pub const ALL: [Self; 5] = [
        Self::Passenger,
        Self::Motorcycle,
        Self::Car,
        Self::Bus,
        Self::Truck,
    ];

    /// Lowercase name used in logs and metrics labels
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Passenger => "passenger",
            Self::Motorcycle => "motorcycle",
            Self::Car => "car",
            Self::Bus => "bus",
            Self::Truck => "truck",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One number per capacity category.
///
/// Used for three things: a ferry's capacity, a ledger row's running totals,
/// and the delta a booking reserves or releases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryCounts {
    /// Passengers
    pub passengers: u32,
    /// Motorcycles
    pub motorcycles: u32,
    /// Cars
    pub cars: u32,
    /// Buses
    pub buses: u32,
    /// Trucks
    pub trucks: u32,
}

impl CategoryCounts {
    /// All categories at zero
    pub const ZERO: Self = Self {
        passengers: 0,
        motorcycles: 0,
        cars: 0,
        buses: 0,
        trucks: 0,
    };

    /// Read one category
    #[must_use]
    pub const fn get(&self, category: Category) -> u32 {
        match category {
            Category::Passenger => self.passengers,
            Category::Motorcycle => self.motorcycles,
            Category::Car => self.cars,
            Category::Bus => self.buses,
            Category::Truck => self.trucks,
        }
    }

    /// Mutable access to one category
    pub const fn get_mut(&mut self, category: Category) -> &mut u32 {
        match category {
            Category::Passenger => &mut self.passengers,
            Category::Motorcycle => &mut self.motorcycles,
            Category::Car => &mut self.cars,
            Category::Bus => &mut self.buses,
            Category::Truck => &mut self.trucks,
        }
    }

    /// Builds a delta from a passenger count and a list of vehicle types.
    #[must_use]
    pub fn from_manifest(passengers: u32, vehicles: impl IntoIterator<Item = VehicleType>) -> Self {
        let mut counts = Self {
            passengers,
            ..Self::ZERO
        };
        for vehicle in vehicles {
            *counts.get_mut(vehicle.category()) += 1;
        }
        counts
    }

    /// Number of vehicles across all vehicle categories
    #[must_use]
    pub const fn vehicle_total(&self) -> u32 {
        self.motorcycles + self.cars + self.buses + self.trucks
    }

    /// True when every category is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.passengers == 0 && self.vehicle_total() == 0
    }

    /// Per-category subtraction floored at zero
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        let mut result = *self;
        for category in Category::ALL {
            let slot = result.get_mut(category);
            *slot = slot.saturating_sub(other.get(category));
        }
        result
    }
}

// ============================================================================
// Actors
// ============================================================================

/// Who initiated a state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorType {
    /// Self-service customer
    User,
    /// Back-office administrator
    Admin,
    /// Port / vessel operator staff
    Operator,
    /// The system itself (payment callbacks, sweeps, compensation)
    System,
}

impl ActorType {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
            Self::Operator => "OPERATOR",
            Self::System => "SYSTEM",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "ADMIN" => Some(Self::Admin),
            "OPERATOR" => Some(Self::Operator),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }

    /// Staff actors may override self-service restrictions
    #[must_use]
    pub const fn is_staff(&self) -> bool {
        matches!(self, Self::Admin | Self::Operator)
    }
}

/// An actor with an optional identity (the system has none).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Actor class
    pub kind: ActorType,
    /// Account identifier, if any
    pub id: Option<Uuid>,
}

impl Actor {
    /// A customer acting on their own booking
    #[must_use]
    pub const fn user(id: UserId) -> Self {
        Self {
            kind: ActorType::User,
            id: Some(id.0),
        }
    }

    /// An administrator
    #[must_use]
    pub const fn admin(id: Uuid) -> Self {
        Self {
            kind: ActorType::Admin,
            id: Some(id),
        }
    }

    /// An operator
    #[must_use]
    pub const fn operator(id: Uuid) -> Self {
        Self {
            kind: ActorType::Operator,
            id: Some(id),
        }
    }

    /// The system
    #[must_use]
    pub const fn system() -> Self {
        Self {
            kind: ActorType::System,
            id: None,
        }
    }
}
