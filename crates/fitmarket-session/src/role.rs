//! Marketplace roles and what each one may do.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A marketplace role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Posts training requests and books trainers.
    Client,
    /// Bids on open training requests.
    Trainer,
    /// Moderates the marketplace.
    Admin,
}

impl Role {
    /// Every role, in display order.
    pub const ALL: [Role; 3] = [Role::Client, Role::Trainer, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Trainer => "trainer",
            Role::Admin => "admin",
        }
    }

    /// Can place bids on training requests.
    pub fn can_bid(&self) -> bool {
        match self {
            Role::Trainer => true,
            Role::Client | Role::Admin => false,
        }
    }

    /// Can post new training requests.
    pub fn can_post_request(&self) -> bool {
        match self {
            Role::Client => true,
            Role::Trainer | Role::Admin => false,
        }
    }

    /// Can review a trainer after a booking.
    pub fn can_review(&self) -> bool {
        match self {
            Role::Client => true,
            Role::Trainer | Role::Admin => false,
        }
    }

    /// Can hide listings and resolve disputes.
    pub fn can_moderate(&self) -> bool {
        match self {
            Role::Admin => true,
            Role::Client | Role::Trainer => false,
        }
    }

    /// The dashboard this role lands on.
    pub fn dashboard(&self) -> Dashboard {
        match self {
            Role::Client => Dashboard::ClientRequests,
            Role::Trainer => Dashboard::TrainerMarketplace,
            Role::Admin => Dashboard::AdminOverview,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "trainer" => Ok(Role::Trainer),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::UnknownRole(s.to_string())),
        }
    }
}

/// Role-specific dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dashboard {
    /// A client's own requests and the bids on them.
    ClientRequests,
    /// Open requests a trainer can bid on.
    TrainerMarketplace,
    /// Marketplace-wide activity.
    AdminOverview,
}

impl Dashboard {
    /// Route of the dashboard.
    pub fn path(&self) -> &'static str {
        match self {
            Dashboard::ClientRequests => "/dashboard/client",
            Dashboard::TrainerMarketplace => "/dashboard/trainer",
            Dashboard::AdminOverview => "/dashboard/admin",
        }
    }

    /// Collections the dashboard keeps live subscriptions on.
    pub fn collections(&self) -> &'static [&'static str] {
        match self {
            Dashboard::ClientRequests => &["training_requests", "bids"],
            Dashboard::TrainerMarketplace => &["training_requests", "bookings"],
            Dashboard::AdminOverview => &["training_requests", "bids", "bookings", "reviews"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert_eq!(" Trainer ".parse::<Role>().unwrap(), Role::Trainer);
        assert_eq!(
            "coach".parse::<Role>(),
            Err(Error::UnknownRole("coach".to_string()))
        );
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"client\"").unwrap();
        assert_eq!(role, Role::Client);
        assert!(serde_json::from_str::<Role>("\"Client\"").is_err());
    }

    #[test]
    fn test_capabilities() {
        assert!(Role::Trainer.can_bid());
        assert!(!Role::Client.can_bid());

        assert!(Role::Client.can_post_request());
        assert!(Role::Client.can_review());
        assert!(!Role::Trainer.can_review());

        assert!(Role::Admin.can_moderate());
        assert!(!Role::Admin.can_bid());
        assert!(!Role::Admin.can_post_request());
    }

    #[test]
    fn test_dashboards() {
        assert_eq!(Role::Client.dashboard().path(), "/dashboard/client");
        assert_eq!(Role::Trainer.dashboard(), Dashboard::TrainerMarketplace);
        assert!(Role::Admin
            .dashboard()
            .collections()
            .contains(&"reviews"));
    }
}
