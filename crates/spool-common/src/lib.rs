// Re-export dependencies used in public interfaces of common types

use std::fmt::Display;
use std::str::FromStr;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid account type [{0}]")]
    InvalidPlanClass(String),

    #[error("Invalid tier [{0}]")]
    InvalidTier(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient allocation on {tier} tier: cannot release {requested} GB, {releasable} GB releasable")]
    InsufficientAllocation {
        tier: Tier,
        requested: u64,
        releasable: u64,
    },

    #[error("Capacity exceeded on {tier} tier: {requested} GB requested, {available} GB available")]
    CapacityExceeded {
        tier: Tier,
        requested: u64,
        available: u64,
    },

    #[error("Negative usage: {field} would drop below zero ({current} - {requested})")]
    NegativeUsage {
        field: String,
        current: u64,
        requested: u64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Partial failure during {operation} for {address}: {reason}")]
    PartialFailure {
        address: String,
        operation: String,
        reason: String,
    },
}

impl CapacityError {
    /// Only transient store failures are worth a caller-driven retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CapacityError::StoreUnavailable(_))
    }

    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CapacityError::NotFound(_) => "not_found",
            CapacityError::AlreadyExists(_) => "already_exists",
            CapacityError::InvalidPlanClass(_) => "invalid_plan_class",
            CapacityError::InvalidTier(_) => "invalid_tier",
            CapacityError::InvalidArgument(_) => "invalid_argument",
            CapacityError::InsufficientAllocation { .. } => "insufficient_allocation",
            CapacityError::CapacityExceeded { .. } => "capacity_exceeded",
            CapacityError::NegativeUsage { .. } => "negative_usage",
            CapacityError::StoreUnavailable(_) => "store_unavailable",
            CapacityError::PartialFailure { .. } => "partial_failure",
        }
    }
}

// Define the primary Result type for capacity operations
pub type Result<T> = std::result::Result<T, CapacityError>;

/// Logical storage tier a file can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Shared storage pool funded by monthly subscribers
    #[serde(alias = "spool")]
    Pool,
    /// Fixed-cost object storage funded by fixed-amount subscribers
    #[serde(alias = "aws")]
    Fixed,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Pool, Tier::Fixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Pool => "pool",
            Tier::Fixed => "fixed",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = CapacityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pool" | "spool" => Ok(Tier::Pool),
            "fixed" | "aws" => Ok(Tier::Fixed),
            other => Err(CapacityError::InvalidTier(other.to_string())),
        }
    }
}

/// Subscription category of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanClass {
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "fixed1", alias = "fixed_amount_1")]
    FixedAmount1,
    #[serde(rename = "fixed2", alias = "fixed_amount_2")]
    FixedAmount2,
}

impl PlanClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanClass::Monthly => "monthly",
            PlanClass::FixedAmount1 => "fixed1",
            PlanClass::FixedAmount2 => "fixed2",
        }
    }

    pub fn is_fixed_amount(&self) -> bool {
        !matches!(self, PlanClass::Monthly)
    }
}

impl Display for PlanClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanClass {
    type Err = CapacityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monthly" => Ok(PlanClass::Monthly),
            "fixed1" | "fixed_amount_1" => Ok(PlanClass::FixedAmount1),
            "fixed2" | "fixed_amount_2" => Ok(PlanClass::FixedAmount2),
            other => Err(CapacityError::InvalidPlanClass(other.to_string())),
        }
    }
}

/// Uniform response wrapper returned by every exposed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl<T> From<&CapacityError> for Envelope<T> {
    fn from(err: &CapacityError) -> Self {
        Envelope::failure(err.to_string())
    }
}
