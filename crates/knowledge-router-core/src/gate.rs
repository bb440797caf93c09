use serde::{Deserialize, Serialize};

use crate::model::{CallerContext, SecurityPolicy};

pub const ACCESS_GRANTED: &str = "access granted";
pub const PHI_ACCESS_DENIED: &str = "PHI access denied";
pub const PII_ACCESS_DENIED: &str = "PII access denied";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessDenial {
    ResidencyMismatch { required: String, actual: String },
    PhiClearanceRequired,
    PiiClearanceRequired,
}

impl AccessDenial {
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::ResidencyMismatch { required, actual } => {
                format!(
                    "residency mismatch: pack requires region `{required}`, caller is in `{actual}`"
                )
            }
            Self::PhiClearanceRequired => PHI_ACCESS_DENIED.to_string(),
            Self::PiiClearanceRequired => PII_ACCESS_DENIED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub denial: Option<AccessDenial>,
}

impl AccessDecision {
    fn granted() -> Self {
        Self { allowed: true, reason: ACCESS_GRANTED.to_string(), denial: None }
    }

    fn denied(denial: AccessDenial) -> Self {
        Self { allowed: false, reason: denial.reason(), denial: Some(denial) }
    }
}

/// Evaluate a pack's security policy for one caller.
///
/// Checks run in a fixed order (residency, PHI, PII) and the first failure
/// is returned.
#[must_use]
pub fn enforce(policy: &SecurityPolicy, caller: &CallerContext) -> AccessDecision {
    if let Some(required) = &policy.residency {
        if caller.region != *required {
            return AccessDecision::denied(AccessDenial::ResidencyMismatch {
                required: required.clone(),
                actual: caller.region.clone(),
            });
        }
    }

    if policy.phi && !caller.has_phi_clearance {
        return AccessDecision::denied(AccessDenial::PhiClearanceRequired);
    }

    if policy.pii && !caller.has_pii_clearance {
        return AccessDecision::denied(AccessDenial::PiiClearanceRequired);
    }

    AccessDecision::granted()
}
