//! Adversarial scenarios for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: Cloned relics in other holders' hands and on the ground
    DupeExploit,

    /// DST-002: Class flipped without re-signing, plus a blank forgery
    ForgedClass,

    /// DST-003: More crafters than free slots
    CapacityRush,

    /// DST-004: A relic vanishes untracked and is declared destroyed
    MissingConvergence,

    /// DST-005: A holder stays offline across many scans
    OfflineExemption,

    /// DST-006: A relic in a double container is seen from both halves
    DoubleContainer,

    /// DST-007: Automation moves a relic, then it drifts untracked
    HopperDrift,

    /// DST-008: Revoking a relic whose holder is offline
    OfflineRevocation,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::DupeExploit,
            ScenarioId::ForgedClass,
            ScenarioId::CapacityRush,
            ScenarioId::MissingConvergence,
            ScenarioId::OfflineExemption,
            ScenarioId::DoubleContainer,
            ScenarioId::HopperDrift,
            ScenarioId::OfflineRevocation,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::DupeExploit => "dupe_exploit",
            ScenarioId::ForgedClass => "forged_class",
            ScenarioId::CapacityRush => "capacity_rush",
            ScenarioId::MissingConvergence => "missing_convergence",
            ScenarioId::OfflineExemption => "offline_exemption",
            ScenarioId::DoubleContainer => "double_container",
            ScenarioId::HopperDrift => "hopper_drift",
            ScenarioId::OfflineRevocation => "offline_revocation",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::DupeExploit => "Clones in two inventories and on the ground; only the recorded copy survives",
            ScenarioId::ForgedClass => "Unsigned class flip and a blank forgery are both confiscated",
            ScenarioId::CapacityRush => "N crafters race for 4 restricted slots; no id is wasted",
            ScenarioId::MissingConvergence => "Untracked loss is declared destroyed on exactly the Nth scheduled scan",
            ScenarioId::OfflineExemption => "Relics of an offline holder are never penalised",
            ScenarioId::DoubleContainer => "Both halves of a double chest report one relic once",
            ScenarioId::HopperDrift => "Position drift through automation is not a duplicate",
            ScenarioId::OfflineRevocation => "Revocation is deferred until the holder reconnects",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dupe_exploit" | "dupeexploit" | "dst-001" => Ok(ScenarioId::DupeExploit),
            "forged_class" | "forgedclass" | "dst-002" => Ok(ScenarioId::ForgedClass),
            "capacity_rush" | "capacityrush" | "dst-003" => Ok(ScenarioId::CapacityRush),
            "missing_convergence" | "missingconvergence" | "dst-004" => {
                Ok(ScenarioId::MissingConvergence)
            }
            "offline_exemption" | "offlineexemption" | "dst-005" => Ok(ScenarioId::OfflineExemption),
            "double_container" | "doublecontainer" | "dst-006" => Ok(ScenarioId::DoubleContainer),
            "hopper_drift" | "hopperdrift" | "dst-007" => Ok(ScenarioId::HopperDrift),
            "offline_revocation" | "offlinerevocation" | "dst-008" => {
                Ok(ScenarioId::OfflineRevocation)
            }
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("DST-003".parse::<ScenarioId>(), Ok(ScenarioId::CapacityRush));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
