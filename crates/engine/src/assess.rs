//! Scores an analysis for the editor's summary view.
//!
//! The security score starts at 100 and loses points for every issue by
//! severity. The overall score weighs it against the gas efficiency of the
//! most expensive entry point on the home chain, with security counting for
//! seven tenths. Advisories about passes that did not complete carry no
//! penalty, as they say nothing about the contract itself.

use std::fmt;

use serde::Serialize;

use crate::{
    constant::PASSING_SECURITY_SCORE,
    issue::{Issue, Severity},
    pass::ANALYSIS_INCOMPLETE,
    simulate::GasReport,
};

/// The efficiency below which an analysis recommends gas work.
const EFFICIENCY_THRESHOLD: u8 = 70;

/// The security score below which an analysis recommends addressing issues.
const SECURITY_THRESHOLD: u8 = 80;

/// A coarse rating of a security score.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityLevel {
    Critical,
    Poor,
    Moderate,
    Good,
    #[default]
    Excellent,
}

impl SecurityLevel {
    #[must_use]
    pub fn of(score: u8) -> Self {
        match score {
            90.. => Self::Excellent,
            75..=89 => Self::Good,
            60..=74 => Self::Moderate,
            40..=59 => Self::Poor,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "critical",
            Self::Poor => "poor",
            Self::Moderate => "moderate",
            Self::Good => "good",
            Self::Excellent => "excellent",
        };
        write!(f, "{name}")
    }
}

/// The scores and advice derived from an analysis.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Assessment {
    /// From 0 to 100.
    pub security_score: u8,
    pub level:          SecurityLevel,

    /// From 0 to 100, weighing security against gas efficiency.
    pub overall_score: u8,

    /// Whether the security score is high enough to deploy.
    pub passed:          bool,
    pub recommendations: Vec<String>,
}

impl Default for Assessment {
    fn default() -> Self {
        assess(&[], None)
    }
}

/// Assesses the `issues` found in a module, and its `gas` on the home chain
/// where that is known.
#[must_use]
pub fn assess(issues: &[Issue], gas: Option<&GasReport>) -> Assessment {
    let findings = issues
        .iter()
        .filter(|i| i.id != ANALYSIS_INCOMPLETE)
        .collect::<Vec<_>>();

    let penalty = findings
        .iter()
        .map(|i| match i.severity {
            Severity::High => 20u32,
            Severity::Medium => 10,
            Severity::Low => 5,
        })
        .sum::<u32>();
    let security_score = u8::try_from(100u32.saturating_sub(penalty)).unwrap_or(0);
    let efficiency = gas.map_or(100, GasReport::efficiency);
    let overall = (u32::from(security_score) * 7 + u32::from(efficiency) * 3) / 10;
    let overall_score = u8::try_from(overall).unwrap_or(100);

    let mut recommendations = Vec::new();
    if findings.iter().any(|i| i.severity == Severity::High) {
        recommendations.push("Fix the high severity issues before deployment".to_string());
    }
    if security_score < SECURITY_THRESHOLD {
        recommendations.push("Address the remaining security issues before deployment".to_string());
    }
    if findings.iter().any(|i| i.id == "missing-access-control") {
        recommendations.push("Check the sender before changing privileged state".to_string());
    }
    if efficiency < EFFICIENCY_THRESHOLD {
        if let Some((function, used)) = gas.and_then(GasReport::most_expensive) {
            recommendations.push(format!(
                "Reduce the worst-case gas of {function}, which may use {used} of the {} allowed",
                gas.map_or(0, |g| g.gas_limit)
            ));
        }
    }
    if recommendations.is_empty() {
        recommendations.push("The contract appears ready for deployment".to_string());
    }

    Assessment {
        security_score,
        level: SecurityLevel::of(security_score),
        overall_score,
        passed: security_score >= PASSING_SECURITY_SCORE,
        recommendations,
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use crate::{
        assess::{assess, Assessment, SecurityLevel},
        issue::{Issue, Severity},
        pass::ANALYSIS_INCOMPLETE,
        simulate::GasReport,
    };

    #[test]
    fn a_clean_contract_scores_full_marks() {
        let assessment = Assessment::default();
        assert_eq!(assessment.security_score, 100);
        assert_eq!(assessment.overall_score, 100);
        assert_eq!(assessment.level, SecurityLevel::Excellent);
        assert!(assessment.passed);
        assert_eq!(assessment.recommendations.len(), 1);
    }

    #[test]
    fn issues_cost_points_by_severity() {
        let issues = vec![
            Issue::new("reentrancy", Severity::High, "call before update"),
            Issue::new("missing-access-control", Severity::High, "anyone can write"),
            Issue::new("unchecked-arithmetic", Severity::Medium, "may underflow"),
            Issue::new(ANALYSIS_INCOMPLETE, Severity::Low, "ran out of fuel"),
        ];
        let assessment = assess(&issues, None);

        assert_eq!(assessment.security_score, 50);
        assert_eq!(assessment.overall_score, 65);
        assert_eq!(assessment.level, SecurityLevel::Poor);
        assert!(!assessment.passed);
        assert_eq!(assessment.recommendations.len(), 3);
        assert!(assessment.recommendations[2].contains("sender"));
    }

    #[test]
    fn expensive_entry_points_are_named() {
        let gas = GasReport {
            chain:     "Aurlink VM".to_string(),
            gas_limit: 1_000,
            functions: BTreeMap::from([("A.cheap".to_string(), 100), ("A.costly".to_string(), 900)]),
        };
        let assessment = assess(&[], Some(&gas));

        assert_eq!(assessment.security_score, 100);
        assert_eq!(assessment.overall_score, 73);
        assert!(assessment.passed);
        assert_eq!(assessment.recommendations.len(), 1);
        assert!(assessment.recommendations[0].contains("A.costly"));
    }
}
