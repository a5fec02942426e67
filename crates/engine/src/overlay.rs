use crate::{EngineError, Result};
use regcheck_protocol::{requirement_key, unix_now_ms, CheckResult, FeedbackOverride};
use regcheck_store::FeedbackLog;
use std::collections::HashMap;
use std::sync::Arc;

/// A correction submitted by a reviewer.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FeedbackRequest {
    pub requirement: String,
    pub scenario: String,
    pub invoice_type: String,
    #[serde(default)]
    pub present_override: Option<bool>,
    #[serde(default)]
    pub evidence_override: Option<String>,
}

/// Durable human corrections layered over oracle verdicts.
#[derive(Clone)]
pub struct FeedbackOverlay {
    log: Arc<FeedbackLog>,
}

impl FeedbackOverlay {
    pub fn new(log: Arc<FeedbackLog>) -> Self {
        Self { log }
    }

    pub async fn record(&self, request: FeedbackRequest) -> Result<FeedbackOverride> {
        if request.requirement.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "requirement must not be blank".into(),
            ));
        }
        let key = requirement_key(&request.requirement);
        if key.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "requirement {:?} is empty once punctuation is removed",
                request.requirement
            )));
        }

        let record = FeedbackOverride {
            requirement_key: key,
            scenario: request.scenario.trim().to_string(),
            invoice_type: request.invoice_type.trim().to_string(),
            present_override: request.present_override,
            evidence_override: request
                .evidence_override
                .filter(|e| !e.trim().is_empty()),
            created_at_unix_ms: unix_now_ms(),
        };
        self.log.append(&record).await?;
        Ok(record)
    }

    pub async fn overrides_for(
        &self,
        scenario: &str,
        invoice_type: &str,
    ) -> Result<Vec<FeedbackOverride>> {
        Ok(self.log.load_for(scenario, invoice_type).await?)
    }

    pub async fn apply(
        &self,
        checks: &mut [CheckResult],
        scenario: &str,
        invoice_type: &str,
    ) -> Result<()> {
        let overrides = self.overrides_for(scenario, invoice_type).await?;
        apply_overrides(checks, &overrides);
        Ok(())
    }
}

/// Overwrite `present` and `evidence` from the effective override of each check's key.
///
/// `overrides` must already be restricted to one scenario and invoice type. Per key, the most
/// recently created override wins; on equal timestamps the one later in the slice wins.
pub fn apply_overrides(checks: &mut [CheckResult], overrides: &[FeedbackOverride]) {
    if overrides.is_empty() {
        return;
    }
    let mut effective: HashMap<&str, &FeedbackOverride> = HashMap::new();
    for fix in overrides {
        effective
            .entry(fix.requirement_key.as_str())
            .and_modify(|current| {
                if fix.created_at_unix_ms >= current.created_at_unix_ms {
                    *current = fix;
                }
            })
            .or_insert(fix);
    }

    for check in checks {
        let Some(fix) = effective.get(requirement_key(&check.requirement).as_str()) else {
            continue;
        };
        if let Some(present) = fix.present_override {
            check.present = present;
        }
        if let Some(evidence) = fix
            .evidence_override
            .as_deref()
            .filter(|e| !e.trim().is_empty())
        {
            check.evidence = evidence.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fix(key: &str, present: Option<bool>, evidence: Option<&str>, at: u64) -> FeedbackOverride {
        FeedbackOverride {
            requirement_key: key.into(),
            scenario: "s".into(),
            invoice_type: "t".into(),
            present_override: present,
            evidence_override: evidence.map(str::to_string),
            created_at_unix_ms: at,
        }
    }

    #[test]
    fn latest_created_override_wins_regardless_of_order() {
        let mut checks = vec![CheckResult::new("Invoice Date!", false)];
        apply_overrides(
            &mut checks,
            &[
                fix("invoice date", Some(true), Some("newer"), 20),
                fix("invoice date", Some(false), Some("older"), 10),
            ],
        );
        assert!(checks[0].present);
        assert_eq!(checks[0].evidence, "newer");
    }

    #[test]
    fn ties_go_to_the_later_record() {
        let mut checks = vec![CheckResult::new("invoice date", false)];
        apply_overrides(
            &mut checks,
            &[
                fix("invoice date", Some(false), None, 10),
                fix("invoice date", Some(true), None, 10),
            ],
        );
        assert!(checks[0].present);
    }

    #[test]
    fn blank_evidence_and_absent_present_leave_fields_alone() {
        let mut check = CheckResult::new("seller", true);
        check.evidence = "from oracle".into();
        let mut checks = vec![check];
        apply_overrides(&mut checks, &[fix("seller", None, Some("  "), 1)]);
        assert!(checks[0].present);
        assert_eq!(checks[0].evidence, "from oracle");
    }

    #[test]
    fn unrelated_checks_are_untouched() {
        let mut checks = vec![CheckResult::new("buyer", false)];
        apply_overrides(&mut checks, &[fix("seller", Some(true), None, 1)]);
        assert!(!checks[0].present);
    }

    #[tokio::test]
    async fn record_rejects_blank_requirement_and_persists_normalized_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overlay = FeedbackOverlay::new(Arc::new(FeedbackLog::new(
            dir.path().join("feedback.jsonl"),
        )));

        let err = overlay
            .record(FeedbackRequest {
                requirement: "   ".into(),
                ..Default::default()
            })
            .await
            .expect_err("blank");
        assert_eq!(err.code(), "invalid_request");

        let stored = overlay
            .record(FeedbackRequest {
                requirement: "  Invoice   DATE. ".into(),
                scenario: " TICARI ".into(),
                invoice_type: "SATIS".into(),
                present_override: Some(true),
                evidence_override: Some("".into()),
            })
            .await
            .expect("record");
        assert_eq!(stored.requirement_key, "invoice date");
        assert_eq!(stored.scenario, "TICARI");
        assert_eq!(stored.evidence_override, None);

        let mut checks = vec![CheckResult::new("Invoice date", false)];
        overlay
            .apply(&mut checks, "ticari", "satis")
            .await
            .expect("apply");
        assert!(checks[0].present);
    }
}
