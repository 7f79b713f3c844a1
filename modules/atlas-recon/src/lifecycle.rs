use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use atlas_common::error::AtlasError;
use atlas_common::types::{Report, ReportState};

/// The legal next states from a given state. Everything else is an
/// `InvalidTransition` — never a silent no-op.
pub fn allowed_transitions(state: ReportState) -> &'static [ReportState] {
    match state {
        ReportState::Submitted => &[ReportState::UnderReview],
        ReportState::UnderReview => &[ReportState::Verified, ReportState::Rejected],
        ReportState::Verified => &[ReportState::Resolved],
        ReportState::Rejected | ReportState::Resolved => &[],
    }
}

/// A committed transition: the new state and the bumped version the caller
/// must use for any follow-up request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOk {
    pub new_state: ReportState,
    pub version: u64,
}

/// Validate and apply one state transition in place.
///
/// Pure with respect to shared state: validation never mutates anything,
/// and the report is only touched after every guard passes. The acting
/// identity is an explicit parameter — the engine never reads ambient
/// session state.
///
/// Guards, in order:
/// 1. Optimistic concurrency: `expected_version` must equal the stored
///    version, else `ConcurrentModificationConflict` (caller retries with
///    fresh state — never merged silently).
/// 2. The edge must exist in the transition table.
/// 3. Entering Under-Review requires at least one evidence item or the
///    report's low-confidence flag. Later states inherit the guarantee
///    from having passed through Under-Review.
///
/// On success: state and last-activity advance, the version bumps, and a
/// rejection reason (if any) is stored verbatim.
pub fn transition(
    report: &mut Report,
    evidence_count: usize,
    expected_version: u64,
    target: ReportState,
    reason: Option<String>,
    acting: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<TransitionOk, AtlasError> {
    if report.version != expected_version {
        return Err(AtlasError::ConcurrentModificationConflict {
            report_id: report.id,
            expected: expected_version,
            actual: report.version,
        });
    }

    let allowed = allowed_transitions(report.state);
    if !allowed.contains(&target) {
        return Err(AtlasError::InvalidTransition {
            from: report.state,
            to: target,
            allowed: allowed.to_vec(),
        });
    }

    if target == ReportState::UnderReview && evidence_count == 0 && !report.low_confidence {
        return Err(AtlasError::MissingEvidence {
            report_id: report.id,
        });
    }

    let from = report.state;
    report.state = target;
    report.last_activity_at = now;
    report.version += 1;
    if target == ReportState::Rejected {
        report.rejection_reason = reason;
    }

    info!(
        report_id = %report.id,
        %from,
        to = %target,
        version = report.version,
        acting = ?acting,
        "report transitioned"
    );

    Ok(TransitionOk {
        new_state: target,
        version: report.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use atlas_common::types::{AssetType, GeoPoint, ReportedStatus, ReporterType};

    fn report_in(state: ReportState) -> Report {
        Report {
            id: Uuid::new_v4(),
            asset_id: None,
            infrastructure_type: AssetType::School,
            reported_status: ReportedStatus::Broken,
            description: "roof leaking".to_string(),
            location: GeoPoint { lat: 6.4550, lng: 3.3841 },
            location_accuracy_m: None,
            reporter_type: ReporterType::Citizen,
            reporter_id: Some(Uuid::new_v4()),
            is_anonymous: false,
            low_confidence: false,
            state,
            rejection_reason: None,
            reported_at: Utc::now(),
            last_activity_at: Utc::now() - chrono::Duration::hours(1),
            version: 0,
        }
    }

    #[test]
    fn legal_path_submitted_to_resolved() {
        let mut r = report_in(ReportState::Submitted);
        let now = Utc::now();

        let ok = transition(&mut r, 1, 0, ReportState::UnderReview, None, None, now).unwrap();
        assert_eq!(ok.new_state, ReportState::UnderReview);
        assert_eq!(ok.version, 1);
        assert_eq!(r.last_activity_at, now);

        transition(&mut r, 1, 1, ReportState::Verified, None, None, now).unwrap();
        let ok = transition(&mut r, 1, 2, ReportState::Resolved, None, None, now).unwrap();
        assert_eq!(ok.new_state, ReportState::Resolved);
        assert_eq!(r.version, 3);
    }

    #[test]
    fn illegal_edge_leaves_state_unchanged() {
        let mut r = report_in(ReportState::Submitted);
        let before = r.clone();
        let err = transition(
            &mut r,
            1,
            0,
            ReportState::Resolved,
            None,
            None,
            Utc::now(),
        )
        .unwrap_err();

        match err {
            AtlasError::InvalidTransition { from, to, allowed } => {
                assert_eq!(from, ReportState::Submitted);
                assert_eq!(to, ReportState::Resolved);
                assert_eq!(allowed, vec![ReportState::UnderReview]);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        assert_eq!(r.state, before.state);
        assert_eq!(r.version, before.version);
        assert_eq!(r.last_activity_at, before.last_activity_at);
    }

    #[test]
    fn terminal_state_lists_empty_alternatives() {
        // Rejected → Under-Review fails with an empty legal set.
        let mut r = report_in(ReportState::Rejected);
        let err = transition(
            &mut r,
            1,
            0,
            ReportState::UnderReview,
            None,
            None,
            Utc::now(),
        )
        .unwrap_err();

        match err {
            AtlasError::InvalidTransition { allowed, .. } => assert!(allowed.is_empty()),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn evidence_guard_blocks_review_without_evidence() {
        let mut r = report_in(ReportState::Submitted);
        let err =
            transition(&mut r, 0, 0, ReportState::UnderReview, None, None, Utc::now()).unwrap_err();
        assert!(matches!(err, AtlasError::MissingEvidence { .. }));
        assert_eq!(r.state, ReportState::Submitted);
    }

    #[test]
    fn low_confidence_flag_unblocks_review() {
        let mut r = report_in(ReportState::Submitted);
        r.low_confidence = true;
        let ok =
            transition(&mut r, 0, 0, ReportState::UnderReview, None, None, Utc::now()).unwrap();
        assert_eq!(ok.new_state, ReportState::UnderReview);
    }

    #[test]
    fn adding_evidence_unblocks_review() {
        let mut r = report_in(ReportState::Submitted);
        assert!(
            transition(&mut r, 0, 0, ReportState::UnderReview, None, None, Utc::now()).is_err()
        );
        assert!(
            transition(&mut r, 2, 0, ReportState::UnderReview, None, None, Utc::now()).is_ok()
        );
    }

    #[test]
    fn low_confidence_report_reaches_resolved_without_evidence() {
        // The evidence gate applies only at Under-Review entry.
        let mut r = report_in(ReportState::Submitted);
        r.low_confidence = true;
        transition(&mut r, 0, 0, ReportState::UnderReview, None, None, Utc::now()).unwrap();
        transition(&mut r, 0, 1, ReportState::Verified, None, None, Utc::now()).unwrap();
        transition(&mut r, 0, 2, ReportState::Resolved, None, None, Utc::now()).unwrap();
        assert_eq!(r.state, ReportState::Resolved);
    }

    #[test]
    fn version_mismatch_is_a_conflict() {
        let mut r = report_in(ReportState::Submitted);
        r.version = 4;
        let err =
            transition(&mut r, 1, 3, ReportState::UnderReview, None, None, Utc::now()).unwrap_err();
        match err {
            AtlasError::ConcurrentModificationConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 4);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(r.state, ReportState::Submitted);
    }

    #[test]
    fn version_check_runs_before_the_table() {
        // A concurrent retry on an already-moved report gets the conflict,
        // not InvalidTransition, so the caller knows to re-read.
        let mut r = report_in(ReportState::Submitted);
        transition(&mut r, 1, 0, ReportState::UnderReview, None, None, Utc::now()).unwrap();
        let err =
            transition(&mut r, 1, 0, ReportState::UnderReview, None, None, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            AtlasError::ConcurrentModificationConflict { .. }
        ));
    }

    #[test]
    fn rejection_reason_stored_verbatim() {
        let mut r = report_in(ReportState::UnderReview);
        let reason = "  duplicate of an earlier report — see #142  ".to_string();
        transition(
            &mut r,
            1,
            0,
            ReportState::Rejected,
            Some(reason.clone()),
            Some(Uuid::new_v4()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(r.rejection_reason.as_deref(), Some(reason.as_str()));
    }
}
