mod common;

use std::collections::HashSet;

use common::{admin, operator, record_in, tracker};
use sample_tracker::{AssignOutcome, RecordStatus, TrackerError};

#[test]
fn near_duplicate_needs_confirmation_before_writing() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);

    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    let b = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    tracker.assign_chassis(&actor, b.id, "VIN123", true).unwrap();

    let outcome = tracker.assign_chassis(&actor, a.id, "VIN456", false).unwrap();
    match outcome {
        AssignOutcome::ConfirmationRequired { matches } => {
            let ids: Vec<i64> = matches.iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![b.id], "B should be reported as the match");
        }
        other => panic!("expected confirmation request, got {:?}", other),
    }

    let unchanged = tracker.database().get_record(a.id).unwrap().unwrap();
    assert_eq!(unchanged.status, RecordStatus::AwaitingChassis);
    assert_eq!(unchanged.chassis_no, None, "Nothing may be written before confirmation");

    let outcome = tracker.assign_chassis(&actor, a.id, "VIN456", true).unwrap();
    let AssignOutcome::Assigned { record } = outcome else {
        panic!("override should write the chassis number");
    };
    assert_eq!(record.status, RecordStatus::SentForTesting);
    assert_eq!(record.chassis_no.as_deref(), Some("VIN456"));
    assert!(record.selection_date.is_some(), "Selection date should be stamped");
}

#[test]
fn reused_chassis_is_a_conflict_even_with_override() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);

    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    let c = record_in(&tracker, "Bursa", "Other Co", Some("Y"), "T9");
    tracker.assign_chassis(&actor, a.id, "VIN456", false).unwrap();

    for confirm_override in [false, true] {
        let err = tracker
            .assign_chassis(&actor, c.id, "VIN456", confirm_override)
            .unwrap_err();
        assert!(
            matches!(err, TrackerError::Conflict(_)),
            "expected conflict, got {:?}",
            err
        );
    }

    let c = tracker.database().get_record(c.id).unwrap().unwrap();
    assert_eq!(c.status, RecordStatus::AwaitingChassis, "C must be left unchanged");
    assert_eq!(c.chassis_no, None);
}

#[test]
fn duplicate_warning_comes_before_chassis_conflict() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);

    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    let b = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    tracker.assign_chassis(&actor, a.id, "VIN1", true).unwrap();

    match tracker.assign_chassis(&actor, b.id, "VIN1", false).unwrap() {
        AssignOutcome::ConfirmationRequired { matches } => {
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].id, a.id, "A should be reported as the match");
        }
        other => panic!("expected confirmation request, got {:?}", other),
    }

    let err = tracker.assign_chassis(&actor, b.id, "VIN1", true).unwrap_err();
    assert!(
        matches!(err, TrackerError::Conflict(_)),
        "Confirming does not bypass uniqueness, got {:?}",
        err
    );
    let b = tracker.database().get_record(b.id).unwrap().unwrap();
    assert_eq!(b.status, RecordStatus::AwaitingChassis);
}

#[test]
fn chassis_numbers_are_normalised() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);

    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    let c = record_in(&tracker, "Ankara", "Beta", None, "T2");
    tracker.assign_chassis(&actor, a.id, "  vin789 ", false).unwrap();

    let record = tracker.database().get_record(a.id).unwrap().unwrap();
    assert_eq!(record.chassis_no.as_deref(), Some("VIN789"));

    let err = tracker.assign_chassis(&actor, c.id, "Vin789", true).unwrap_err();
    assert!(matches!(err, TrackerError::Conflict(_)));
}

#[test]
fn empty_chassis_is_a_validation_error() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);
    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");

    let err = tracker.assign_chassis(&actor, a.id, "   ", true).unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));
}

#[test]
fn chassis_can_only_be_assigned_once() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);
    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    tracker.assign_chassis(&actor, a.id, "VIN1", false).unwrap();

    let err = tracker.assign_chassis(&actor, a.id, "VIN2", true).unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));
}

#[test]
fn missing_record_is_not_found() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);

    let err = tracker.assign_chassis(&actor, 404, "VIN1", false).unwrap_err();
    assert!(matches!(err, TrackerError::NotFound(_)));
}

#[test]
fn records_without_brand_match_each_other() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);
    let a = record_in(&tracker, "Ankara", "Acme", None, "T1");
    record_in(&tracker, "Ankara", "Acme", None, "T1");
    record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");

    match tracker.assign_chassis(&actor, a.id, "VIN1", false).unwrap() {
        AssignOutcome::ConfirmationRequired { matches } => {
            assert_eq!(matches.len(), 1, "Only the brandless record matches");
        }
        other => panic!("expected confirmation request, got {:?}", other),
    }
}

#[test]
fn assigned_chassis_numbers_stay_unique() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);
    let ids: Vec<i64> = (0..6)
        .map(|i| record_in(&tracker, "Ankara", "Acme", Some("X"), &format!("T{}", i % 2)).id)
        .collect();

    let attempts = ["VIN1", "VIN2", "vin1", "VIN3", "VIN2 ", "VIN4"];
    for (id, chassis) in ids.iter().zip(attempts) {
        let _ = tracker.assign_chassis(&actor, *id, chassis, true);
    }

    let assigned: Vec<String> = tracker
        .records(None)
        .unwrap()
        .into_iter()
        .filter_map(|r| r.chassis_no)
        .collect();
    let distinct: HashSet<&String> = assigned.iter().collect();
    assert_eq!(assigned.len(), 4);
    assert_eq!(distinct.len(), assigned.len(), "Chassis numbers must be unique");
}

#[test]
fn operator_cannot_assign_outside_region() {
    let (tracker, _) = tracker();
    let bursa = operator(&tracker, "bursa_op", "Bursa", false);
    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");

    let err = tracker.assign_chassis(&bursa, a.id, "VIN1", false).unwrap_err();
    assert!(matches!(err, TrackerError::Forbidden(_)));
}

#[test]
fn status_transitions_follow_the_lifecycle() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);
    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");

    let err = tracker
        .update_status(&actor, a.id, RecordStatus::CompletedPositive, None)
        .unwrap_err();
    assert!(
        matches!(err, TrackerError::Validation(_)),
        "A record awaiting a chassis cannot be completed"
    );

    let err = tracker
        .update_status(&actor, a.id, RecordStatus::SentForTesting, None)
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));

    tracker.assign_chassis(&actor, a.id, "VIN1", false).unwrap();
    let record = tracker
        .update_status(&actor, a.id, RecordStatus::CompletedNegative, Some("brake test failed"))
        .unwrap();
    assert_eq!(record.status, RecordStatus::CompletedNegative);
    assert_eq!(record.notes.as_deref(), Some("brake test failed"));

    let err = tracker
        .update_status(&actor, a.id, RecordStatus::Rejected, None)
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)), "Closed records are frozen");
}

#[test]
fn awaiting_record_can_be_rejected() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);
    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");

    let record = tracker
        .update_status(&actor, a.id, RecordStatus::Rejected, Some("incomplete file"))
        .unwrap();
    assert_eq!(record.status, RecordStatus::Rejected);
}

#[test]
fn deletion_request_round_trip() {
    let (tracker, notifier) = tracker();
    let actor = admin(&tracker);
    let ankara = operator(&tracker, "ankara_op", "Ankara", false);
    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    let b = record_in(&tracker, "Ankara", "Acme", Some("X"), "T2");
    notifier.clear();

    let err = tracker.request_deletion(&ankara, a.id, "  ").unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)), "A reason is required");

    let flagged = tracker.request_deletion(&ankara, a.id, "entered twice").unwrap();
    assert!(flagged.deletion_requested);
    assert_eq!(flagged.deletion_reason.as_deref(), Some("entered twice"));
    assert_eq!(notifier.sent_to(common::ADMIN_MAIL).len(), 1);

    tracker.request_deletion(&ankara, b.id, "wrong type").unwrap();
    assert_eq!(tracker.deletion_requests(&actor).unwrap().len(), 2);

    let err = tracker.deletion_requests(&ankara).unwrap_err();
    assert!(matches!(err, TrackerError::Forbidden(_)));

    let removed = tracker.approve_deletion(&actor, a.id).unwrap();
    assert_eq!(removed.id, a.id);
    assert!(tracker.database().get_record(a.id).unwrap().is_none());

    let kept = tracker.reject_deletion(&actor, b.id).unwrap();
    assert!(!kept.deletion_requested);
    assert_eq!(kept.deletion_reason, None);

    let err = tracker.approve_deletion(&actor, b.id).unwrap_err();
    assert!(
        matches!(err, TrackerError::Validation(_)),
        "Only flagged records can be purged"
    );
}

#[test]
fn operators_read_everything_but_work_in_scope() {
    let (tracker, _) = tracker();
    let ankara = operator(&tracker, "ankara_op", "Ankara", false);
    record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    record_in(&tracker, "Bursa", "Beta", Some("Y"), "T2");

    let mut own = common::new_record("Gamma", None, "T3");
    own.region = Some("İzmir".to_string());
    tracker.create_record(&ankara, own).unwrap();

    assert_eq!(tracker.records(None).unwrap().len(), 3);

    let workable = tracker.workable_records(&ankara, None).unwrap();
    let companies: Vec<&str> = workable.iter().map(|r| r.company_name.as_str()).collect();
    assert_eq!(companies, vec!["Gamma", "Acme"], "Own region and own entries, newest first");

    let found = tracker.records(Some("beta")).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].region, "Bursa");
}

#[test]
fn manual_entry_rules() {
    let (tracker, notifier) = tracker();
    let actor = admin(&tracker);
    let ankara = operator(&tracker, "ankara_op", "Ankara", false);
    notifier.clear();

    let err = tracker
        .create_record(&actor, common::new_record("Acme", None, "T1"))
        .unwrap_err();
    assert!(
        matches!(err, TrackerError::Validation(_)),
        "An all-regions actor must name a region"
    );

    let err = tracker
        .create_record(&ankara, common::new_record("", None, "T1"))
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));

    let mut new = common::new_record("Acme", None, "T1");
    new.application_no = Some("APP-1".to_string());
    let record = tracker.create_record(&ankara, new.clone()).unwrap();
    assert_eq!(record.region, "Ankara", "Region defaults to the actor's");
    assert_eq!(record.status, RecordStatus::AwaitingChassis);
    assert_eq!(record.created_by.as_deref(), Some("ankara_op"));
    assert_eq!(notifier.sent_to("ankara_op@example.com").len(), 1);

    let err = tracker.create_record(&ankara, new).unwrap_err();
    assert!(matches!(err, TrackerError::Conflict(_)));

    let mut lowercase = common::new_record("Acme", None, "T2");
    lowercase.region = Some("istanbul".to_string());
    let record = tracker.create_record(&actor, lowercase).unwrap();
    assert_eq!(record.region, "İstanbul");
}

#[test]
fn dashboard_counts() {
    let (tracker, _) = tracker();
    let actor = admin(&tracker);
    let ankara = operator(&tracker, "ankara_op", "Ankara", false);
    let a = record_in(&tracker, "Ankara", "Acme", Some("X"), "T1");
    record_in(&tracker, "Ankara", "Beta", Some("X"), "T1");
    tracker.assign_chassis(&actor, a.id, "VIN1", false).unwrap();

    let board = tracker.dashboard(&actor).unwrap();
    assert_eq!(board.total, 2);
    assert_eq!(board.awaiting_chassis, 1);
    assert_eq!(board.sent_for_testing, 1);
    assert_eq!(board.completed_positive, 0);
    assert_eq!(board.pending_approvals, Some(0));
    assert_eq!(board.deletion_requests, Some(0));

    let board = tracker.dashboard(&ankara).unwrap();
    assert_eq!(board.pending_approvals, None, "Admin-only counts are hidden");
}
