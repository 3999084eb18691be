//! Retry policy properties. The policy is a pure function, so none of these
//! tests wait on real time.

use std::time::Duration;

use portalq::error::ErrorKind;
use portalq::model::Status;
use portalq::retry::{RetryPolicy, Verdict};

#[test]
fn validation_always_terminates_as_failed_validation() {
    let policy = RetryPolicy::default();
    for attempts in [1, 2, 50] {
        assert_eq!(
            policy.decide(ErrorKind::Validation, attempts),
            Verdict::Terminate {
                status: Status::FailedValidation
            }
        );
    }
}

#[test]
fn portal_business_always_terminates_as_failed_portal() {
    let policy = RetryPolicy::default();
    for attempts in [1, 2, 50] {
        assert_eq!(
            policy.decide(ErrorKind::PortalBusiness, attempts),
            Verdict::Terminate {
                status: Status::FailedPortal
            }
        );
    }
}

#[test]
fn portal_changed_is_never_auto_retried() {
    let policy = RetryPolicy::default();
    assert_eq!(
        policy.decide(ErrorKind::PortalChanged, 1),
        Verdict::Terminate {
            status: Status::FailedTech
        }
    );
}

#[test]
fn unknown_terminates_with_zero_retries() {
    let policy = RetryPolicy::default();
    assert_eq!(
        policy.decide(ErrorKind::Unknown, 1),
        Verdict::Terminate {
            status: Status::FailedTech
        }
    );
}

#[test]
fn transient_retries_within_budget_then_terminates() {
    let policy = RetryPolicy::default(); // 2 additional attempts

    assert!(matches!(
        policy.decide(ErrorKind::Transient, 1),
        Verdict::Retry { .. }
    ));
    assert!(matches!(
        policy.decide(ErrorKind::Transient, 2),
        Verdict::Retry { .. }
    ));
    // Attempt max+1 fails for good.
    assert_eq!(
        policy.decide(ErrorKind::Transient, 3),
        Verdict::Terminate {
            status: Status::FailedTech
        }
    );
}

#[test]
fn transient_delay_grows_from_the_base() {
    let policy = RetryPolicy {
        max_retries: 3,
        base_delay_secs: 2,
        max_delay_secs: 60,
    };

    assert_eq!(
        policy.decide(ErrorKind::Transient, 1),
        Verdict::Retry {
            delay: Duration::from_secs(2)
        }
    );
    assert_eq!(
        policy.decide(ErrorKind::Transient, 2),
        Verdict::Retry {
            delay: Duration::from_secs(4)
        }
    );
    assert_eq!(
        policy.decide(ErrorKind::Transient, 3),
        Verdict::Retry {
            delay: Duration::from_secs(8)
        }
    );
}

#[test]
fn same_inputs_always_produce_the_same_verdict() {
    let policy = RetryPolicy::default();
    let first = policy.decide(ErrorKind::Transient, 2);
    for _ in 0..100 {
        assert_eq!(policy.decide(ErrorKind::Transient, 2), first);
    }
}
