//! Integration tests for the cloud connection policy
//!
//! These drive the policy purely through its public setters, the way the
//! router does: feed it foreground and device-link changes and act only on
//! the directives it returns.

use visor_core::policy::{ConnectionPolicy, PolicyDirective};

/// Reach an arbitrary (foreground, link) state through the public API
fn policy_in(foreground: bool, link: bool) -> ConnectionPolicy {
    let mut policy = ConnectionPolicy::new(foreground);
    policy.set_device_link(link);
    policy
}

#[test]
fn desire_is_the_or_of_both_inputs() {
    assert!(!policy_in(false, false).desired());
    assert!(policy_in(true, false).desired());
    assert!(policy_in(false, true).desired());
    assert!(policy_in(true, true).desired());
}

#[test]
fn accessors_track_each_input_separately() {
    let policy = policy_in(true, false);
    assert!(policy.foreground_active());
    assert!(!policy.device_link_active());

    let policy = policy_in(false, true);
    assert!(!policy.foreground_active());
    assert!(policy.device_link_active());
}

#[test]
fn directives_appear_only_on_desire_transitions() {
    let mut policy = ConnectionPolicy::new(false);

    // Nothing wanted yet; repeating the state is silent.
    assert_eq!(policy.set_foreground(false), None);
    assert_eq!(policy.set_device_link(false), None);

    // First reason to be up connects; the second is silent.
    assert_eq!(policy.set_foreground(true), Some(PolicyDirective::Connect));
    assert_eq!(policy.set_device_link(true), None);
    assert_eq!(policy.set_foreground(true), None);

    // Losing one reason with the other still up is silent.
    assert_eq!(policy.set_foreground(false), None);

    // Losing the last reason disconnects, exactly once.
    assert_eq!(policy.set_device_link(false), Some(PolicyDirective::Disconnect));
    assert_eq!(policy.set_device_link(false), None);
}

#[test]
fn glance_session_lifecycle() {
    // User opens the companion app, puts the glasses on, switches away,
    // then takes the glasses off. One connect, one disconnect.
    let mut policy = ConnectionPolicy::new(false);
    let mut directives = Vec::new();

    directives.extend(policy.set_foreground(true));
    directives.extend(policy.set_device_link(true));
    directives.extend(policy.set_foreground(false));
    directives.extend(policy.set_device_link(false));

    assert_eq!(
        directives,
        vec![PolicyDirective::Connect, PolicyDirective::Disconnect]
    );
}

#[test]
fn flapping_link_reconnects_each_time() {
    let mut policy = ConnectionPolicy::new(false);

    for _ in 0..3 {
        assert_eq!(policy.set_device_link(true), Some(PolicyDirective::Connect));
        assert_eq!(
            policy.set_device_link(false),
            Some(PolicyDirective::Disconnect)
        );
    }
}
