//! Presence transitions of a vehicle between consecutive intervals.
//!
//! Each (vehicle, interval) gets exactly one transition, and the SOC rows of
//! the model are generated from that case alone, so boundary intervals are
//! never constrained twice.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceTransition {
    /// First interval of the horizon
    Initial,
    /// Present at t-1 and t: SOC follows the charging power
    StayPresent,
    /// Present at t-1, away at t: t-1 was the departure interval
    Depart,
    /// Away at t-1 and t: SOC is frozen
    StayAbsent,
    /// Away at t-1, present at t: SOC resets to target minus the trip
    Arrive,
}

impl PresenceTransition {
    pub fn between(previous: bool, current: bool) -> Self {
        match (previous, current) {
            (true, true) => PresenceTransition::StayPresent,
            (true, false) => PresenceTransition::Depart,
            (false, false) => PresenceTransition::StayAbsent,
            (false, true) => PresenceTransition::Arrive,
        }
    }
}

/// Classify every interval of a presence series.
pub fn classify(present: &[bool]) -> Vec<PresenceTransition> {
    let mut transitions = Vec::with_capacity(present.len());
    if present.is_empty() {
        return transitions;
    }
    transitions.push(PresenceTransition::Initial);
    transitions.extend(
        present
            .windows(2)
            .map(|pair| PresenceTransition::between(pair[0], pair[1])),
    );
    transitions
}

/// Whether the end-of-horizon SOC target applies.
///
/// It binds whenever the vehicle is home at the last interval, including a
/// vehicle that only arrives there. Such an arrival leaves no interval to
/// charge, so a trip that ends below target makes the horizon infeasible.
pub fn final_target_applies(present: &[bool]) -> bool {
    present.last().copied().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use PresenceTransition::*;

    #[test]
    fn test_classify_single_trip() {
        let present = [true, true, false, false, true];
        assert_eq!(
            classify(&present),
            vec![Initial, StayPresent, Depart, StayAbsent, Arrive]
        );
    }

    #[test]
    fn test_classify_away_at_start() {
        assert_eq!(classify(&[false, true]), vec![Initial, Arrive]);
    }

    #[test]
    fn test_final_target() {
        assert!(final_target_applies(&[false, true, true]));
        assert!(final_target_applies(&[true, false, true]));
        assert!(!final_target_applies(&[true, false]));
        assert!(final_target_applies(&[true]));
        assert!(!final_target_applies(&[]));
    }

    #[test]
    fn test_classify_empty() {
        assert!(classify(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_one_transition_per_interval(present in proptest::collection::vec(any::<bool>(), 1..200)) {
            let transitions = classify(&present);
            prop_assert_eq!(transitions.len(), present.len());
            prop_assert_eq!(transitions[0], Initial);
            for t in 1..present.len() {
                let expected = PresenceTransition::between(present[t - 1], present[t]);
                prop_assert_eq!(transitions[t], expected);
            }
        }
    }
}
