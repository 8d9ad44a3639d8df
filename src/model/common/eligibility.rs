use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Where a question currently sits in its voting window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// The publish time has not yet been reached.
    NotYetPublished,
    /// Published, and either open-ended or not yet past its end time.
    OpenForVoting,
    /// Past its end time.
    Closed,
}

/// Decide where `now` falls relative to the window `[publish_at, end_at]`.
///
/// Both ends are inclusive: voting opens at exactly `publish_at` and is
/// still allowed at exactly `end_at`. An absent `end_at` never closes.
/// A window that ends before it starts is never open.
pub fn evaluate(
    publish_at: DateTime<Utc>,
    end_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Eligibility {
    if now < publish_at {
        return Eligibility::NotYetPublished;
    }
    match end_at {
        Some(end_at) if now > end_at => Eligibility::Closed,
        _ => Eligibility::OpenForVoting,
    }
}

impl Eligibility {
    /// Is voting currently accepted?
    pub fn can_vote(self) -> bool {
        self == Self::OpenForVoting
    }

    /// Has the question been published (whether or not voting is still open)?
    pub fn is_published(self) -> bool {
        self != Self::NotYetPublished
    }
}

/// Is the question published at `now`?
pub fn is_published(publish_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= publish_at
}

/// Was the question published within the day leading up to `now`?
/// Display only, this has no bearing on whether voting is allowed.
pub fn was_published_recently(publish_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - Duration::days(1) <= publish_at && publish_at <= now
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn before_publish_is_not_yet_published() {
        assert_eq!(evaluate(at(10), None, at(9)), Eligibility::NotYetPublished);
        assert_eq!(
            evaluate(at(10), Some(at(12)), at(9)),
            Eligibility::NotYetPublished
        );
        assert!(!is_published(at(10), at(9)));
    }

    #[test]
    fn open_ended_question_stays_open() {
        let far_future = at(10) + Duration::days(3650);
        assert_eq!(evaluate(at(10), None, at(11)), Eligibility::OpenForVoting);
        assert_eq!(evaluate(at(10), None, far_future), Eligibility::OpenForVoting);
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        assert_eq!(
            evaluate(at(10), Some(at(12)), at(10)),
            Eligibility::OpenForVoting
        );
        assert_eq!(
            evaluate(at(10), Some(at(12)), at(12)),
            Eligibility::OpenForVoting
        );
        assert!(is_published(at(10), at(10)));
    }

    #[test]
    fn after_end_is_closed() {
        let just_after = at(12) + Duration::milliseconds(1);
        assert_eq!(evaluate(at(10), Some(at(12)), just_after), Eligibility::Closed);
        assert_eq!(evaluate(at(10), Some(at(12)), at(20)), Eligibility::Closed);
    }

    #[test]
    fn inverted_window_is_never_open() {
        for hour in 0..24 {
            assert!(!evaluate(at(12), Some(at(10)), at(hour)).can_vote());
        }
    }

    #[test]
    fn derived_predicates() {
        assert!(Eligibility::OpenForVoting.can_vote());
        assert!(!Eligibility::Closed.can_vote());
        assert!(!Eligibility::NotYetPublished.can_vote());
        assert!(Eligibility::Closed.is_published());
        assert!(!Eligibility::NotYetPublished.is_published());
    }

    #[test]
    fn published_recently_with_old_question() {
        let now = at(12);
        let publish_at = now - Duration::days(1) - Duration::seconds(1);
        assert!(!was_published_recently(publish_at, now));
    }

    #[test]
    fn published_recently_with_recent_question() {
        let now = at(12);
        let publish_at = now - Duration::hours(23) - Duration::minutes(59) - Duration::seconds(59);
        assert!(was_published_recently(publish_at, now));
        assert!(was_published_recently(now - Duration::days(1), now));
        assert!(was_published_recently(now, now));
    }

    #[test]
    fn published_recently_with_future_question() {
        let now = at(12);
        assert!(!was_published_recently(now + Duration::days(30), now));
    }
}
