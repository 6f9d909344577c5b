//! Customer journey construction
//!
//! Transforms flat session/conversion records into ordered journeys with the
//! single-attribution guarantee: every session is assigned to at most one
//! conversion, and never to a conversion that happened before it.

use attrib_common::db::{format_event_time, Conversion, Session};
use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Position of a touchpoint within its journey
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// First of several touchpoints
    Initializer,
    /// Neither first nor last
    Holder,
    /// Last of several touchpoints
    Closer,
    /// Sole touchpoint of its journey: opens and closes it
    InitializerCloser,
}

impl Role {
    pub fn is_initializer(self) -> bool {
        matches!(self, Role::Initializer | Role::InitializerCloser)
    }

    pub fn is_closer(self) -> bool {
        matches!(self, Role::Closer | Role::InitializerCloser)
    }
}

fn serialize_timestamp<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_event_time(ts))
}

/// One session in its journey position, in the scoring-service wire shape
#[derive(Debug, Clone, Serialize)]
pub struct Touchpoint {
    pub session_id: String,
    #[serde(rename = "timestamp", serialize_with = "serialize_timestamp")]
    pub event_time: NaiveDateTime,
    pub channel_name: String,
    pub role: Role,
}

/// An ordered sequence of one user's touchpoints leading to one conversion
#[derive(Debug, Clone, Serialize)]
pub struct Journey {
    pub conversion_id: String,
    pub touchpoints: Vec<Touchpoint>,
}

/// Output of journey construction
#[derive(Debug, Default)]
pub struct JourneyBuild {
    /// Non-empty journeys in conversion `(event_time, conversion_id)` order
    pub journeys: Vec<Journey>,
    /// Conversions with no eligible sessions; excluded from submission
    pub empty_conversions: Vec<String>,
}

/// Build journeys from the run window's conversions and their users'
/// sessions.
///
/// Conversions are walked in `(event_time, conversion_id)` order. Per user,
/// a cursor over the chronologically sorted sessions marks what previous
/// conversions consumed: each conversion takes every unconsumed session with
/// `event_time <= conversion.event_time` (closed upper bound, so a session
/// at exactly the conversion timestamp joins that conversion). The cursor
/// only advances, which is what makes attribution single: a later conversion
/// can never reach back past an earlier one.
pub fn build_journeys(conversions: &[Conversion], sessions: &[Session]) -> JourneyBuild {
    let mut by_user: HashMap<&str, Vec<&Session>> = HashMap::new();
    for session in sessions {
        by_user.entry(session.user_id.as_str()).or_default().push(session);
    }
    for list in by_user.values_mut() {
        list.sort_by(|a, b| {
            a.event_time
                .cmp(&b.event_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
    }

    let mut ordered: Vec<&Conversion> = conversions.iter().collect();
    ordered.sort_by(|a, b| {
        a.event_time
            .cmp(&b.event_time)
            .then_with(|| a.conversion_id.cmp(&b.conversion_id))
    });

    let mut cursors: HashMap<&str, usize> = HashMap::new();
    let mut build = JourneyBuild::default();

    for conversion in ordered {
        let user_sessions = by_user
            .get(conversion.user_id.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let cursor = cursors.entry(conversion.user_id.as_str()).or_insert(0);

        let mut assigned = Vec::new();
        while *cursor < user_sessions.len()
            && user_sessions[*cursor].event_time <= conversion.event_time
        {
            assigned.push(user_sessions[*cursor]);
            *cursor += 1;
        }

        if assigned.is_empty() {
            build.empty_conversions.push(conversion.conversion_id.clone());
            continue;
        }

        build.journeys.push(Journey {
            conversion_id: conversion.conversion_id.clone(),
            touchpoints: tag_roles(&assigned),
        });
    }

    build
}

/// Tag journey roles: first = initializer, last = closer, middle = holder;
/// a single touchpoint is both initializer and closer.
fn tag_roles(assigned: &[&Session]) -> Vec<Touchpoint> {
    let last = assigned.len() - 1;
    assigned
        .iter()
        .enumerate()
        .map(|(i, session)| {
            let role = match (i, last) {
                (0, 0) => Role::InitializerCloser,
                (0, _) => Role::Initializer,
                (i, last) if i == last => Role::Closer,
                _ => Role::Holder,
            };
            Touchpoint {
                session_id: session.session_id.clone(),
                event_time: session.event_time,
                channel_name: session.channel_name.clone(),
                role,
            }
        })
        .collect()
}

/// Partition journeys into chunks of at most `chunk_size`, preserving order.
///
/// Produces ceil(n / chunk_size) chunks covering every journey exactly once.
pub fn chunk_journeys(journeys: Vec<Journey>, chunk_size: usize) -> Vec<Vec<Journey>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(journeys.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(journeys.len()));
    for journey in journeys {
        current.push(journey);
        if current.len() == chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use attrib_common::db::parse_event_time;

    fn session(id: &str, user: &str, channel: &str, time: &str) -> Session {
        Session {
            session_id: id.to_string(),
            user_id: user.to_string(),
            channel_name: channel.to_string(),
            event_time: parse_event_time(time).unwrap(),
            cost: 1.0,
        }
    }

    fn conversion(id: &str, user: &str, time: &str) -> Conversion {
        Conversion {
            conversion_id: id.to_string(),
            user_id: user.to_string(),
            event_time: parse_event_time(time).unwrap(),
            revenue: 100.0,
        }
    }

    fn journey_sessions(journey: &Journey) -> Vec<&str> {
        journey.touchpoints.iter().map(|t| t.session_id.as_str()).collect()
    }

    #[test]
    fn sessions_split_between_consecutive_conversions() {
        // C1 at t=10 takes S1, S2; C2 at t=20 takes only S3
        let conversions = vec![
            conversion("c1", "u", "2023-09-01 00:00:10"),
            conversion("c2", "u", "2023-09-01 00:00:20"),
        ];
        let sessions = vec![
            session("s1", "u", "Email", "2023-09-01 00:00:05"),
            session("s2", "u", "Search", "2023-09-01 00:00:08"),
            session("s3", "u", "Social", "2023-09-01 00:00:15"),
        ];

        let build = build_journeys(&conversions, &sessions);
        assert_eq!(build.journeys.len(), 2);
        assert!(build.empty_conversions.is_empty());

        let j1 = &build.journeys[0];
        assert_eq!(j1.conversion_id, "c1");
        assert_eq!(journey_sessions(j1), vec!["s1", "s2"]);
        assert_eq!(j1.touchpoints[0].role, Role::Initializer);
        assert_eq!(j1.touchpoints[1].role, Role::Closer);

        let j2 = &build.journeys[1];
        assert_eq!(j2.conversion_id, "c2");
        assert_eq!(journey_sessions(j2), vec!["s3"]);
        assert_eq!(j2.touchpoints[0].role, Role::InitializerCloser);
        assert!(j2.touchpoints[0].role.is_initializer());
        assert!(j2.touchpoints[0].role.is_closer());
    }

    #[test]
    fn each_session_assigned_exactly_once() {
        let conversions = vec![
            conversion("c1", "u", "2023-09-01 12:00:00"),
            conversion("c2", "u", "2023-09-02 12:00:00"),
            conversion("c3", "u", "2023-09-03 12:00:00"),
        ];
        let sessions: Vec<Session> = (0..9)
            .map(|i| {
                session(
                    &format!("s{}", i),
                    "u",
                    "Search",
                    &format!("2023-09-0{} 06:00:00", (i / 3) + 1),
                )
            })
            .collect();

        let build = build_journeys(&conversions, &sessions);
        let mut seen = std::collections::HashSet::new();
        for journey in &build.journeys {
            for touchpoint in &journey.touchpoints {
                assert!(
                    seen.insert(touchpoint.session_id.clone()),
                    "session {} appears in more than one journey",
                    touchpoint.session_id
                );
            }
        }
        assert_eq!(seen.len(), 9);
    }

    #[test]
    fn touchpoints_never_postdate_their_conversion() {
        let conversions = vec![
            conversion("c1", "u", "2023-09-01 10:00:00"),
            conversion("c2", "u", "2023-09-01 20:00:00"),
        ];
        let sessions = vec![
            session("s1", "u", "Email", "2023-09-01 09:00:00"),
            session("s2", "u", "Search", "2023-09-01 15:00:00"),
            session("s3", "u", "Social", "2023-09-01 23:00:00"),
        ];

        let build = build_journeys(&conversions, &sessions);
        let by_id: HashMap<&str, &Conversion> = conversions
            .iter()
            .map(|c| (c.conversion_id.as_str(), c))
            .collect();
        for journey in &build.journeys {
            let conv = by_id[journey.conversion_id.as_str()];
            for touchpoint in &journey.touchpoints {
                assert!(touchpoint.event_time <= conv.event_time);
            }
        }
        // s3 happened after every conversion: assigned nowhere
        let all: Vec<&str> = build.journeys.iter().flat_map(journey_sessions).collect();
        assert!(!all.contains(&"s3"));
    }

    #[test]
    fn session_at_conversion_timestamp_joins_that_conversion() {
        let conversions = vec![
            conversion("c1", "u", "2023-09-01 10:00:00"),
            conversion("c2", "u", "2023-09-01 20:00:00"),
        ];
        let sessions = vec![session("s1", "u", "Email", "2023-09-01 10:00:00")];

        let build = build_journeys(&conversions, &sessions);
        assert_eq!(build.journeys.len(), 1);
        assert_eq!(build.journeys[0].conversion_id, "c1");
        assert_eq!(build.empty_conversions, vec!["c2".to_string()]);
    }

    #[test]
    fn identical_conversion_timestamps_break_ties_by_id() {
        // Both conversions at t=10; boundary session goes to the lower id
        let conversions = vec![
            conversion("c-b", "u", "2023-09-01 10:00:00"),
            conversion("c-a", "u", "2023-09-01 10:00:00"),
        ];
        let sessions = vec![session("s1", "u", "Email", "2023-09-01 10:00:00")];

        let build = build_journeys(&conversions, &sessions);
        assert_eq!(build.journeys.len(), 1);
        assert_eq!(build.journeys[0].conversion_id, "c-a");
        assert_eq!(build.empty_conversions, vec!["c-b".to_string()]);
    }

    #[test]
    fn role_counts_for_longer_journeys() {
        let conversions = vec![conversion("c1", "u", "2023-09-01 23:00:00")];
        let sessions: Vec<Session> = (0..5)
            .map(|i| {
                session(
                    &format!("s{}", i),
                    "u",
                    "Search",
                    &format!("2023-09-01 0{}:00:00", i),
                )
            })
            .collect();

        let build = build_journeys(&conversions, &sessions);
        let touchpoints = &build.journeys[0].touchpoints;
        assert_eq!(touchpoints.len(), 5);
        let initializers = touchpoints.iter().filter(|t| t.role.is_initializer()).count();
        let closers = touchpoints.iter().filter(|t| t.role.is_closer()).count();
        let holders = touchpoints.iter().filter(|t| t.role == Role::Holder).count();
        assert_eq!(initializers, 1);
        assert_eq!(closers, 1);
        assert_eq!(holders, 3);
        assert!(touchpoints[0].role.is_initializer());
        assert!(touchpoints[4].role.is_closer());
    }

    #[test]
    fn conversion_with_no_sessions_is_reported_not_submitted() {
        let conversions = vec![conversion("c1", "lonely", "2023-09-01 10:00:00")];
        let build = build_journeys(&conversions, &[]);
        assert!(build.journeys.is_empty());
        assert_eq!(build.empty_conversions, vec!["c1".to_string()]);
    }

    #[test]
    fn chunking_is_complete_and_order_preserving() {
        let journeys: Vec<Journey> = (0..23)
            .map(|i| Journey {
                conversion_id: format!("c{:02}", i),
                touchpoints: Vec::new(),
            })
            .collect();

        let chunks = chunk_journeys(journeys, 10);
        assert_eq!(chunks.len(), 3); // ceil(23 / 10)
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks[2].len(), 3);

        let flattened: Vec<String> = chunks
            .into_iter()
            .flatten()
            .map(|j| j.conversion_id)
            .collect();
        let expected: Vec<String> = (0..23).map(|i| format!("c{:02}", i)).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn wire_shape_matches_scoring_contract() {
        let conversions = vec![conversion("c1", "u", "2023-09-01 10:00:00")];
        let sessions = vec![session("s1", "u", "Email", "2023-09-01 09:00:00")];
        let build = build_journeys(&conversions, &sessions);

        let value = serde_json::to_value(&build.journeys[0]).unwrap();
        assert_eq!(value["conversion_id"], "c1");
        let touchpoint = &value["touchpoints"][0];
        assert_eq!(touchpoint["session_id"], "s1");
        assert_eq!(touchpoint["timestamp"], "2023-09-01 09:00:00");
        assert_eq!(touchpoint["channel_name"], "Email");
        assert_eq!(touchpoint["role"], "initializer_closer");
    }
}
