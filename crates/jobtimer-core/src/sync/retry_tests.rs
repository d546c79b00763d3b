//! Tests for retry module.

#[cfg(test)]
mod tests {
    use super::super::retry::*;
    use crate::timer::TimerState;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn state(id: &str, remaining: i64) -> TimerState {
        TimerState {
            id: id.into(),
            user_id: "u1".into(),
            project_id: "p1".into(),
            job_card_id: "jc1".into(),
            job_card_title: String::new(),
            start_time: None,
            time_remaining: remaining,
            allocated_hours: 1.0,
            is_running: false,
            is_paused: false,
            pause_count: 0,
            pause_history: vec![],
            device_id: String::new(),
            session_id: String::new(),
            sync_version: 1,
            last_updated: Utc::now(),
            idempotency_key: String::new(),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            retry_delay: std::time::Duration::from_secs(1),
            max_delay: std::time::Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(1).as_secs(), 1);
        assert_eq!(policy.delay_for(2).as_secs(), 2);
        assert_eq!(policy.delay_for(3).as_secs(), 4);
        assert_eq!(policy.delay_for(4).as_secs(), 5);
        assert_eq!(policy.delay_for(40).as_secs(), 5);
    }

    #[test]
    fn test_enqueue_supersedes_same_timer() {
        let now = Utc::now();
        let mut queue = RetryQueue::default();
        queue.enqueue(state("t1", 100), "offline", now);
        queue.enqueue(state("t1", 90), "offline", now);
        queue.enqueue(state("t2", 50), "offline", now);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get("t1").unwrap().state.time_remaining, 90);
    }

    #[test]
    fn test_take_due_respects_deadline() {
        let now = Utc::now();
        let mut queue = RetryQueue::default();
        queue.enqueue(state("t1", 100), "offline", now);

        assert!(queue.take_due(now).is_empty());
        let due = queue.take_due(now + Duration::seconds(1));
        assert_eq!(due.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failures_exhaust_after_max_retries() {
        let mut now = Utc::now();
        let mut queue = RetryQueue::default();
        queue.enqueue(state("t1", 100), "offline", now);

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            now += Duration::seconds(120);
            let entry = queue.take_due(now).pop().unwrap();
            outcomes.push(queue.record_failure(entry, "still offline", now));
        }

        assert!(matches!(outcomes[0], RetryOutcome::Scheduled { attempt: 2, .. }));
        assert!(matches!(outcomes[1], RetryOutcome::Scheduled { attempt: 3, .. }));
        match &outcomes[2] {
            RetryOutcome::Exhausted(entry) => {
                assert_eq!(entry.attempts, 3);
                assert_eq!(entry.last_error, "still offline");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failure_after_newer_write_is_superseded() {
        let now = Utc::now();
        let mut queue = RetryQueue::default();
        queue.enqueue(state("t1", 100), "offline", now);
        let entry = queue.take_due(now + Duration::seconds(5)).pop().unwrap();

        queue.enqueue(state("t1", 80), "offline", now);
        let outcome = queue.record_failure(entry, "offline", now);
        assert_eq!(outcome, RetryOutcome::Superseded);
        assert_eq!(queue.get("t1").unwrap().state.time_remaining, 80);
    }

    #[test]
    fn test_time_until_next() {
        let now = Utc::now();
        let mut queue = RetryQueue::default();
        assert!(queue.time_until_next(now).is_none());

        queue.enqueue(state("t1", 100), "offline", now);
        assert_eq!(queue.time_until_next(now), Some(Duration::seconds(1)));
        assert_eq!(
            queue.time_until_next(now + Duration::seconds(10)),
            Some(Duration::zero())
        );
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry_queue.json");
        let now = Utc::now();

        let mut queue = RetryQueue::with_path(RetryPolicy::default(), path.clone());
        queue.enqueue(state("t1", 100), "offline", now);
        queue.persist().unwrap();

        let mut restored = RetryQueue::with_path(RetryPolicy::default(), path);
        restored.load().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get("t1").unwrap().last_error, "offline");
    }

    #[test]
    fn test_load_without_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut queue =
            RetryQueue::with_path(RetryPolicy::default(), dir.path().join("missing.json"));
        queue.load().unwrap();
        assert!(queue.is_empty());
    }
}
