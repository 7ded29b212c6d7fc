use std::collections::BTreeSet;
use std::sync::Arc;

use course_core::model::{
    CourseId, DayNumber, EnrollmentStatus, LearnerId, QuizQuestion, Roadmap, RoadmapDay,
    is_prefix_contiguous,
};
use course_core::time::fixed_clock;
use course_core::{DayState, ProgressionError, TransitionBlock};
use services::sync::ProgressPayload;
use services::{
    BearerToken, FailureKind, InMemoryBackend, LoadReport, ProgressSyncClient, ProgressionEngine,
    ProgressionServiceError, QuizAttemptError, QuizAttemptManager, StaticCredentials, SyncOutcome,
};
use storage::repository::{
    CacheKey, CachedProgress, InMemoryProgressCache, ProgressCache, Storage,
};

const COURSE: CourseId = CourseId::new(42);

fn five_questions() -> Vec<QuizQuestion> {
    (0..5)
        .map(|i| QuizQuestion {
            prompt: format!("Question {i}"),
            options: vec!["right".into(), "wrong".into(), "also wrong".into()],
            correct_option: 0,
        })
        .collect()
}

fn roadmap(quiz_days: &[DayNumber]) -> Arc<Roadmap> {
    let days = (1..=5)
        .map(|n| {
            let day = RoadmapDay::new(n, format!("Day {n}"), format!("https://video.test/{n}"));
            if quiz_days.contains(&n) {
                day.with_quiz(five_questions())
            } else {
                day
            }
        })
        .collect();
    Arc::new(Roadmap::new(COURSE, days).unwrap())
}

/// `right` of five answers correct.
fn answers(right: usize) -> Vec<Option<usize>> {
    (0..5).map(|i| Some(usize::from(i >= right))).collect()
}

fn days(days: &[DayNumber]) -> BTreeSet<DayNumber> {
    days.iter().copied().collect()
}

fn key() -> CacheKey {
    CacheKey::new(LearnerId::new(7), COURSE)
}

async fn open(
    roadmap: Arc<Roadmap>,
    cache: Arc<dyn ProgressCache>,
    backend: &InMemoryBackend,
    token: Option<&str>,
) -> (ProgressionEngine, LoadReport) {
    let sync = ProgressSyncClient::new(
        Arc::new(backend.clone()),
        Arc::new(StaticCredentials::new(token.and_then(BearerToken::new))),
        fixed_clock(),
    );
    let quizzes = QuizAttemptManager::new(sync.clone(), fixed_clock());
    ProgressionEngine::load(LearnerId::new(7), roadmap, cache, sync, quizzes)
        .await
        .expect("engine loads")
}

#[tokio::test]
async fn quiz_free_course_completes_on_watch() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, _) = open(roadmap(&[]), cache, &backend, Some("token")).await;

    let mut percents = Vec::new();
    for day in 1..=5 {
        let watched = engine.record_video_watched(day).await.unwrap();
        let transition = watched.completed.expect("day completes on watch");
        percents.push(transition.progress.progress_percent);
        assert!(matches!(
            transition.push.outcome().await,
            SyncOutcome::Pushed
        ));
    }

    assert_eq!(percents, vec![20, 40, 60, 80, 100]);
    assert_eq!(engine.progress().status, EnrollmentStatus::Completed);
    let remote = backend.progress(COURSE).unwrap();
    assert_eq!(remote.progress, 100);
    assert_eq!(remote.status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn failing_quiz_score_still_allows_completion() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, _) = open(roadmap(&[2]), cache, &backend, Some("token")).await;

    engine.record_video_watched(1).await.unwrap();
    let watched = engine.record_video_watched(2).await.unwrap();
    assert!(watched.completed.is_none());
    assert_eq!(engine.day_view(2).unwrap().state, DayState::QuizPending);

    let err = engine.mark_day_complete(2).await.unwrap_err();
    assert!(matches!(
        err,
        ProgressionServiceError::Progression(ProgressionError::InvalidTransition {
            day: 2,
            reason: TransitionBlock::QuizNotAttempted
        })
    ));

    let attempt = engine.submit_quiz(2, &answers(3)).await.unwrap();
    assert_eq!(attempt.score(), 60);
    assert!(!attempt.passed());
    assert!(engine.check_day_completion(2));
    assert!(!engine.state().completed().contains(&2));

    let transition = engine.mark_day_complete(2).await.unwrap();
    assert_eq!(transition.progress.progress_percent, 40);
    assert!(matches!(transition.push.outcome().await, SyncOutcome::Pushed));
}

#[tokio::test]
async fn perfect_score_closes_the_quiz() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, _) = open(roadmap(&[2]), cache, &backend, Some("token")).await;
    engine.record_video_watched(1).await.unwrap();
    engine.record_video_watched(2).await.unwrap();

    let first = engine.submit_quiz(2, &answers(5)).await.unwrap();
    assert_eq!(first.score(), 100);

    let err = engine.submit_quiz(2, &answers(2)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::AttemptLimitExceeded);
    assert!(matches!(err, QuizAttemptError::Progression(_)));
    assert_eq!(backend.received_submissions().len(), 1);
    assert_eq!(engine.quiz_history(2).len(), 1);
}

#[tokio::test]
async fn reload_merges_authoritative_progress() {
    let backend = InMemoryBackend::new();
    backend.set_progress(
        COURSE,
        ProgressPayload {
            completed_days: [1, 2].into_iter().collect(),
            progress: 40,
            status: EnrollmentStatus::Started,
        },
    );
    let cache = Arc::new(InMemoryProgressCache::new());
    cache
        .save_progress(
            key(),
            &CachedProgress {
                watched: [1, 2].into_iter().collect(),
                completed: [1].into_iter().collect(),
            },
        )
        .await
        .unwrap();

    let (engine, report) = open(roadmap(&[]), cache.clone(), &backend, Some("token")).await;

    let merged = report.reconciliation.expect("pull succeeded");
    assert_eq!(merged.added, vec![2]);
    assert!(merged.dropped.is_empty());
    assert_eq!(engine.state().completed(), &days(&[1, 2]));
    assert!(!engine.is_day_locked(3));

    let cached = cache.load_progress(key()).await.unwrap();
    assert_eq!(cached.completed, days(&[1, 2]));
}

#[tokio::test]
async fn push_failure_is_reported_not_rolled_back() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, _) = open(roadmap(&[2]), cache.clone(), &backend, Some("token")).await;
    let first = engine.record_video_watched(1).await.unwrap().completed.unwrap();
    assert!(matches!(first.push.outcome().await, SyncOutcome::Pushed));
    engine.record_video_watched(2).await.unwrap();
    engine.submit_quiz(2, &answers(4)).await.unwrap();

    backend.fail_next_put();
    let transition = engine.mark_day_complete(2).await.unwrap();
    match transition.push.outcome().await {
        SyncOutcome::Failed(err) => assert_eq!(err.kind(), FailureKind::NetworkFailure),
        other => panic!("expected a failed push, got {other:?}"),
    }

    assert!(engine.state().completed().contains(&2));
    assert!(
        cache
            .load_progress(key())
            .await
            .unwrap()
            .completed
            .contains(&2)
    );
}

#[tokio::test]
async fn anonymous_learner_keeps_local_progress_only() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, report) = open(roadmap(&[2]), cache, &backend, None).await;
    assert!(report.pull_error.is_none());

    let transition = engine
        .record_video_watched(1)
        .await
        .unwrap()
        .completed
        .unwrap();
    assert!(matches!(transition.push.outcome().await, SyncOutcome::Skipped));

    engine.record_video_watched(2).await.unwrap();
    let err = engine.submit_quiz(2, &answers(5)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::NotAuthenticated);
    assert!(backend.pushes().is_empty());
    assert!(backend.received_submissions().is_empty());
}

#[tokio::test]
async fn locked_day_cannot_be_completed_out_of_order() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, _) = open(roadmap(&[]), cache, &backend, Some("token")).await;

    let watched = engine.record_video_watched(3).await.unwrap();
    assert!(watched.newly_watched);
    assert!(watched.completed.is_none());

    let err = engine.mark_day_complete(3).await.unwrap_err();
    assert!(matches!(
        err,
        ProgressionServiceError::Progression(ProgressionError::InvalidTransition {
            day: 3,
            reason: TransitionBlock::PreviousDayIncomplete { previous: 2 }
        })
    ));
    assert!(engine.state().completed().is_empty());
}

#[tokio::test]
async fn completed_days_stay_a_prefix_through_mixed_actions() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, _) = open(roadmap(&[3]), cache, &backend, Some("token")).await;

    for day in [1, 2, 4, 3] {
        engine.record_video_watched(day).await.unwrap();
        assert!(is_prefix_contiguous(engine.state().completed()));
    }
    engine.submit_quiz(3, &answers(1)).await.unwrap();
    engine.mark_day_complete(3).await.unwrap();
    assert!(is_prefix_contiguous(engine.state().completed()));
    // day 4 was watched while locked and is now completable
    engine.mark_day_complete(4).await.unwrap();
    assert_eq!(engine.state().completed().len(), 4);

    engine.mark_day_incomplete(2).await.unwrap();
    assert_eq!(engine.state().completed(), &days(&[1]));
    assert!(is_prefix_contiguous(engine.state().completed()));

    engine.record_video_watched(2).await.unwrap();
    engine.record_video_watched(3).await.unwrap();
    assert_eq!(engine.state().completed(), &days(&[1, 2]));
    // quiz history survives un-completion
    assert!(engine.check_day_completion(3));
}

#[tokio::test]
async fn sqlite_cache_restores_progress_across_sessions() {
    let storage = Storage::sqlite("sqlite:file:memdb_flow_reload?mode=memory&cache=shared")
        .await
        .expect("open sqlite");
    let backend = InMemoryBackend::new();

    {
        let (mut engine, _) =
            open(roadmap(&[]), storage.progress.clone(), &backend, None).await;
        engine.record_video_watched(1).await.unwrap();
        engine.record_video_watched(2).await.unwrap();
        engine.select_day(3, false).await.unwrap();
    }

    let (engine, _) = open(roadmap(&[]), storage.progress.clone(), &backend, None).await;
    assert_eq!(engine.state().completed(), &days(&[1, 2]));
    assert_eq!(engine.view_state().last_viewed_day, Some(3));
    assert_eq!(engine.state().resume_day(), 3);
}

#[tokio::test]
async fn quiz_attempt_from_earlier_session_allows_completion() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    {
        let (mut engine, _) = open(roadmap(&[2]), cache.clone(), &backend, Some("token")).await;
        engine.record_video_watched(1).await.unwrap();
        engine.record_video_watched(2).await.unwrap();
        engine.submit_quiz(2, &answers(3)).await.unwrap();
    }

    let (mut engine, _) = open(roadmap(&[2]), cache.clone(), &backend, Some("token")).await;
    let transition = engine.mark_day_complete(2).await.unwrap();
    assert_eq!(transition.progress.completed_days, days(&[1, 2]));
    assert_eq!(engine.quiz_history(2).len(), 1);
    assert_eq!(
        cache.load_progress(key()).await.unwrap().completed,
        days(&[1, 2])
    );
}

#[tokio::test]
async fn attempt_cap_holds_across_sessions() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    {
        let (mut engine, _) = open(roadmap(&[2]), cache.clone(), &backend, Some("token")).await;
        engine.record_video_watched(1).await.unwrap();
        engine.record_video_watched(2).await.unwrap();
        engine.submit_quiz(2, &answers(2)).await.unwrap();
    }

    let (mut engine, _) = open(roadmap(&[2]), cache.clone(), &backend, Some("token")).await;
    let second = engine.submit_quiz(2, &answers(3)).await.unwrap();
    assert_eq!(second.attempt_number(), 2);

    let err = engine.submit_quiz(2, &answers(5)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::AttemptLimitExceeded);

    let numbers: Vec<u32> = backend
        .received_submissions()
        .iter()
        .map(|s| s.attempt_number)
        .collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn load_fetches_history_for_last_viewed_day() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    {
        let (mut engine, _) = open(roadmap(&[2]), cache.clone(), &backend, Some("token")).await;
        engine.record_video_watched(1).await.unwrap();
        engine.record_video_watched(2).await.unwrap();
        engine.select_day(2, true).await.unwrap();
        engine.submit_quiz(2, &answers(4)).await.unwrap();
    }

    let (engine, report) = open(roadmap(&[2]), cache.clone(), &backend, Some("token")).await;
    assert!(report.history_error.is_none());
    let view = engine.day_view(2).unwrap();
    assert_eq!(view.state, DayState::Watched);
    assert_eq!(view.attempts_used, 1);
    assert!(view.ready_to_complete);
}

#[tokio::test]
async fn history_fetch_failure_blocks_quiz_submission() {
    let backend = InMemoryBackend::new();
    let cache = Arc::new(InMemoryProgressCache::new());
    let (mut engine, _) = open(roadmap(&[2]), cache, &backend, Some("token")).await;
    engine.record_video_watched(1).await.unwrap();
    engine.record_video_watched(2).await.unwrap();

    backend.fail_next_pull();
    let err = engine.submit_quiz(2, &answers(5)).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::NetworkFailure);
    assert!(backend.received_submissions().is_empty());

    let attempt = engine.submit_quiz(2, &answers(5)).await.unwrap();
    assert_eq!(attempt.attempt_number(), 1);
}
