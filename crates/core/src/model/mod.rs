mod ids;
mod progress;
mod quiz;
mod roadmap;

pub use ids::{CourseId, LearnerId, ParseIdError};
pub use progress::{
    EnrollmentProgress, EnrollmentStatus, contiguous_prefix, is_prefix_contiguous,
    progress_percent,
};
pub use quiz::{
    MAX_ATTEMPTS_PER_DAY, PASS_THRESHOLD, PERFECT_SCORE, QuizAttempt, QuizAttemptLedger,
    QuizScore, score_answers,
};
pub use roadmap::{DayNumber, QuizQuestion, Roadmap, RoadmapDay, RoadmapError};
