/// Progression Decision - pure function from settled test state to the
/// learner's next step.
///
/// **Critical Properties:**
/// - Knows nothing about workers, backends or Redis
/// - Deterministic: the same settled state always yields the same decision
/// - Returns `None` until every test has settled
///
/// **Rules:**
/// - all passed + (integrated project OR last lesson) → finish project
/// - all passed otherwise → advance to `lesson + 1`
/// - any failure → fail (hints are shown)

use lesson_common::types::{Project, TestState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub all_passed: bool,
    pub all_settled: bool,
}

pub fn aggregate(states: &[TestState]) -> Aggregate {
    Aggregate {
        all_passed: states.iter().all(|s| s.passed),
        all_settled: states.iter().all(|s| !s.is_loading),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progression {
    FinishProject,
    Advance { next_lesson: u32 },
    Fail,
}

pub fn decide(project: &Project, lesson_number: u32, states: &[TestState]) -> Option<Progression> {
    let aggregate = aggregate(states);
    if !aggregate.all_settled {
        return None;
    }

    let progression = if !aggregate.all_passed {
        Progression::Fail
    } else if project.is_integrated || project.is_last_lesson(lesson_number) {
        Progression::FinishProject
    } else {
        Progression::Advance {
            next_lesson: lesson_number + 1,
        }
    };

    Some(progression)
}
