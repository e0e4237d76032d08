use crate::models::exam::{ExamScore, QuestionScore};
use crate::models::{Answer, QUESTIONS_PER_EXAM};

/// Share of the total score carried by each question, in presentation order.
pub const QUESTION_WEIGHTS: [f64; QUESTIONS_PER_EXAM] = [0.30, 0.30, 0.40];

pub fn score_exam(session_id: &str, answers: &[Answer]) -> ExamScore {
    let questions: Vec<QuestionScore> = QUESTION_WEIGHTS
        .iter()
        .enumerate()
        .map(|(index, &weight)| {
            let answer = answers.iter().find(|a| a.question_index == index);
            let (tests_passed, tests_total) =
                answer.map_or((0, 0), |a| (a.tests_passed, a.tests_total));
            QuestionScore {
                question_index: index,
                weight,
                tests_passed,
                tests_total,
                points: question_points(tests_passed, tests_total, weight),
            }
        })
        .collect();

    let total = questions.iter().map(|q| q.points).sum::<f64>();

    ExamScore {
        session_id: session_id.to_string(),
        questions,
        total: round2(total),
    }
}

fn question_points(tests_passed: u32, tests_total: u32, weight: f64) -> f64 {
    if tests_total == 0 {
        return 0.0;
    }
    let ratio = f64::from(tests_passed.min(tests_total)) / f64::from(tests_total);
    round2(ratio * weight * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerStatus;

    fn answer(index: usize, passed: u32, total: u32) -> Answer {
        Answer {
            question_index: index,
            question_id: format!("q-{}", index),
            code: String::new(),
            status: AnswerStatus::Attempted,
            tests_passed: passed,
            tests_total: total,
            compilation_errors: 0,
            runtime_errors: 0,
            run_count: 1,
            last_run_at: None,
        }
    }

    #[test]
    fn perfect_run_scores_100() {
        let answers = vec![answer(0, 5, 5), answer(1, 4, 4), answer(2, 10, 10)];
        let score = score_exam("s-1", &answers);
        assert_eq!(score.total, 100.0);
        assert_eq!(score.questions[2].points, 40.0);
    }

    #[test]
    fn partial_credit_is_weighted() {
        let answers = vec![answer(0, 1, 2), answer(1, 0, 4), answer(2, 3, 4)];
        let score = score_exam("s-1", &answers);
        assert_eq!(score.questions[0].points, 15.0);
        assert_eq!(score.questions[1].points, 0.0);
        assert_eq!(score.questions[2].points, 30.0);
        assert_eq!(score.total, 45.0);
    }

    #[test]
    fn unrun_questions_score_zero() {
        let score = score_exam("s-1", &[answer(1, 0, 0)]);
        assert_eq!(score.total, 0.0);
        assert_eq!(score.questions.len(), 3);
    }
}
