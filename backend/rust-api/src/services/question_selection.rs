use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use crate::models::{Difficulty, Question, QUESTIONS_PER_EXAM};

/// Picks the questions for one exam.
///
/// One easy, one medium and one hard question when the pool has each level;
/// otherwise a random sample. Either way the result is ordered by
/// non-decreasing difficulty. Returns `None` when fewer than three questions
/// are available.
pub fn select_questions<R: Rng + ?Sized>(
    pool: &[Question],
    rng: &mut R,
) -> Option<[Question; QUESTIONS_PER_EXAM]> {
    if pool.len() < QUESTIONS_PER_EXAM {
        return None;
    }

    let by_level = |level: Difficulty| -> Vec<&Question> {
        pool.iter().filter(|q| q.difficulty == level).collect()
    };
    let easy = by_level(Difficulty::Easy);
    let medium = by_level(Difficulty::Medium);
    let hard = by_level(Difficulty::Hard);

    let mut picked: Vec<Question> =
        match (easy.choose(rng), medium.choose(rng), hard.choose(rng)) {
            (Some(e), Some(m), Some(h)) => vec![(*e).clone(), (*m).clone(), (*h).clone()],
            _ => {
                tracing::debug!(
                    "Pool lacks one question per difficulty (easy={}, medium={}, hard={}), sampling",
                    easy.len(),
                    medium.len(),
                    hard.len()
                );
                let mut shuffled: Vec<&Question> = pool.iter().collect();
                shuffled.shuffle(rng);
                shuffled
                    .into_iter()
                    .take(QUESTIONS_PER_EXAM)
                    .cloned()
                    .collect()
            }
        };

    picked.sort_by_key(|q| q.difficulty);
    picked.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExamLanguage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn question(id: &str, difficulty: Difficulty) -> Question {
        Question {
            id: id.to_string(),
            language: ExamLanguage::Python,
            title: id.to_string(),
            description: String::new(),
            difficulty,
            topic: None,
            starter_code: String::new(),
            input_format: None,
            output_format: None,
            constraints: None,
            visible_test_cases: vec![],
            hidden_test_cases: vec![],
            time_limit_ms: 2000,
            memory_limit_mb: 256,
        }
    }

    #[test]
    fn picks_one_per_difficulty() {
        let pool = vec![
            question("h1", Difficulty::Hard),
            question("e1", Difficulty::Easy),
            question("m1", Difficulty::Medium),
            question("e2", Difficulty::Easy),
            question("m2", Difficulty::Medium),
        ];

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = select_questions(&pool, &mut rng).unwrap();
            let levels: Vec<Difficulty> = picked.iter().map(|q| q.difficulty).collect();
            assert_eq!(
                levels,
                vec![Difficulty::Easy, Difficulty::Medium, Difficulty::Hard]
            );
        }
    }

    #[test]
    fn falls_back_to_sorted_sample() {
        let pool = vec![
            question("h1", Difficulty::Hard),
            question("e1", Difficulty::Easy),
            question("h2", Difficulty::Hard),
            question("e2", Difficulty::Easy),
        ];

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = select_questions(&pool, &mut rng).unwrap();
            assert!(picked.windows(2).all(|w| w[0].difficulty <= w[1].difficulty));

            let mut ids: Vec<&str> = picked.iter().map(|q| q.id.as_str()).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 3);
        }
    }

    #[test]
    fn small_pool_is_exhausted() {
        let pool = vec![
            question("e1", Difficulty::Easy),
            question("m1", Difficulty::Medium),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        assert!(select_questions(&pool, &mut rng).is_none());
    }
}
