pub mod code;
pub mod error;
pub mod grade;
pub mod minigame;
pub mod net;
pub mod player;
pub mod quiz;
pub mod score;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use uuid::Uuid;

    use crate::quiz::{
        Item, ItemKind, OptionRow, Question, QuestionType, Quiz, Round, ScoringSettings,
    };

    /// Build an option row with a fresh id.
    pub fn option(text: &str, is_correct: bool, order: i32) -> OptionRow {
        OptionRow {
            id: Uuid::new_v4(),
            text: text.to_string(),
            is_correct,
            order,
        }
    }

    /// Build a question of the given type from raw option rows.
    pub fn make_question(question_type: QuestionType, options: Vec<OptionRow>) -> Question {
        Question {
            id: Uuid::new_v4(),
            question_type,
            prompt: "test question".to_string(),
            explanation: None,
            media: Vec::new(),
            options,
        }
    }

    /// Wrap a question in an item with explicit timer and base points.
    pub fn question_item(question: Question, timer_secs: u32, base_points: u32) -> Item {
        Item {
            id: Uuid::new_v4(),
            kind: ItemKind::Question(question),
            timer_secs: Some(timer_secs),
            base_points: Some(base_points),
            show_explanation: None,
        }
    }

    /// A single-round quiz from a list of items, with default scoring settings.
    pub fn make_quiz(items: Vec<Item>) -> Quiz {
        Quiz {
            id: Uuid::new_v4(),
            title: "Test Quiz".to_string(),
            rounds: vec![Round {
                id: Uuid::new_v4(),
                title: "Round 1".to_string(),
                items,
            }],
            settings: ScoringSettings::default(),
        }
    }

    /// A three-option multiple-choice quiz with one correct option ("B"),
    /// matching the canonical happy-path fixture used across the test suites.
    pub fn mc_quiz(timer_secs: u32, base_points: u32) -> Quiz {
        let question = make_question(
            QuestionType::McSingle,
            vec![
                option("A", false, 0),
                option("B", true, 1),
                option("C", false, 2),
            ],
        );
        make_quiz(vec![question_item(question, timer_secs, base_points)])
    }
}
