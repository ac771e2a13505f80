use serde::{Deserialize, Serialize};

/// A theory question ready to be sent to the user. The options have already
/// been shuffled for this prompt; `answer_ids` is kept in the same order so
/// the transport can report which stored answer the user picked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPrompt {
    pub question_id: String,
    pub phase_tag: String,
    pub text: String,
    pub options: Vec<String>,
    pub answer_ids: Vec<String>,
    pub correct_index: usize,
    pub points: u32,
}

/// Outcome of a question once the gate has resolved it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    #[serde(flatten)]
    pub prompt: QuestionPrompt,
    pub user_answer: usize,
    pub correct: bool,
    pub points_earned: u32,
}
