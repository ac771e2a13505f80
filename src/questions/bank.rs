use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::errors::ScanError;
use crate::models::QuestionPrompt;

fn default_points() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoredAnswer {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub correct: bool,
}

/// A question as it sits in the bank, options unshuffled.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoredQuestion {
    pub id: String,
    pub phase: String,
    pub text: String,
    pub answers: Vec<StoredAnswer>,
    #[serde(default = "default_points")]
    pub points: u32,
}

impl StoredQuestion {
    /// A question is usable only with at least two options and exactly one
    /// marked correct.
    fn is_well_formed(&self) -> bool {
        self.answers.len() >= 2 && self.answers.iter().filter(|a| a.correct).count() == 1
    }
}

/// Read-only source of theory questions, keyed by phase tag.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn question_for_phase(&self, phase_tag: &str) -> Option<QuestionPrompt>;
}

/// The default question collaborator: an embedded YAML set, optionally
/// extended by `*.yaml` files in a questions directory.
pub struct QuestionBank {
    questions: Vec<StoredQuestion>,
}

impl QuestionBank {
    pub fn builtin() -> Self {
        let raw = include_str!("defaults.yaml");
        // The embedded set is validated by tests; a parse failure here is a
        // build defect, not a runtime condition.
        let questions: Vec<StoredQuestion> =
            serde_yaml::from_str(raw).unwrap_or_default();
        Self { questions }
    }

    /// Load the bank from a directory of YAML files, falling back to the
    /// embedded set when the directory is missing or holds no usable file.
    pub fn load(dir: &Path) -> Result<Self, ScanError> {
        if !dir.is_dir() {
            return Ok(Self::builtin());
        }
        let mut questions: Vec<StoredQuestion> = Vec::new();
        let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<Vec<StoredQuestion>>(&content) {
                Ok(mut file_questions) => questions.append(&mut file_questions),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed question file"),
            }
        }
        if questions.is_empty() {
            return Ok(Self::builtin());
        }
        info!(count = questions.len(), dir = %dir.display(), "Loaded question bank");
        Ok(Self { questions })
    }

    /// Selection per phase tag: exact matches first; a `sqli-*`/`xss-*` tag
    /// with no dedicated pool falls back to the generic `sqli`/`xss` set.
    fn pool_for(&self, phase_tag: &str) -> Vec<&StoredQuestion> {
        let exact: Vec<&StoredQuestion> = self
            .questions
            .iter()
            .filter(|q| q.phase == phase_tag && q.is_well_formed())
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        let generic = if phase_tag.starts_with("sqli-") {
            "sqli"
        } else if phase_tag.starts_with("xss-") {
            "xss"
        } else {
            return exact;
        };
        self.questions
            .iter()
            .filter(|q| q.phase == generic && q.is_well_formed())
            .collect()
    }

    /// Pick one question uniformly at random and shuffle its options,
    /// recomputing the correct index so it stays aligned with `answer_ids`.
    pub fn pick(&self, phase_tag: &str) -> Option<QuestionPrompt> {
        let pool = self.pool_for(phase_tag);
        let mut rng = rand::thread_rng();
        let question = pool.choose(&mut rng)?;

        let mut order: Vec<usize> = (0..question.answers.len()).collect();
        order.shuffle(&mut rng);

        let options = order
            .iter()
            .map(|&i| question.answers[i].text.clone())
            .collect();
        let answer_ids = order
            .iter()
            .map(|&i| question.answers[i].id.clone())
            .collect();
        let correct_index = order
            .iter()
            .position(|&i| question.answers[i].correct)?;

        Some(QuestionPrompt {
            question_id: question.id.clone(),
            phase_tag: phase_tag.to_string(),
            text: question.text.clone(),
            options,
            answer_ids,
            correct_index,
            points: question.points,
        })
    }
}

#[async_trait]
impl QuestionSource for QuestionBank {
    async fn question_for_phase(&self, phase_tag: &str) -> Option<QuestionPrompt> {
        self.pick(phase_tag)
    }
}
